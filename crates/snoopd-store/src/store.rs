use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use snoopd_common::content_type;
use snoopd_common::model::{
    BodyTarget, CapturedRequest, EventFilter, EventType, InterceptionType, InterceptorEvent,
    RequestCore, RequestFilter, RequestSummary, ResponseUpdate, Session,
};
use snoopd_common::{Result, SnoopdError};
use tracing::warn;
use uuid::Uuid;

use crate::{connection, filter, jsonpath, regex_guard, schema};

const READER_POOL_SIZE: usize = 4;

/// The embedded store: a serialized writer connection plus a small pool of
/// read-only connections sharing the same WAL file (spec §4.3, §5).
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    readers: Vec<Arc<Mutex<Connection>>>,
    next_reader: AtomicUsize,
    event_seq: Arc<AtomicI64>,
}

impl Store {
    pub async fn open(db_path: &Path) -> Result<Self> {
        let path = db_path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(&path))
            .await
            .map_err(|e| SnoopdError::Store(format!("store init task panicked: {e}")))?
    }

    fn open_blocking(db_path: &Path) -> Result<Self> {
        let writer = connection::open(db_path)?;
        schema::migrate(&writer)?;
        let max_seq: i64 = writer
            .query_row("SELECT COALESCE(MAX(seq), 0) FROM interceptor_events", [], |r| r.get(0))
            .unwrap_or(0);

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            readers.push(Arc::new(Mutex::new(connection::open_reader(db_path)?)));
        }

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            readers,
            next_reader: AtomicUsize::new(0),
            event_seq: Arc::new(AtomicI64::new(max_seq)),
        })
    }

    fn reader(&self) -> Arc<Mutex<Connection>> {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[idx].clone()
    }

    async fn with_writer<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.lock();
            f(&conn)
        })
        .await
        .map_err(|e| SnoopdError::Store(format!("store task panicked: {e}")))?
    }

    async fn with_reader<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let reader = self.reader();
        tokio::task::spawn_blocking(move || {
            let conn = reader.lock();
            f(&conn)
        })
        .await
        .map_err(|e| SnoopdError::Store(format!("store task panicked: {e}")))?
    }

    // ---- Session management ---------------------------------------------

    pub async fn register_session(
        &self,
        label: Option<String>,
        pid: u32,
        source: Option<String>,
    ) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            label,
            source,
            pid,
            started_at: snoopd_common::model::now_millis(),
            token: Uuid::new_v4().to_string(),
        };
        let row = session.clone();
        self.with_writer(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, label, source, pid, started_at, token) VALUES (?, ?, ?, ?, ?, ?)",
                rusqlite::params![row.id, row.label, row.source, row.pid, row.started_at, row.token],
            )?;
            Ok(())
        })
        .await?;
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let id = id.to_string();
        self.with_reader(move |conn| {
            conn.query_row(
                "SELECT id, label, source, pid, started_at, token FROM sessions WHERE id = ?",
                [&id],
                row_to_session,
            )
            .optional()
            .map_err(SnoopdError::from)
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, label, source, pid, started_at, token FROM sessions ORDER BY started_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_session)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(SnoopdError::from)
        })
        .await
    }

    // ---- Request write path ----------------------------------------------

    pub async fn save_request(&self, core: RequestCore) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let insert_id = id.clone();
        self.with_writer(move |conn| {
            let request_headers = serde_json::to_string(&core.request_headers)?;
            conn.execute(
                "INSERT INTO requests (
                    id, session_id, timestamp, method, url, host, path,
                    request_headers, request_body, request_body_truncated,
                    request_content_type, replayed_from_id, replay_initiator, source, saved, responded
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0)",
                rusqlite::params![
                    insert_id,
                    core.session_id,
                    core.timestamp,
                    core.method,
                    core.url,
                    core.host,
                    core.path,
                    request_headers,
                    core.request_body,
                    core.request_body_truncated,
                    core.request_content_type,
                    core.replayed_from_id,
                    core.replay_initiator,
                    core.source,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(id)
    }

    /// Fills in the response columns. A second call for the same id is a
    /// documented no-op (spec §3 "exactly one response-update per id").
    pub async fn update_response(&self, id: &str, update: ResponseUpdate) -> Result<()> {
        let id = id.to_string();
        self.with_writer(move |conn| {
            let already: i64 = conn.query_row(
                "SELECT responded FROM requests WHERE id = ?",
                [&id],
                |r| r.get(0),
            )?;
            if already != 0 {
                warn!(request_id = %id, "ignoring duplicate update_response call");
                return Ok(());
            }

            let headers = serde_json::to_string(&update.headers)?;
            conn.execute(
                "UPDATE requests SET
                    response_status = ?,
                    response_headers = ?,
                    response_body = ?,
                    response_body_truncated = ?,
                    response_content_type = ?,
                    duration_ms = ?,
                    intercepted_by = ?,
                    interception_type = ?,
                    responded = 1
                 WHERE id = ?",
                rusqlite::params![
                    update.status,
                    headers,
                    update.body,
                    update.body_truncated,
                    update.content_type,
                    update.duration_ms,
                    update.intercepted_by,
                    update.interception_type.map(InterceptionType::as_str),
                    id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    // ---- Read path ---------------------------------------------------------

    pub async fn get(&self, id: &str) -> Result<Option<CapturedRequest>> {
        let id = id.to_string();
        self.with_reader(move |conn| {
            conn.query_row(&format!("SELECT {FULL_COLUMNS} FROM requests WHERE id = ?"), [&id], row_to_full)
                .optional()
                .map_err(SnoopdError::from)
        })
        .await
    }

    pub async fn list_summaries(
        &self,
        filter: RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestSummary>> {
        if let Some(pattern) = filter.regex.clone() {
            let flags = filter.regex_flags.clone();
            let mut base = filter.clone();
            base.regex = None;
            return self
                .with_reader(move |conn| {
                    let re = regex_guard::validate_regex(&pattern, flags.as_deref())?;
                    let clause = filter::build(&base);
                    let sql = format!(
                        "SELECT {SUMMARY_COLUMNS} FROM requests WHERE {} ORDER BY timestamp DESC",
                        clause.sql
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(clause.params), row_to_summary)?;
                    let mut matched: Vec<RequestSummary> = Vec::new();
                    for row in rows {
                        let summary = row?;
                        if re.is_match(&summary.url) {
                            matched.push(summary);
                        }
                    }
                    Ok(matched.into_iter().skip(offset).take(limit).collect())
                })
                .await;
        }

        self.with_reader(move |conn| {
            let clause = filter::build(&filter);
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS} FROM requests WHERE {} ORDER BY timestamp DESC LIMIT ? OFFSET ?",
                clause.sql
            );
            let mut params = clause.params;
            params.push(rusqlite::types::Value::Integer(limit as i64));
            params.push(rusqlite::types::Value::Integer(offset as i64));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params), row_to_summary)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(SnoopdError::from)
        })
        .await
    }

    pub async fn count(&self, filter: RequestFilter) -> Result<u64> {
        if filter.regex.is_some() {
            let all = self.list_summaries(filter, usize::MAX, 0).await?;
            return Ok(all.len() as u64);
        }
        self.with_reader(move |conn| {
            let clause = filter::build(&filter);
            let sql = format!("SELECT COUNT(*) FROM requests WHERE {}", clause.sql);
            conn.query_row(&sql, params_from_iter(clause.params), |r| r.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(SnoopdError::from)
        })
        .await
    }

    pub async fn search_bodies(
        &self,
        query: String,
        target: BodyTarget,
        filter: RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestSummary>> {
        self.with_reader(move |conn| {
            let clause = filter::build(&filter);
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS}, request_body, response_body, request_content_type, response_content_type
                 FROM requests WHERE {} ORDER BY timestamp DESC",
                clause.sql
            );
            let mut stmt = conn.prepare(&sql)?;
            let needle = query.to_lowercase();
            let mut matched = Vec::new();
            let mut rows = stmt.query(params_from_iter(clause.params))?;
            while let Some(row) = rows.next()? {
                let summary = row_to_summary(row)?;
                let request_body: Option<Vec<u8>> = row.get(SUMMARY_COLUMN_COUNT)?;
                let response_body: Option<Vec<u8>> = row.get(SUMMARY_COLUMN_COUNT + 1)?;
                let request_ct: Option<String> = row.get(SUMMARY_COLUMN_COUNT + 2)?;
                let response_ct: Option<String> = row.get(SUMMARY_COLUMN_COUNT + 3)?;

                let request_hit = matches!(target, BodyTarget::Request | BodyTarget::Both)
                    && body_contains(&request_body, request_ct.as_deref(), &needle);
                let response_hit = matches!(target, BodyTarget::Response | BodyTarget::Both)
                    && body_contains(&response_body, response_ct.as_deref(), &needle);

                if request_hit || response_hit {
                    matched.push(summary);
                }
            }
            Ok(matched.into_iter().skip(offset).take(limit).collect())
        })
        .await
    }

    pub async fn query_json_bodies(
        &self,
        json_path: String,
        value: Option<serde_json::Value>,
        target: BodyTarget,
        filter: RequestFilter,
    ) -> Result<Vec<RequestSummary>> {
        self.with_reader(move |conn| {
            let clause = filter::build(&filter);
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS}, request_body, response_body, request_content_type, response_content_type
                 FROM requests WHERE {} ORDER BY timestamp DESC",
                clause.sql
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut matched = Vec::new();
            let mut rows = stmt.query(params_from_iter(clause.params))?;
            while let Some(row) = rows.next()? {
                let summary = row_to_summary(row)?;
                let request_body: Option<Vec<u8>> = row.get(SUMMARY_COLUMN_COUNT)?;
                let response_body: Option<Vec<u8>> = row.get(SUMMARY_COLUMN_COUNT + 1)?;
                let request_ct: Option<String> = row.get(SUMMARY_COLUMN_COUNT + 2)?;
                let response_ct: Option<String> = row.get(SUMMARY_COLUMN_COUNT + 3)?;

                let request_hit = matches!(target, BodyTarget::Request | BodyTarget::Both)
                    && json_body_matches(&request_body, request_ct.as_deref(), &json_path, value.as_ref());
                let response_hit = matches!(target, BodyTarget::Response | BodyTarget::Both)
                    && json_body_matches(&response_body, response_ct.as_deref(), &json_path, value.as_ref());

                if request_hit || response_hit {
                    matched.push(summary);
                }
            }
            Ok(matched)
        })
        .await
    }

    // ---- Mutation -----------------------------------------------------------

    pub async fn clear(&self) -> Result<u64> {
        self.with_writer(|conn| {
            let n = conn.execute("DELETE FROM requests WHERE saved = 0", [])?;
            Ok(n as u64)
        })
        .await
    }

    pub async fn save(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_writer(move |conn| {
            let n = conn.execute("UPDATE requests SET saved = 1 WHERE id = ?", [&id])?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn unsave(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_writer(move |conn| {
            let n = conn.execute("UPDATE requests SET saved = 0 WHERE id = ?", [&id])?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_writer(move |conn| {
            let n = conn.execute("DELETE FROM requests WHERE id = ?", [&id])?;
            Ok(n > 0)
        })
        .await
    }

    // ---- Retention -----------------------------------------------------------

    pub async fn trim(&self, max_rows: u64) -> Result<u64> {
        self.with_writer(move |conn| {
            let n = conn.execute(
                "DELETE FROM requests WHERE saved = 0 AND id NOT IN (
                    SELECT id FROM requests WHERE saved = 0 ORDER BY timestamp DESC LIMIT ?
                )",
                [max_rows as i64],
            )?;
            Ok(n as u64)
        })
        .await
    }

    // ---- Interceptor event log ------------------------------------------------

    pub async fn append_event(
        &self,
        event_type: EventType,
        interceptor: Option<String>,
        message: String,
        request_id: Option<String>,
        request_url: Option<String>,
        request_method: Option<String>,
        error: Option<String>,
        capacity: u64,
    ) -> Result<i64> {
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let level = event_type.level();
        let timestamp = snoopd_common::model::now_millis();
        self.with_writer(move |conn| {
            conn.execute(
                "INSERT INTO interceptor_events (
                    seq, timestamp, event_type, level, interceptor, message,
                    request_id, request_url, request_method, error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    seq,
                    timestamp,
                    format!("{event_type:?}").to_lowercase(),
                    format!("{level:?}").to_lowercase(),
                    interceptor,
                    message,
                    request_id,
                    request_url,
                    request_method,
                    error,
                ],
            )?;
            conn.execute(
                "DELETE FROM interceptor_events WHERE seq <= (SELECT MAX(seq) FROM interceptor_events) - ?",
                [capacity as i64],
            )?;
            Ok(())
        })
        .await?;
        Ok(seq)
    }

    pub async fn get_interceptor_events(&self, filter: EventFilter) -> Result<Vec<InterceptorEvent>> {
        self.with_reader(move |conn| {
            let mut conditions = vec!["1 = 1".to_string()];
            let mut params: Vec<rusqlite::types::Value> = Vec::new();
            if let Some(after) = filter.after_seq {
                conditions.push("seq > ?".to_string());
                params.push(rusqlite::types::Value::Integer(after));
            }
            if let Some(level) = filter.level {
                conditions.push("level = ?".to_string());
                params.push(rusqlite::types::Value::Text(format!("{level:?}").to_lowercase()));
            }
            if let Some(name) = &filter.interceptor {
                conditions.push("interceptor = ?".to_string());
                params.push(rusqlite::types::Value::Text(name.clone()));
            }
            let limit = filter.limit.unwrap_or(1000) as i64;
            let sql = format!(
                "SELECT seq, timestamp, event_type, level, interceptor, message,
                        request_id, request_url, request_method, error
                 FROM interceptor_events WHERE {} ORDER BY seq ASC LIMIT ?",
                conditions.join(" AND ")
            );
            params.push(rusqlite::types::Value::Integer(limit));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params), row_to_event)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(SnoopdError::from)
        })
        .await
    }

    pub async fn clear_interceptor_events(&self) -> Result<u64> {
        self.with_writer(|conn| {
            let n = conn.execute("DELETE FROM interceptor_events", [])?;
            Ok(n as u64)
        })
        .await
    }
}

const SUMMARY_COLUMNS: &str = "id, session_id, timestamp, method, url, host, path, \
    response_status, duration_ms, intercepted_by, interception_type, replayed_from_id, saved, source";
const SUMMARY_COLUMN_COUNT: usize = 14;

const FULL_COLUMNS: &str = "id, session_id, timestamp, method, url, host, path, \
    request_headers, request_body, request_body_truncated, request_content_type, \
    response_status, response_headers, response_body, response_body_truncated, response_content_type, \
    duration_ms, intercepted_by, interception_type, replayed_from_id, replay_initiator, saved, source";

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        label: row.get(1)?,
        source: row.get(2)?,
        pid: row.get(3)?,
        started_at: row.get(4)?,
        token: row.get(5)?,
    })
}

fn row_to_summary(row: &Row) -> rusqlite::Result<RequestSummary> {
    let interception_type: Option<String> = row.get(10)?;
    Ok(RequestSummary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        timestamp: row.get(2)?,
        method: row.get(3)?,
        url: row.get(4)?,
        host: row.get(5)?,
        path: row.get(6)?,
        response_status: row.get(7)?,
        duration_ms: row.get(8)?,
        intercepted_by: row.get(9)?,
        interception_type: interception_type.as_deref().and_then(InterceptionType::from_str),
        replayed_from_id: row.get(11)?,
        saved: row.get::<_, i64>(12)? != 0,
        source: row.get(13)?,
    })
}

fn row_to_full(row: &Row) -> rusqlite::Result<CapturedRequest> {
    let request_headers: String = row.get(7)?;
    let response_headers: Option<String> = row.get(12)?;
    let interception_type: Option<String> = row.get(18)?;
    Ok(CapturedRequest {
        id: row.get(0)?,
        session_id: row.get(1)?,
        timestamp: row.get(2)?,
        method: row.get(3)?,
        url: row.get(4)?,
        host: row.get(5)?,
        path: row.get(6)?,
        request_headers: serde_json::from_str(&request_headers).unwrap_or_default(),
        request_body: row.get(8)?,
        request_body_truncated: row.get::<_, i64>(9)? != 0,
        request_content_type: row.get(10)?,
        response_status: row.get(11)?,
        response_headers: response_headers.and_then(|h| serde_json::from_str(&h).ok()),
        response_body: row.get(13)?,
        response_body_truncated: row.get::<_, i64>(14)? != 0,
        response_content_type: row.get(15)?,
        duration_ms: row.get(16)?,
        intercepted_by: row.get(17)?,
        interception_type: interception_type.as_deref().and_then(InterceptionType::from_str),
        replayed_from_id: row.get(19)?,
        replay_initiator: row.get(20)?,
        saved: row.get::<_, i64>(21)? != 0,
        source: row.get(22)?,
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<InterceptorEvent> {
    let event_type: String = row.get(2)?;
    let level: String = row.get(3)?;
    Ok(InterceptorEvent {
        seq: row.get(0)?,
        timestamp: row.get(1)?,
        event_type: parse_event_type(&event_type),
        level: parse_event_level(&level),
        interceptor: row.get(4)?,
        message: row.get(5)?,
        request_id: row.get(6)?,
        request_url: row.get(7)?,
        request_method: row.get(8)?,
        error: row.get(9)?,
    })
}

fn parse_event_type(s: &str) -> EventType {
    use EventType::*;
    match s {
        "matched" => Matched,
        "mocked" => Mocked,
        "modified" => Modified,
        "observed" => Observed,
        "loaded" => Loaded,
        "reload" => Reload,
        "userlog" | "user_log" => UserLog,
        "matchtimeout" | "match_timeout" => MatchTimeout,
        "invalidresponse" | "invalid_response" => InvalidResponse,
        "forwardaftercomplete" | "forward_after_complete" => ForwardAfterComplete,
        "matcherror" | "match_error" => MatchError,
        "handlererror" | "handler_error" => HandlerError,
        "handlertimeout" | "handler_timeout" => HandlerTimeout,
        _ => LoadError,
    }
}

fn parse_event_level(s: &str) -> snoopd_common::model::EventLevel {
    use snoopd_common::model::EventLevel::*;
    match s {
        "warn" => Warn,
        "error" => Error,
        _ => Info,
    }
}

fn body_contains(body: &Option<Vec<u8>>, ct: Option<&str>, needle: &str) -> bool {
    if !ct.map(content_type::is_text).unwrap_or(false) {
        return false;
    }
    match body {
        Some(bytes) => String::from_utf8_lossy(bytes).to_lowercase().contains(needle),
        None => false,
    }
}

fn json_body_matches(
    body: &Option<Vec<u8>>,
    ct: Option<&str>,
    json_path: &str,
    value: Option<&serde_json::Value>,
) -> bool {
    if !ct.map(content_type::is_json).unwrap_or(false) {
        return false;
    }
    let Some(bytes) = body else { return false };
    let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(bytes) else { return false };
    match jsonpath::get(&parsed, json_path) {
        Some(found) => value.map(|v| v == found).unwrap_or(true),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snoopd_common::model::{BodyTarget as BT, StatusRange};
    use tempfile::tempdir;

    fn core(session: &str, method: &str, url: &str, host: &str, path: &str) -> RequestCore {
        RequestCore {
            session_id: session.to_string(),
            timestamp: snoopd_common::model::now_millis(),
            method: method.to_string(),
            url: url.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            request_headers: Default::default(),
            request_body: None,
            request_body_truncated: false,
            request_content_type: None,
            replayed_from_id: None,
            replay_initiator: None,
            source: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("requests.db")).await.unwrap();
        let id = store
            .save_request(core("s1", "GET", "https://example.com/a", "example.com", "/a"))
            .await
            .unwrap();
        let full = store.get(&id).await.unwrap().unwrap();
        assert_eq!(full.method, "GET");
        assert!(full.response_status.is_none());
    }

    #[tokio::test]
    async fn update_response_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("requests.db")).await.unwrap();
        let id = store
            .save_request(core("s1", "GET", "https://example.com/a", "example.com", "/a"))
            .await
            .unwrap();

        let update = ResponseUpdate {
            status: 200,
            headers: Default::default(),
            body: Some(b"hello".to_vec()),
            body_truncated: false,
            content_type: Some("text/plain".to_string()),
            duration_ms: 5,
            intercepted_by: None,
            interception_type: None,
        };
        store.update_response(&id, update.clone()).await.unwrap();

        let mut second = update;
        second.status = 500;
        store.update_response(&id, second).await.unwrap();

        let full = store.get(&id).await.unwrap().unwrap();
        assert_eq!(full.response_status, Some(200));
    }

    #[tokio::test]
    async fn clear_preserves_saved_rows() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("requests.db")).await.unwrap();
        let keep = store
            .save_request(core("s1", "GET", "https://example.com/keep", "example.com", "/keep"))
            .await
            .unwrap();
        store
            .save_request(core("s1", "GET", "https://example.com/gone", "example.com", "/gone"))
            .await
            .unwrap();
        store.save(&keep).await.unwrap();

        let removed = store.clear().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&keep).await.unwrap().is_some());

        let remaining = store.count(RequestFilter::default()).await.unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn filter_by_method_and_status() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("requests.db")).await.unwrap();
        let get_id = store
            .save_request(core("s1", "GET", "https://example.com/a", "example.com", "/a"))
            .await
            .unwrap();
        let post_id = store
            .save_request(core("s1", "POST", "https://example.com/b", "example.com", "/b"))
            .await
            .unwrap();
        store
            .update_response(
                &get_id,
                ResponseUpdate {
                    status: 200,
                    headers: Default::default(),
                    body: None,
                    body_truncated: false,
                    content_type: None,
                    duration_ms: 1,
                    intercepted_by: None,
                    interception_type: None,
                },
            )
            .await
            .unwrap();
        store
            .update_response(
                &post_id,
                ResponseUpdate {
                    status: 404,
                    headers: Default::default(),
                    body: None,
                    body_truncated: false,
                    content_type: None,
                    duration_ms: 1,
                    intercepted_by: None,
                    interception_type: None,
                },
            )
            .await
            .unwrap();

        let mut filter = RequestFilter::default();
        filter.methods = vec!["GET".to_string()];
        let results = store.list_summaries(filter, 100, 0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, get_id);

        let mut status_filter = RequestFilter::default();
        status_filter.status_range = Some(StatusRange::Bucket(4));
        let results = store.list_summaries(status_filter, 100, 0).await.unwrap();
        assert_eq!(results[0].id, post_id);
    }

    #[tokio::test]
    async fn search_bodies_respects_content_type() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("requests.db")).await.unwrap();
        let id = store
            .save_request(core("s1", "GET", "https://example.com/a", "example.com", "/a"))
            .await
            .unwrap();
        store
            .update_response(
                &id,
                ResponseUpdate {
                    status: 200,
                    headers: Default::default(),
                    body: Some(b"needle in haystack".to_vec()),
                    body_truncated: false,
                    content_type: Some("text/plain".to_string()),
                    duration_ms: 1,
                    intercepted_by: None,
                    interception_type: None,
                },
            )
            .await
            .unwrap();

        let hits = store
            .search_bodies("needle".to_string(), BT::Response, RequestFilter::default(), 100, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn trim_drops_oldest_unsaved_rows() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("requests.db")).await.unwrap();
        for i in 0..5 {
            store
                .save_request(core("s1", "GET", &format!("https://example.com/{i}"), "example.com", "/x"))
                .await
                .unwrap();
        }
        let trimmed = store.trim(2).await.unwrap();
        assert_eq!(trimmed, 3);
        assert_eq!(store.count(RequestFilter::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn event_seq_is_monotonic_and_capped() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("requests.db")).await.unwrap();
        let mut last = 0;
        for _ in 0..10 {
            let seq = store
                .append_event(EventType::Matched, Some("x".into()), "m".into(), None, None, None, None, 5)
                .await
                .unwrap();
            assert!(seq > last);
            last = seq;
        }
        let events = store.get_interceptor_events(EventFilter::default()).await.unwrap();
        assert!(events.len() <= 5);
    }
}
