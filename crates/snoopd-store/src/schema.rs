use rusqlite::Connection;
use snoopd_common::Result;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            label TEXT,
            source TEXT,
            pid INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            token TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            host TEXT NOT NULL,
            path TEXT NOT NULL,
            request_headers TEXT NOT NULL,
            request_body BLOB,
            request_body_truncated INTEGER NOT NULL DEFAULT 0,
            request_content_type TEXT,
            response_status INTEGER,
            response_headers TEXT,
            response_body BLOB,
            response_body_truncated INTEGER NOT NULL DEFAULT 0,
            response_content_type TEXT,
            duration_ms INTEGER,
            intercepted_by TEXT,
            interception_type TEXT,
            replayed_from_id TEXT,
            replay_initiator TEXT,
            saved INTEGER NOT NULL DEFAULT 0,
            source TEXT,
            responded INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests (timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_requests_session ON requests (session_id);
        CREATE INDEX IF NOT EXISTS idx_requests_saved ON requests (saved);
        CREATE INDEX IF NOT EXISTS idx_requests_host ON requests (host);

        CREATE TABLE IF NOT EXISTS interceptor_events (
            seq INTEGER PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            level TEXT NOT NULL,
            interceptor TEXT,
            message TEXT NOT NULL,
            request_id TEXT,
            request_url TEXT,
            request_method TEXT,
            error TEXT
        );
        ",
    )?;
    Ok(())
}
