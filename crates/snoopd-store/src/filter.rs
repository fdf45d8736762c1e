use rusqlite::types::Value;
use snoopd_common::model::{HeaderTarget, RequestFilter, StatusRange};

/// A parameterized `WHERE` fragment (without the leading `WHERE`) plus its
/// bound values, built from every `RequestFilter` field except `regex`
/// (applied in Rust after the SQL pass, since SQLite has no regex built in).
pub struct Clause {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn build(filter: &RequestFilter) -> Clause {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if !filter.methods.is_empty() {
        let placeholders = vec!["?"; filter.methods.len()].join(", ");
        conditions.push(format!("UPPER(method) IN ({placeholders})"));
        for m in &filter.methods {
            params.push(Value::Text(m.to_uppercase()));
        }
    }

    if let Some(status_range) = filter.status_range {
        match status_range {
            StatusRange::Exact(code) => {
                conditions.push("response_status = ?".to_string());
                params.push(Value::Integer(code as i64));
            }
            StatusRange::Bucket(bucket) => {
                conditions.push("response_status / 100 = ?".to_string());
                params.push(Value::Integer(bucket as i64));
            }
            StatusRange::Range(lo, hi) => {
                conditions.push("response_status BETWEEN ? AND ?".to_string());
                params.push(Value::Integer(lo as i64));
                params.push(Value::Integer(hi as i64));
            }
        }
    }

    if let Some(search) = &filter.search {
        conditions.push("LOWER(url) LIKE '%' || LOWER(?) || '%'".to_string());
        params.push(Value::Text(search.clone()));
    }

    if let Some(host) = &filter.host {
        if let Some(suffix) = host.strip_prefix('.') {
            conditions.push("(host = ? OR host LIKE '%' || ?)".to_string());
            params.push(Value::Text(suffix.to_string()));
            params.push(Value::Text(host.clone()));
        } else {
            conditions.push("host = ?".to_string());
            params.push(Value::Text(host.clone()));
        }
    }

    if let Some(prefix) = &filter.path_prefix {
        conditions.push("path LIKE ? || '%'".to_string());
        params.push(Value::Text(prefix.clone()));
    }

    if let Some(since) = filter.since {
        conditions.push("timestamp >= ?".to_string());
        params.push(Value::Integer(since));
    }

    if let Some(before) = filter.before {
        conditions.push("timestamp < ?".to_string());
        params.push(Value::Integer(before));
    }

    if let Some(name) = &filter.header_name {
        let path = format!("$.\"{}\"", name.to_lowercase().replace('"', ""));
        let target = filter.header_target.unwrap_or(HeaderTarget::Both);
        let mut side = |column: &str, conditions: &mut Vec<String>, params: &mut Vec<Value>| {
            if let Some(value) = &filter.header_value {
                conditions.push(format!(
                    "LOWER(json_extract({column}, ?)) = LOWER(?)"
                ));
                params.push(Value::Text(path.clone()));
                params.push(Value::Text(value.clone()));
            } else {
                conditions.push(format!("json_extract({column}, ?) IS NOT NULL"));
                params.push(Value::Text(path.clone()));
            }
        };
        match target {
            HeaderTarget::Request => side("request_headers", &mut conditions, &mut params),
            HeaderTarget::Response => side("response_headers", &mut conditions, &mut params),
            HeaderTarget::Both => {
                let mut sub_conditions = Vec::new();
                let mut sub_params = Vec::new();
                side("request_headers", &mut sub_conditions, &mut sub_params);
                let request_cond = sub_conditions.pop().unwrap();
                side("response_headers", &mut sub_conditions, &mut sub_params);
                let response_cond = sub_conditions.pop().unwrap();
                conditions.push(format!("({request_cond} OR {response_cond})"));
                params.extend(sub_params);
            }
        }
    }

    if let Some(name) = &filter.intercepted_by {
        conditions.push("intercepted_by = ?".to_string());
        params.push(Value::Text(name.clone()));
    }

    if let Some(saved) = filter.saved {
        conditions.push("saved = ?".to_string());
        params.push(Value::Integer(if saved { 1 } else { 0 }));
    }

    if let Some(source) = &filter.source {
        conditions.push("source = ?".to_string());
        params.push(Value::Text(source.clone()));
    }

    let sql = if conditions.is_empty() {
        "1 = 1".to_string()
    } else {
        conditions.join(" AND ")
    };

    Clause { sql, params }
}
