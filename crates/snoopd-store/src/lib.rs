//! # snoopd-store
//!
//! Embedded relational store for sessions, captured requests and the
//! interceptor event log (spec §4.3). Backed by `rusqlite` (bundled SQLite)
//! in WAL mode with `synchronous = NORMAL`.

mod connection;
mod filter;
mod jsonpath;
mod regex_guard;
mod schema;
mod store;

pub use regex_guard::validate_regex;
pub use store::Store;
