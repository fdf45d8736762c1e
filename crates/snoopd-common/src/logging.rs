//! Structured logging setup (spec §4.9): JSON-per-line to `procsi.log`, with a
//! human-readable mirror on stderr when attached to a terminal.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. Returns a guard that must be
/// held for the lifetime of the process — dropping it stops the background
/// writer thread and log lines may be lost.
pub fn init(log_file: &Path, default_level: &str) -> std::io::Result<WorkerGuard> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_env("SNOOPD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(false)
        .with_span_list(false);

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .ok();

    Ok(guard)
}

/// Rotates `log_file` to `log_file.1` (overwriting any previous rotation) once
/// it exceeds `max_size` bytes. Called periodically by the Supervisor.
pub fn rotate_if_needed(log_file: &Path, max_size: u64) -> std::io::Result<bool> {
    let meta = match std::fs::metadata(log_file) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.len() <= max_size {
        return Ok(false);
    }
    let rotated = log_file.with_extension(match log_file.extension() {
        Some(ext) => format!("{}.1", ext.to_string_lossy()),
        None => "1".to_string(),
    });
    std::fs::rename(log_file, rotated)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn rotates_once_over_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("procsi.log");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![0u8; 100]).unwrap();
        drop(f);

        assert!(!rotate_if_needed(&path, 1000).unwrap());
        assert!(rotate_if_needed(&path, 50).unwrap());
        assert!(!path.exists());
        assert!(path.with_extension("log.1").exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.log");
        assert!(!rotate_if_needed(&path, 10).unwrap());
    }
}
