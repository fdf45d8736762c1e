use std::path::Path;

use snoopd_common::{Result, SnoopdError};
use tokio::net::TcpListener;

/// Binds the proxy's loopback listener, preferring the port recorded in
/// `preferred.port` (left over from a previous run of this project) before
/// falling back to an OS-assigned ephemeral port (spec §4.5/§6).
pub async fn bind(preferred_port_file: &Path) -> Result<TcpListener> {
    if let Some(port) = read_preferred_port(preferred_port_file) {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await {
            return Ok(listener);
        }
        // Preferred port is taken or otherwise unavailable; fall through.
    }
    TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| SnoopdError::ProxyProtocol(format!("failed to bind proxy listener: {e}")))
}

fn read_preferred_port(path: &Path) -> Option<u16> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Atomically publishes the bound port so other processes (the control
/// server, CLI clients) can discover it without racing a partial read.
pub fn write_port_file(path: &Path, port: u16) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, port.to_string())?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Persists the bound port as the next run's preferred port, so a daemon
/// restart tends to keep client-visible proxy settings stable.
pub fn write_preferred_port(path: &Path, port: u16) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, port.to_string())?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn binds_ephemeral_port_without_preference() {
        let dir = tempdir().unwrap();
        let listener = bind(&dir.path().join("preferred.port")).await.unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn prefers_previously_written_port_when_free() {
        let dir = tempdir().unwrap();
        let probe = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let pref = dir.path().join("preferred.port");
        std::fs::write(&pref, port.to_string()).unwrap();

        let listener = bind(&pref).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[test]
    fn write_port_file_is_atomic_and_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proxy.port");
        write_port_file(&path, 4123).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4123");
    }
}
