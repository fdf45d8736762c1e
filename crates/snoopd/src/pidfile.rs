//! Exclusive PID-file locking so only one daemon runs per project (spec §4.7 step 1).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use snoopd_common::error::StartupFailure;

/// Holds the lock for the lifetime of the daemon; dropping it releases the
/// advisory lock, and the file itself is removed on clean shutdown.
pub struct PidLock {
    file: File,
}

impl PidLock {
    pub fn acquire(pid_path: &Path) -> Result<Self, StartupFailure> {
        if let Some(parent) = pid_path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StartupFailure::StoreUnavailable)?;
        }
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(pid_path)
            .map_err(|_| StartupFailure::AlreadyRunning)?;

        file.try_lock_exclusive().map_err(|_| StartupFailure::AlreadyRunning)?;

        let mut file = file;
        file.set_len(0).map_err(|_| StartupFailure::AlreadyRunning)?;
        writeln!(file, "{}", std::process::id()).map_err(|_| StartupFailure::AlreadyRunning)?;

        Ok(Self { file })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
