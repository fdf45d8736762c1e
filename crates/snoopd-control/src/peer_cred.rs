use std::os::unix::io::AsRawFd;

use tokio::net::UnixStream;

/// Reads the connecting peer's UID via `SO_PEERCRED`, the mechanism the
/// same-uid check for `replay_request` relies on (spec §4.6/§9).
pub fn peer_uid(stream: &UnixStream) -> std::io::Result<u32> {
    let fd = stream.as_raw_fd();
    let mut cred = libc::ucred { pid: 0, uid: 0, gid: 0 };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };

    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(cred.uid)
}

pub fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}
