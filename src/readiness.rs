//! Synchronous readiness wait over raw file descriptors (`poll(2)`)

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// One descriptor to watch for input readiness. A negative fd is ignored by
/// the kernel and never reported ready.
#[derive(Debug, Clone, Copy)]
pub struct Watch {
    pub fd: RawFd,
    pub ready: bool,
}

impl Watch {
    pub fn new(fd: RawFd) -> Self {
        Self { fd, ready: false }
    }

    pub fn disabled() -> Self {
        Self::new(-1)
    }
}

/// Blocks until one of `watches` is readable or `timeout` elapses.
///
/// Returns the number of ready descriptors (0 on timeout) and updates each
/// watch's `ready` flag. An interrupting signal surfaces as
/// `io::ErrorKind::Interrupted`.
pub fn wait_readable(watches: &mut [Watch], timeout: Duration) -> io::Result<usize> {
    let mut fds: Vec<libc::pollfd> = watches
        .iter()
        .map(|w| libc::pollfd {
            fd: w.fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    // SAFETY: `fds` is a live, correctly sized array of pollfd for the call.
    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    for (watch, pfd) in watches.iter_mut().zip(fds.iter()) {
        // POLLERR/POLLHUP also mean a read will not block
        watch.ready = pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0;
    }

    Ok(ret as usize)
}
