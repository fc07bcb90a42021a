use std::os::unix::io::RawFd;

use crate::error::ChannelResult;

/// An OS-level wakeable object, readable when signalled.
///
/// This is purely an interface boundary with a host event loop: the core only ever calls
/// `set`/`clear`/`readable_fd` on it and never waits on it itself. `set` and `clear` must be
/// idempotent; calling either when already in that state is a no-op from the caller's
/// perspective.
pub trait WaitHandle: Send + Sync {
    fn set(&self);
    fn clear(&self);
    fn readable_fd(&self) -> RawFd;
}

/// `eventfd`-backed [`WaitHandle`].
///
/// Signalling writes the value `1` to the counter; any nonzero counter value makes the fd
/// readable, so repeated `set` calls collapse into the same observable state. Clearing reads
/// the counter back to zero, which is likewise safe to call on an already-cleared handle
/// (`read` just returns `EAGAIN`, which is ignored).
pub struct EventWake {
    fd: RawFd,
}

impl EventWake {
    pub fn new() -> ChannelResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self { fd })
    }
}

impl WaitHandle for EventWake {
    fn set(&self) {
        let one: u64 = 1;
        let ret = unsafe { libc::write(self.fd, &one as *const u64 as *const libc::c_void, 8) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                warn!(?err, "eventfd write failed");
            }
        }
    }

    fn clear(&self) {
        let mut buf: u64 = 0;
        let ret = unsafe { libc::read(self.fd, &mut buf as *mut u64 as *mut libc::c_void, 8) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                warn!(?err, "eventfd read failed");
            }
        }
    }

    fn readable_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for EventWake {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
