use std::os::unix::io::RawFd;
use std::{io, mem, ptr, time};

#[derive(Clone, Copy)]
pub struct FdSet(libc::fd_set);

impl FdSet {
    pub fn new() -> FdSet {
        unsafe {
            let mut raw_fd_set = mem::MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(raw_fd_set.as_mut_ptr());
            FdSet(raw_fd_set.assume_init())
        }
    }

    pub fn set(&mut self, fd: RawFd) {
        unsafe {
            libc::FD_SET(fd, &mut self.0);
        }
    }

    pub fn is_set(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }
}

impl Default for FdSet {
    fn default() -> Self {
        Self::new()
    }
}

pub fn make_timespec(duration: time::Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

/// Blocks until `fd` becomes readable or `timeout` elapses.
///
/// Returns `Ok(true)` when the descriptor is readable and `Ok(false)` on timeout. Any failure of
/// the underlying `pselect(2)`, including `EINTR`, is returned as an error so callers can tell
/// the three outcomes apart.
pub fn wait_readable(fd: RawFd, timeout: time::Duration) -> io::Result<bool> {
    if fd < 0 || fd >= libc::FD_SETSIZE as RawFd {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("fd {} out of range for pselect", fd),
        ));
    }

    let mut readfds = FdSet::new();
    readfds.set(fd);
    let ts = make_timespec(timeout);

    let ret = unsafe {
        libc::pselect(
            fd + 1,
            &mut readfds.0,
            ptr::null_mut(),
            ptr::null_mut(),
            &ts,
            ptr::null(),
        )
    };

    match ret {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(readfds.is_set(fd)),
    }
}
