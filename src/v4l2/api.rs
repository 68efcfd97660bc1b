use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::{io, path::Path};

use crate::v4l2::vidioc;

/// Maps the `-1` failure return of a libc call to the current errno
fn check(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Opens a device node and returns its file descriptor
///
/// `O_CLOEXEC` is always added to `flags`.
///
/// # Example
///
/// ```no_run
/// use v4l_capture::v4l2;
///
/// let fd = v4l2::open("/dev/video0", libc::O_RDWR);
/// ```
pub fn open<P: AsRef<Path>>(path: P, flags: c_int) -> io::Result<c_int> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    check(unsafe { libc::open(c_path.as_ptr(), flags | libc::O_CLOEXEC) })
}

/// Closes a file descriptor returned by [`open`]
pub fn close(fd: c_int) -> io::Result<()> {
    check(unsafe { libc::close(fd) }).map(drop)
}

/// Issues a single ioctl on `fd`
///
/// No retry happens at this level; see [`crate::device::retry`] for the transient error policy.
///
/// # Safety
///
/// `argp` must point to a live, properly initialized value of the type `request` expects.
pub unsafe fn ioctl(fd: c_int, request: vidioc::_IOC_TYPE, argp: *mut c_void) -> io::Result<()> {
    // libc declares ioctl() with a different request type per platform, the raw syscall
    // takes the same arguments everywhere
    let ret = libc::syscall(libc::SYS_ioctl, fd, request, argp) as c_int;
    check(ret).map(drop)
}

/// Maps `length` bytes of device memory at `offset` into the process
///
/// # Safety
///
/// `start` is only a hint but must not overlap memory the caller relies on when combined with
/// `MAP_FIXED`.
pub unsafe fn mmap(
    start: *mut c_void,
    length: usize,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: libc::off_t,
) -> io::Result<*mut c_void> {
    let ptr = libc::mmap(start, length, prot, flags, fd, offset);
    if ptr == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr)
    }
}

/// Unmaps a region returned by [`mmap`]
///
/// # Safety
///
/// `start` and `length` must describe exactly one live mapping, and no references into it may
/// outlive this call.
pub unsafe fn munmap(start: *mut c_void, length: usize) -> io::Result<()> {
    check(libc::munmap(start, length)).map(drop)
}
