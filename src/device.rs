use std::os::raw::{c_int, c_void};
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::time::Duration;
use std::{io, mem};

use log::{trace, warn};

use crate::buffer::{Dequeued, Layout, Metadata, PlaneLayout, Type};
use crate::capability::Capabilities;
use crate::format::{Description as FormatDescription, Format};
use crate::fourcc::FourCC;
use crate::framesize::FrameSize;
use crate::pselect;
use crate::v4l2;
use crate::v4l2::videodev::*;

/// Control surface of a video capture device
///
/// This is everything a [`Session`](crate::Session) needs from the driver: capability and
/// format queries, the mmap buffer pool protocol and a readiness wait. [`Handle`] implements it
/// with ioctls on a device node. Every method maps to exactly one driver request; retrying
/// transient failures is left to the caller (see [`retry`]).
pub trait Device {
    /// VIDIOC_QUERYCAP
    fn query_caps(&self) -> io::Result<Capabilities>;

    /// Pixel formats offered for buffers of type `typ` (VIDIOC_ENUM_FMT)
    fn enum_formats(&self, typ: Type) -> io::Result<Vec<FormatDescription>>;

    /// Resolutions offered for `fourcc` (VIDIOC_ENUM_FRAMESIZES)
    fn enum_framesizes(&self, fourcc: FourCC) -> io::Result<Vec<FrameSize>>;

    /// VIDIOC_S_INPUT
    fn set_input(&self, index: u32) -> io::Result<()>;

    /// Applies `fmt` and returns what the driver wrote back (VIDIOC_S_FMT)
    fn set_format(&self, typ: Type, fmt: &Format) -> io::Result<Format>;

    /// VIDIOC_G_FMT
    fn format(&self, typ: Type) -> io::Result<Format>;

    /// Requests `count` mmap buffers and returns the count the driver granted (VIDIOC_REQBUFS)
    ///
    /// A count of zero frees the pool.
    fn request_buffers(&self, typ: Type, count: u32) -> io::Result<u32>;

    /// Plane offsets and lengths of buffer `index` (VIDIOC_QUERYBUF)
    fn query_buffer(&self, typ: Type, index: u32, planes: usize) -> io::Result<Layout>;

    /// Maps `length` bytes of buffer memory at `offset` into the process
    fn map(&self, offset: u32, length: usize) -> io::Result<NonNull<u8>>;

    /// Unmaps a region returned by [`Device::map`]
    ///
    /// # Safety
    ///
    /// `ptr` and `length` must describe a live mapping created by this device, and nothing may
    /// reference the region afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, length: usize) -> io::Result<()>;

    /// Hands buffer `index` to the driver (VIDIOC_QBUF)
    fn queue(&self, typ: Type, index: u32, planes: usize) -> io::Result<()>;

    /// Takes a filled buffer back from the driver (VIDIOC_DQBUF)
    fn dequeue(&self, typ: Type, planes: usize) -> io::Result<Dequeued>;

    /// VIDIOC_STREAMON
    fn stream_on(&self, typ: Type) -> io::Result<()>;

    /// VIDIOC_STREAMOFF
    ///
    /// The driver returns all queued buffers to the application.
    fn stream_off(&self, typ: Type) -> io::Result<()>;

    /// Blocks until a buffer can be dequeued; `Ok(false)` means the timeout elapsed
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Releases the device
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Devices that can be opened by path
pub trait Open: Device + Sized {
    fn open(path: &Path) -> io::Result<Self>;
}

/// Number of extra attempts for a control call failing with a transient error
pub const RETRIES: u32 = 4;

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::ETIMEDOUT)
    ) || matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Runs a control call, retrying it up to [`RETRIES`] times while it fails with `EINTR`,
/// `EAGAIN` or `ETIMEDOUT`
///
/// Any other error is returned right away. Once the retries are used up the last error is
/// returned as is.
pub fn retry<T, F>(what: &str, mut call: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut attempt = 0;
    loop {
        match call() {
            Err(e) if is_transient(&e) => {
                if attempt == RETRIES {
                    warn!("{} retried {} times - giving up: {}", what, RETRIES, e);
                    return Err(e);
                }
                attempt += 1;
                trace!("{} interrupted ({}), attempt {}", what, e, attempt);
            }
            res => return res,
        }
    }
}

/// Device node handle
///
/// The file descriptor is closed on drop unless [`Device::close`] was called already.
#[derive(Debug)]
pub struct Handle {
    fd: RawFd,
}

impl Handle {
    /// Opens the node at `path` for reading and writing
    ///
    /// # Example
    ///
    /// ```no_run
    /// use v4l_capture::device::Handle;
    ///
    /// let handle = Handle::open("/dev/video0");
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let fd = v4l2::open(path, libc::O_RDWR)?;
        Ok(Handle { fd })
    }

    /// Returns the raw file descriptor
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn ioctl<T>(&self, request: v4l2::vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        unsafe { v4l2::ioctl(self.fd, request, arg as *mut T as *mut c_void) }
    }

    fn buffer_desc(typ: Type, index: u32) -> v4l2_buffer {
        v4l2_buffer {
            index,
            type_: typ as u32,
            memory: V4L2_MEMORY_MMAP,
            ..unsafe { mem::zeroed() }
        }
    }

    fn plane_array() -> [v4l2_plane; VIDEO_MAX_PLANES] {
        unsafe { mem::zeroed() }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = v4l2::close(self.fd) {
            warn!("failed to close fd {}: {}", self.fd, e);
        }
    }
}

impl Open for Handle {
    fn open(path: &Path) -> io::Result<Self> {
        Handle::open(path)
    }
}

impl Device for Handle {
    fn query_caps(&self) -> io::Result<Capabilities> {
        let mut v4l2_caps: v4l2_capability = unsafe { mem::zeroed() };
        self.ioctl(v4l2::vidioc::VIDIOC_QUERYCAP, &mut v4l2_caps)?;
        Ok(Capabilities::from(v4l2_caps))
    }

    fn enum_formats(&self, typ: Type) -> io::Result<Vec<FormatDescription>> {
        let mut formats = Vec::new();
        let mut v4l2_fmt = v4l2_fmtdesc {
            index: 0,
            type_: typ as u32,
            ..unsafe { mem::zeroed() }
        };

        loop {
            match self.ioctl(v4l2::vidioc::VIDIOC_ENUM_FMT, &mut v4l2_fmt) {
                Ok(()) => {
                    formats.push(FormatDescription::from(v4l2_fmt));
                    v4l2_fmt.index += 1;
                    v4l2_fmt.description = [0; 32];
                }
                // EINVAL marks the end of the list
                Err(e) if e.raw_os_error() == Some(libc::EINVAL) => return Ok(formats),
                Err(e) => return Err(e),
            }
        }
    }

    fn enum_framesizes(&self, fourcc: FourCC) -> io::Result<Vec<FrameSize>> {
        let mut framesizes = Vec::new();
        let mut v4l2_struct = v4l2_frmsizeenum {
            index: 0,
            pixel_format: fourcc.into(),
            ..unsafe { mem::zeroed() }
        };

        loop {
            if let Err(e) = self.ioctl(v4l2::vidioc::VIDIOC_ENUM_FRAMESIZES, &mut v4l2_struct) {
                if v4l2_struct.index == 0 {
                    return Err(e);
                } else {
                    return Ok(framesizes);
                }
            }

            match FrameSize::try_from(v4l2_struct) {
                Ok(frame_size) => framesizes.push(frame_size),
                Err(e) => warn!("skipping frame size {}: {}", v4l2_struct.index, e),
            }

            v4l2_struct.index += 1;
        }
    }

    fn set_input(&self, index: u32) -> io::Result<()> {
        let mut input = index as c_int;
        self.ioctl(v4l2::vidioc::VIDIOC_S_INPUT, &mut input)
    }

    fn set_format(&self, typ: Type, fmt: &Format) -> io::Result<Format> {
        let mut v4l2_fmt = fmt.to_raw(typ);
        self.ioctl(v4l2::vidioc::VIDIOC_S_FMT, &mut v4l2_fmt)?;
        Ok(Format::from_raw(&v4l2_fmt, typ))
    }

    fn format(&self, typ: Type) -> io::Result<Format> {
        let mut v4l2_fmt = v4l2_format {
            type_: typ as u32,
            ..unsafe { mem::zeroed() }
        };
        self.ioctl(v4l2::vidioc::VIDIOC_G_FMT, &mut v4l2_fmt)?;
        Ok(Format::from_raw(&v4l2_fmt, typ))
    }

    fn request_buffers(&self, typ: Type, count: u32) -> io::Result<u32> {
        let mut v4l2_reqbufs = v4l2_requestbuffers {
            count,
            type_: typ as u32,
            memory: V4L2_MEMORY_MMAP,
            ..unsafe { mem::zeroed() }
        };
        self.ioctl(v4l2::vidioc::VIDIOC_REQBUFS, &mut v4l2_reqbufs)?;
        Ok(v4l2_reqbufs.count)
    }

    fn query_buffer(&self, typ: Type, index: u32, planes: usize) -> io::Result<Layout> {
        let mut v4l2_buf = Self::buffer_desc(typ, index);

        if typ.is_multiplanar() {
            let mut v4l2_planes = Self::plane_array();
            v4l2_buf.length = planes.min(VIDEO_MAX_PLANES) as u32;
            v4l2_buf.m.planes = v4l2_planes.as_mut_ptr();
            self.ioctl(v4l2::vidioc::VIDIOC_QUERYBUF, &mut v4l2_buf)?;

            let layout = v4l2_planes[..v4l2_buf.length as usize]
                .iter()
                .map(|plane| PlaneLayout {
                    offset: unsafe { plane.m.mem_offset },
                    length: plane.length,
                })
                .collect();
            Ok(Layout::MultiPlane(layout))
        } else {
            self.ioctl(v4l2::vidioc::VIDIOC_QUERYBUF, &mut v4l2_buf)?;
            Ok(Layout::SinglePlane(PlaneLayout {
                offset: unsafe { v4l2_buf.m.offset },
                length: v4l2_buf.length,
            }))
        }
    }

    fn map(&self, offset: u32, length: usize) -> io::Result<NonNull<u8>> {
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                offset as libc::off_t,
            )?
        };
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned NULL"))
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, length: usize) -> io::Result<()> {
        v4l2::munmap(ptr.as_ptr() as *mut c_void, length)
    }

    fn queue(&self, typ: Type, index: u32, planes: usize) -> io::Result<()> {
        let mut v4l2_buf = Self::buffer_desc(typ, index);

        if typ.is_multiplanar() {
            let mut v4l2_planes = Self::plane_array();
            v4l2_buf.length = planes.min(VIDEO_MAX_PLANES) as u32;
            v4l2_buf.m.planes = v4l2_planes.as_mut_ptr();
            self.ioctl(v4l2::vidioc::VIDIOC_QBUF, &mut v4l2_buf)
        } else {
            self.ioctl(v4l2::vidioc::VIDIOC_QBUF, &mut v4l2_buf)
        }
    }

    fn dequeue(&self, typ: Type, planes: usize) -> io::Result<Dequeued> {
        let mut v4l2_buf = Self::buffer_desc(typ, 0);
        let mut v4l2_planes = Self::plane_array();

        let plane_bytes = if typ.is_multiplanar() {
            v4l2_buf.length = planes.min(VIDEO_MAX_PLANES) as u32;
            v4l2_buf.m.planes = v4l2_planes.as_mut_ptr();
            self.ioctl(v4l2::vidioc::VIDIOC_DQBUF, &mut v4l2_buf)?;
            v4l2_planes[..v4l2_buf.length as usize]
                .iter()
                .map(|plane| plane.bytesused)
                .collect::<Vec<_>>()
        } else {
            self.ioctl(v4l2::vidioc::VIDIOC_DQBUF, &mut v4l2_buf)?;
            vec![v4l2_buf.bytesused]
        };

        Ok(Dequeued {
            index: v4l2_buf.index,
            meta: Metadata {
                bytesused: plane_bytes.first().copied().unwrap_or(0),
                flags: v4l2_buf.flags.into(),
                field: v4l2_buf.field,
                timestamp: v4l2_buf.timestamp.into(),
                sequence: v4l2_buf.sequence,
            },
            planes: plane_bytes,
        })
    }

    fn stream_on(&self, typ: Type) -> io::Result<()> {
        let mut typ = typ as c_int;
        self.ioctl(v4l2::vidioc::VIDIOC_STREAMON, &mut typ)
    }

    fn stream_off(&self, typ: Type) -> io::Result<()> {
        let mut typ = typ as c_int;
        self.ioctl(v4l2::vidioc::VIDIOC_STREAMOFF, &mut typ)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        pselect::wait_readable(self.fd, timeout)
    }

    fn close(self) -> io::Result<()> {
        let fd = self.fd;
        mem::forget(self);
        v4l2::close(fd)
    }
}
