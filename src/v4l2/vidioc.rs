//! ioctl request codes for the calls a capture session issues

use std::mem::size_of;
use std::os::raw::c_int;

use crate::v4l2::videodev::*;

#[cfg(not(target_env = "musl"))]
#[allow(non_camel_case_types)]
pub type _IOC_TYPE = std::os::raw::c_ulong;
#[cfg(target_env = "musl")]
#[allow(non_camel_case_types)]
pub type _IOC_TYPE = std::os::raw::c_int;

// linux ioctl.h: | dir:2 | size:14 | type:8 | nr:8 |
const NR_SHIFT: u32 = 0;
const TYPE_SHIFT: u32 = 8;
const SIZE_SHIFT: u32 = 16;
const DIR_SHIFT: u32 = 30;

const WRITE: u32 = 1;
const READ: u32 = 2;

const fn request(dir: u32, nr: u32, size: usize) -> _IOC_TYPE {
    ((dir << DIR_SHIFT)
        | ((b'V' as u32) << TYPE_SHIFT)
        | (nr << NR_SHIFT)
        | ((size as u32) << SIZE_SHIFT)) as _IOC_TYPE
}

const fn ior<T>(nr: u32) -> _IOC_TYPE {
    request(READ, nr, size_of::<T>())
}

const fn iow<T>(nr: u32) -> _IOC_TYPE {
    request(WRITE, nr, size_of::<T>())
}

const fn iowr<T>(nr: u32) -> _IOC_TYPE {
    request(READ | WRITE, nr, size_of::<T>())
}

pub const VIDIOC_QUERYCAP: _IOC_TYPE = ior::<v4l2_capability>(0);
pub const VIDIOC_ENUM_FMT: _IOC_TYPE = iowr::<v4l2_fmtdesc>(2);
pub const VIDIOC_G_FMT: _IOC_TYPE = iowr::<v4l2_format>(4);
pub const VIDIOC_S_FMT: _IOC_TYPE = iowr::<v4l2_format>(5);
pub const VIDIOC_REQBUFS: _IOC_TYPE = iowr::<v4l2_requestbuffers>(8);
pub const VIDIOC_QUERYBUF: _IOC_TYPE = iowr::<v4l2_buffer>(9);
pub const VIDIOC_QBUF: _IOC_TYPE = iowr::<v4l2_buffer>(15);
pub const VIDIOC_DQBUF: _IOC_TYPE = iowr::<v4l2_buffer>(17);
pub const VIDIOC_STREAMON: _IOC_TYPE = iow::<c_int>(18);
pub const VIDIOC_STREAMOFF: _IOC_TYPE = iow::<c_int>(19);
pub const VIDIOC_S_INPUT: _IOC_TYPE = iowr::<c_int>(39);
pub const VIDIOC_ENUM_FRAMESIZES: _IOC_TYPE = iowr::<v4l2_frmsizeenum>(74);
