use bitflags::bitflags;
use std::fmt;

use crate::timestamp::Timestamp;
use crate::v4l2::videodev::{V4L2_BUF_TYPE_VIDEO_CAPTURE, V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE};

/// Buffer type
///
/// Selected once when a device is opened: single-planar capture devices exchange
/// [`Type::VideoCapture`] buffers, multi-planar ones [`Type::VideoCaptureMplane`] buffers.
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    VideoCapture        = V4L2_BUF_TYPE_VIDEO_CAPTURE,
    VideoCaptureMplane  = V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
}

impl Type {
    pub fn is_multiplanar(self) -> bool {
        self == Type::VideoCaptureMplane
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::VideoCapture => write!(f, "video capture"),
            Type::VideoCaptureMplane => write!(f, "video capture (multi-planar)"),
        }
    }
}

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        /// Buffer is mapped
        const MAPPED                = 0x00000001;
        /// Buffer is queued for processing
        const QUEUED                = 0x00000002;
        /// Buffer is ready
        const DONE                  = 0x00000004;
        /// Image is a keyframe (I-frame)
        const KEYFRAME              = 0x00000008;
        /// Image is a P-frame
        const PFRAME                = 0x00000010;
        /// Image is a B-frame
        const BFRAME                = 0x00000020;
        /// Buffer is ready, but the data contained within is corrupted
        const ERROR                 = 0x00000040;
        /// Buffer is added to an unqueued request
        const IN_REQUEST            = 0x00000080;
        /// Timecode field is valid
        const TIMECODE              = 0x00000100;
        /// Buffer is prepared for queuing
        const PREPARED              = 0x00000400;
        /// Timestamp type
        const TIMESTAMP_MONOTONIC   = 0x00002000;
        const TIMESTAMP_COPY        = 0x00004000;
        /// Timestamp taken at start of exposure
        const TSTAMP_SRC_SOE        = 0x00010000;
        /// Last buffer produced by the hardware
        const LAST                  = 0x00100000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl From<Flags> for u32 {
    fn from(flags: Flags) -> Self {
        flags.bits()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Location of one plane inside the device's buffer memory, as reported by VIDIOC_QUERYBUF
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Offset to pass to mmap
    pub offset: u32,
    /// Length of the plane in bytes
    pub length: u32,
}

/// Memory layout of one device buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    SinglePlane(PlaneLayout),
    MultiPlane(Vec<PlaneLayout>),
}

impl Layout {
    pub fn planes(&self) -> &[PlaneLayout] {
        match self {
            Layout::SinglePlane(plane) => std::slice::from_ref(plane),
            Layout::MultiPlane(planes) => planes,
        }
    }
}

/// Buffer metadata, filled in by the driver on dequeue
#[derive(Debug, Copy, Clone, Default)]
pub struct Metadata {
    /// Number of bytes occupied by data (plane 0 for multi-planar buffers)
    pub bytesused: u32,
    /// Buffer flags
    pub flags: Flags,
    /// Field order of the image
    pub field: u32,
    /// Time of capture (usually set by the driver)
    pub timestamp: Timestamp,
    /// Sequence number, counting the frames
    pub sequence: u32,
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq {} at {} ({} bytes, {})",
            self.sequence, self.timestamp, self.bytesused, self.flags
        )
    }
}

/// A buffer handed back by the driver through VIDIOC_DQBUF
#[derive(Debug, Clone)]
pub struct Dequeued {
    /// Pool index of the buffer
    pub index: u32,
    pub meta: Metadata,
    /// Bytes used per plane; a single entry for single-planar buffers
    pub planes: Vec<u32>,
}
