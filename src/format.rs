use bitflags::bitflags;
use std::convert::TryFrom;
use std::{fmt, mem};

use crate::buffer::Type;
use crate::fourcc::FourCC;
use crate::v4l2::videodev::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
/// Represents how fields are interlaced (if they are)
pub enum FieldOrder {
    /// Progressive, Top, Bottom, or Interlaced is acceptable; driver will pick one
    Any = 0,
    /// progressive, not interlaced
    Progressive = 1,
    /// top, or odd, field
    Top = 2,
    /// bottom, or even, field
    Bottom = 3,
    /// both fields interlaced
    Interlaced = 4,
    /// top field stored first, then bottom field
    SequentialTB = 5,
    /// bottom field stored first, then top field
    SequentialBT = 6,
    /// one field at a time, alternates between top and bottom
    Alternate = 7,
    /// both fields interlaced, starts with top
    InterlacedTB = 8,
    /// both fields interlaced, starts with bottom
    InterlacedBT = 9,
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Progressive => write!(f, "progressive"),
            Self::Top => write!(f, "top"),
            Self::Bottom => write!(f, "bottom"),
            Self::Interlaced => write!(f, "interlaced"),
            Self::SequentialTB => write!(f, "sequential, top then bottom"),
            Self::SequentialBT => write!(f, "sequential, bottom then top"),
            Self::Alternate => write!(f, "alternate between fields"),
            Self::InterlacedTB => write!(f, "interlaced, starting with top"),
            Self::InterlacedBT => write!(f, "interlaced, starting with bottom"),
        }
    }
}

impl TryFrom<u32> for FieldOrder {
    type Error = ();

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Any),
            1 => Ok(Self::Progressive),
            2 => Ok(Self::Top),
            3 => Ok(Self::Bottom),
            4 => Ok(Self::Interlaced),
            5 => Ok(Self::SequentialTB),
            6 => Ok(Self::SequentialBT),
            7 => Ok(Self::Alternate),
            8 => Ok(Self::InterlacedTB),
            9 => Ok(Self::InterlacedBT),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
/// Geometry of a single image plane
pub struct PlaneFormat {
    /// bytes per line
    pub stride: u32,
    /// maximum number of bytes required to store the plane
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Streaming format, for single- and multi-planar devices alike
pub struct Format {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// pixelformat code
    pub fourcc: FourCC,
    /// field order for interlacing
    pub field_order: FieldOrder,
    /// per-plane geometry; exactly one entry for single-planar devices
    pub planes: Vec<PlaneFormat>,
}

impl Format {
    /// Returns a progressive capture format without plane information
    ///
    /// The driver fills in plane geometry when the format is applied.
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_capture::{Format, FourCC};
    /// let fmt = Format::new(640, 480, FourCC::MJPG);
    /// ```
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            field_order: FieldOrder::Progressive,
            planes: Vec::new(),
        }
    }

    /// Number of planes in use
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Upper bound for the size of a whole frame across all planes
    pub fn frame_size(&self) -> usize {
        self.planes.iter().map(|p| p.size as usize).sum()
    }

    /// Builds the raw VIDIOC_S_FMT argument for the given buffer type
    pub fn to_raw(&self, typ: Type) -> v4l2_format {
        let mut raw = v4l2_format {
            type_: typ as u32,
            ..unsafe { mem::zeroed() }
        };

        match typ {
            Type::VideoCapture => {
                let plane = self.planes.first().copied().unwrap_or_default();
                raw.fmt.pix = v4l2_pix_format {
                    width: self.width,
                    height: self.height,
                    pixelformat: self.fourcc.into(),
                    field: self.field_order as u32,
                    bytesperline: plane.stride,
                    sizeimage: plane.size,
                    ..unsafe { mem::zeroed() }
                };
            }
            Type::VideoCaptureMplane => {
                let mut pix_mp = v4l2_pix_format_mplane {
                    width: self.width,
                    height: self.height,
                    pixelformat: self.fourcc.into(),
                    field: self.field_order as u32,
                    num_planes: self.planes.len().min(VIDEO_MAX_PLANES) as u8,
                    ..unsafe { mem::zeroed() }
                };
                for (raw_plane, plane) in pix_mp.plane_fmt.iter_mut().zip(&self.planes) {
                    raw_plane.bytesperline = plane.stride;
                    raw_plane.sizeimage = plane.size;
                }
                raw.fmt.pix_mp = pix_mp;
            }
        }

        raw
    }

    /// Decodes a VIDIOC_G_FMT / VIDIOC_S_FMT result of the given buffer type
    pub fn from_raw(raw: &v4l2_format, typ: Type) -> Self {
        match typ {
            Type::VideoCapture => {
                let pix = unsafe { raw.fmt.pix };
                Format {
                    width: pix.width,
                    height: pix.height,
                    fourcc: FourCC::from(pix.pixelformat),
                    field_order: FieldOrder::try_from(pix.field).unwrap_or(FieldOrder::Any),
                    planes: vec![PlaneFormat {
                        stride: pix.bytesperline,
                        size: pix.sizeimage,
                    }],
                }
            }
            Type::VideoCaptureMplane => {
                let pix_mp = unsafe { raw.fmt.pix_mp };
                let count = (pix_mp.num_planes as usize).min(VIDEO_MAX_PLANES);
                Format {
                    width: pix_mp.width,
                    height: pix_mp.height,
                    fourcc: FourCC::from(pix_mp.pixelformat),
                    field_order: FieldOrder::try_from(pix_mp.field).unwrap_or(FieldOrder::Any),
                    planes: pix_mp.plane_fmt[..count]
                        .iter()
                        .map(|p| PlaneFormat {
                            stride: p.bytesperline,
                            size: p.sizeimage,
                        })
                        .collect(),
                }
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} ({}",
            self.fourcc, self.width, self.height, self.field_order
        )?;
        for (i, plane) in self.planes.iter().enumerate() {
            write!(
                f,
                ", plane {}: stride {} size {}",
                i, plane.stride, plane.size
            )?;
        }
        write!(f, ")")
    }
}

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescriptionFlags : u32 {
        const COMPRESSED            = 0x0001;
        const EMULATED              = 0x0002;
        const CONTINUOUS_BITSTREAM  = 0x0004;
        const DYN_RESOLUTION        = 0x0008;
    }
}

impl From<u32> for DescriptionFlags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl fmt::Display for DescriptionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
/// Format description as returned by [`crate::v4l2::vidioc::VIDIOC_ENUM_FMT`]
pub struct Description {
    pub index: u32,
    pub flags: DescriptionFlags,
    pub description: String,
    pub fourcc: FourCC,
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ idx: {:02}, pixelformat: '{}', description: '{}' }}",
            self.index, self.fourcc, self.description
        )
    }
}

impl From<v4l2_fmtdesc> for Description {
    fn from(desc: v4l2_fmtdesc) -> Self {
        let end = desc
            .description
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(desc.description.len());
        Self {
            index: desc.index,
            flags: DescriptionFlags::from(desc.flags),
            description: String::from_utf8_lossy(&desc.description[..end]).into_owned(),
            fourcc: FourCC::from(desc.pixelformat),
        }
    }
}
