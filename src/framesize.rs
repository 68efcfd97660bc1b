use std::convert::TryFrom;
use std::fmt;

use crate::fourcc::FourCC;
use crate::v4l2::videodev::*;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Format description as returned by [`crate::v4l2::vidioc::VIDIOC_ENUM_FRAMESIZES`]
pub struct FrameSize {
    pub index: u32,
    pub fourcc: FourCC,
    pub size: FrameSizeEnum,
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.size.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSizeEnum {
    Discrete(Discrete),
    Stepwise(Stepwise),
}

impl FrameSizeEnum {
    /// The resolution a capture session asks for when given this entry
    ///
    /// Ranges resolve to their maximum, discrete entries to themselves.
    pub fn preferred(&self) -> Discrete {
        match self {
            Self::Discrete(discrete) => *discrete,
            Self::Stepwise(stepwise) => Discrete {
                width: stepwise.max_width,
                height: stepwise.max_height,
            },
        }
    }
}

impl fmt::Display for FrameSizeEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSizeEnum::Discrete(val) => write!(f, "Discrete({})", val)?,
            FrameSizeEnum::Stepwise(val) => write!(f, "Stepwise({})", val)?,
        }

        Ok(())
    }
}

impl TryFrom<v4l2_frmsizeenum> for FrameSizeEnum {
    type Error = String;

    fn try_from(desc: v4l2_frmsizeenum) -> Result<Self, Self::Error> {
        unsafe {
            // Unsafe because of access to the size union
            match desc.type_ {
                V4L2_FRMSIZE_TYPE_DISCRETE => Ok(FrameSizeEnum::Discrete(Discrete {
                    width: desc.size.discrete.width,
                    height: desc.size.discrete.height,
                })),
                V4L2_FRMSIZE_TYPE_STEPWISE | V4L2_FRMSIZE_TYPE_CONTINUOUS => {
                    Ok(FrameSizeEnum::Stepwise(Stepwise {
                        min_width: desc.size.stepwise.min_width,
                        max_width: desc.size.stepwise.max_width,
                        step_width: desc.size.stepwise.step_width,
                        min_height: desc.size.stepwise.min_height,
                        max_height: desc.size.stepwise.max_height,
                        step_height: desc.size.stepwise.step_height,
                    }))
                }
                typ => Err(format!("Unknown frame size type: {}", typ)),
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Discrete {
    /// Width of the frame (in pixels).
    pub width: u32,
    /// Height of the frame (in pixels).
    pub height: u32,
}

impl fmt::Display for Discrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stepwise {
    /// Minimum frame width (in pixels).
    pub min_width: u32,
    /// Maximum frame width (in pixels).
    pub max_width: u32,
    /// Frame width step size (in pixels).
    pub step_width: u32,
    /// Minimum frame height (in pixels).
    pub min_height: u32,
    /// Maximum frame height (in pixels).
    pub max_height: u32,
    /// Frame height step size (in pixels).
    pub step_height: u32,
}

impl fmt::Display for Stepwise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} - {}x{} with step {}/{}",
            self.min_width,
            self.min_height,
            self.max_width,
            self.max_height,
            self.step_width,
            self.step_height,
        )?;
        Ok(())
    }
}

impl TryFrom<v4l2_frmsizeenum> for FrameSize {
    type Error = String;

    fn try_from(desc: v4l2_frmsizeenum) -> Result<Self, Self::Error> {
        Ok(FrameSize {
            index: desc.index,
            fourcc: FourCC::from(desc.pixel_format),
            size: FrameSizeEnum::try_from(desc)?,
        })
    }
}

/// Picks the capture resolution from an enumeration result
///
/// Only the first entry is considered: a range yields its maximum, a discrete list its first
/// resolution. Returns `None` for an empty enumeration.
pub fn select(sizes: &[FrameSize]) -> Option<Discrete> {
    sizes.first().map(|size| size.size.preferred())
}
