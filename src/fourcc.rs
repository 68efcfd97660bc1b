use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// Motion-JPEG, the default capture format
    pub const MJPG: FourCC = FourCC::new(b"MJPG");
    /// Packed YUV 4:2:2
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    /// Planar YUV 4:2:0, single buffer
    pub const YU12: FourCC = FourCC::new(b"YU12");
    /// Semi-planar YUV 4:2:0, single buffer
    pub const NV12: FourCC = FourCC::new(b"NV12");
    /// Semi-planar YUV 4:2:0, luma and chroma in separate planes
    pub const NM12: FourCC = FourCC::new(b"NM12");

    #[allow(clippy::trivially_copy_pass_by_ref)]
    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_capture::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.str() {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "0x{:08x}", u32::from(*self)),
        }
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}
