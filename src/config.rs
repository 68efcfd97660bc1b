use std::time::Duration;

use crate::fourcc::FourCC;

/// How the delivered length of a multi-planar frame is computed
///
/// Single-planar frames always report the driver's bytes-used value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FrameLength {
    /// Length of the whole mapping of plane 0
    ///
    /// Matches capture pipelines that pack the complete image contiguously into the first
    /// plane, and keeps the size stable across frames.
    #[default]
    MappedPlane,
    /// Bytes used in plane 0 as reported by the driver for this frame
    ///
    /// Falls back to the mapped length if the driver reports zero.
    BytesUsed,
}

/// Capture session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Pixel format requested during negotiation
    pub pixel_format: FourCC,
    /// Number of buffers requested from the driver
    pub buffer_count: u32,
    /// Readiness wait bound for each acquire
    pub timeout: Duration,
    /// Input selected on open
    pub input: u32,
    /// Delivered length policy for multi-planar frames
    pub frame_length: FrameLength,
}

impl Config {
    pub const DEFAULT_DEVICE: &'static str = "/dev/video0";
    pub const DEFAULT_BUFFER_COUNT: u32 = 3;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pixel_format: FourCC::MJPG,
            buffer_count: Self::DEFAULT_BUFFER_COUNT,
            timeout: Self::DEFAULT_TIMEOUT,
            input: 0,
            frame_length: FrameLength::default(),
        }
    }
}
