use std::{io, path::PathBuf, time::Duration};

use crate::session::State;

/// Errors reported by a capture [`Session`](crate::Session)
///
/// Each lifecycle step has its own variant so callers can tell which stage failed. The
/// underlying OS error, if any, is kept as the source.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device node could not be opened
    #[error("cannot open {}: {source}", .path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The device is not a streaming video capture device
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// VIDIOC_S_INPUT failed
    #[error("failed to select input {input}: {source}")]
    InputSelectionFailed {
        input: u32,
        #[source]
        source: io::Error,
    },

    /// Resolution enumeration or applying the format failed
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(#[source] io::Error),

    /// Requesting, querying or mapping the buffer pool failed
    #[error("buffer allocation failed{}: {source}", .index.map(|i| format!(" at index {}", i)).unwrap_or_default())]
    BufferAllocationFailed {
        index: Option<u32>,
        #[source]
        source: io::Error,
    },

    /// Queueing the pool or VIDIOC_STREAMON failed
    #[error("failed to start streaming: {0}")]
    StreamStartFailed(#[source] io::Error),

    /// No frame became ready within the timeout
    #[error("no frame within {0:?}")]
    AcquireTimeout(Duration),

    /// Waiting for or dequeuing a frame failed
    #[error("failed to acquire frame: {0}")]
    AcquireIo(#[source] io::Error),

    /// Requeueing a buffer failed; the buffer stays with the consumer
    #[error("failed to release buffer {index}: {source}")]
    ReleaseFailed {
        index: usize,
        #[source]
        source: io::Error,
    },

    /// VIDIOC_STREAMOFF failed; the session is considered stopped regardless
    #[error("failed to stop streaming: {0}")]
    StreamStopFailed(#[source] io::Error),

    /// Releasing the device handle failed; the session is closed regardless
    #[error("failed to close device: {0}")]
    CloseError(#[source] io::Error),

    /// The operation is not valid in the current lifecycle state
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: State },

    /// The buffer index is unknown or not currently held by the consumer
    #[error("buffer {0} is not held by the consumer")]
    InvalidBuffer(usize),
}

impl Error {
    /// Whether this is the normal "no frame yet" outcome of an acquire
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::AcquireTimeout(_))
    }

    /// Whether the session can keep going after this error
    ///
    /// Timeouts, failed releases and failed stream-off leave the session usable; misuse of the
    /// API does not change any state either.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::AcquireTimeout(_)
                | Error::ReleaseFailed { .. }
                | Error::StreamStopFailed(_)
                | Error::InvalidState { .. }
                | Error::InvalidBuffer(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
