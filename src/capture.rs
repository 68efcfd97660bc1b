use std::ops::ControlFlow;
use std::time::Duration;

use log::{debug, warn};

use crate::device::Device;
use crate::error::Result;
use crate::session::{Frame, Session};
use crate::timestamp::Timestamp;

/// Repeated acquire, consume and release cycles on a streaming session
///
/// Keeps the frame counter and the rate estimate of one run of captures. Any acquire error,
/// including a timeout, ends the loop and is handed to the caller; retrying is up to the caller.
///
/// # Example
///
/// ```no_run
/// use std::ops::ControlFlow;
/// use v4l_capture::{CaptureLoop, Config, Session};
///
/// let mut session = Session::prepare(Config::DEFAULT_DEVICE, Config::default())?;
/// session.start_streaming()?;
///
/// let mut capture = CaptureLoop::new(session.config().timeout);
/// capture.run(&mut session, |frame| {
///     println!("{} bytes", frame.len());
///     if frame.meta().sequence < 100 {
///         ControlFlow::Continue(())
///     } else {
///         ControlFlow::Break(())
///     }
/// })?;
/// # Ok::<(), v4l_capture::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct CaptureLoop {
    timeout: Duration,
    frames: u64,
    last: Option<Timestamp>,
    rate: Option<f64>,
}

impl CaptureLoop {
    pub fn new(timeout: Duration) -> Self {
        CaptureLoop {
            timeout,
            frames: 0,
            last: None,
            rate: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of frames consumed so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames per second derived from the two most recent frame timestamps
    ///
    /// `None` until two frames with increasing timestamps were seen.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    fn update_rate(&mut self, timestamp: Timestamp) {
        if let Some(delta) = self.last.and_then(|last| timestamp.duration_since(last)) {
            self.rate = Some(1.0 / delta.as_secs_f64());
        }
        self.last = Some(timestamp);
    }

    /// Acquires one frame, hands it to `consumer` and releases it
    ///
    /// Returns what the consumer returned. A failed release is logged and leaves the loop
    /// running with a smaller pool.
    pub fn step<D, F>(
        &mut self,
        session: &mut Session<D>,
        mut consumer: F,
    ) -> Result<ControlFlow<()>>
    where
        D: Device,
        F: FnMut(&Frame<'_>) -> ControlFlow<()>,
    {
        let (index, flow) = {
            let frame = session.acquire(self.timeout)?;
            self.frames += 1;
            self.update_rate(frame.meta().timestamp);
            debug!(
                "frame {}: {} bytes, seq {}, {:.2} fps",
                self.frames,
                frame.len(),
                frame.meta().sequence,
                self.rate.unwrap_or(0.0)
            );
            (frame.index(), consumer(&frame))
        };

        if let Err(e) = session.release(index) {
            warn!("{}", e);
        }
        Ok(flow)
    }

    /// Runs [`CaptureLoop::step`] until the consumer breaks or an error occurs
    ///
    /// Returns the number of frames consumed during this call.
    pub fn run<D, F>(&mut self, session: &mut Session<D>, mut consumer: F) -> Result<u64>
    where
        D: Device,
        F: FnMut(&Frame<'_>) -> ControlFlow<()>,
    {
        let start = self.frames;
        while let ControlFlow::Continue(()) = self.step(session, &mut consumer)? {}
        Ok(self.frames - start)
    }
}
