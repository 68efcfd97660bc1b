//! Memory-mapped video capture for Video4Linux2 devices
//!
//! A [`Session`] walks a capture device through its lifecycle: open, format negotiation,
//! allocation of a fixed pool of driver buffers mapped into the process, streaming and teardown.
//! While streaming, frames are handed out one buffer at a time with [`Session::acquire`] and
//! given back to the driver with [`Session::release`]. [`CaptureLoop`] repeats that cycle and
//! keeps a frame counter and rate estimate.
//!
//! The kernel interface is reached through the [`Device`] trait. [`Handle`] implements it for
//! device nodes; other implementations can stand in for hardware.
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use v4l_capture::{CaptureLoop, Config, Session};
//!
//! let mut session = Session::prepare("/dev/video0", Config::default())?;
//! session.start_streaming()?;
//!
//! let mut capture = CaptureLoop::new(session.config().timeout);
//! capture.run(&mut session, |frame| {
//!     println!("{} bytes", frame.len());
//!     ControlFlow::Break(())
//! })?;
//!
//! session.stop_streaming()?;
//! session.close()?;
//! # Ok::<(), v4l_capture::Error>(())
//! ```

pub mod v4l2;

pub mod buffer;
pub mod capability;
pub mod device;
pub mod format;
pub mod framesize;
pub mod memory;
pub mod pool;
pub mod pselect;

mod capture;
pub use capture::CaptureLoop;

mod config;
pub use config::{Config, FrameLength};

mod error;
pub use error::{Error, Result};

mod fourcc;
pub use fourcc::FourCC;

mod session;
pub use session::{Frame, Session, State};

mod timestamp;
pub use timestamp::Timestamp;

pub use capability::Capabilities;
pub use device::{Device, Handle, Open};
pub use format::Format;
pub use pool::{BufferPool, MappedBuffer, Ownership};
