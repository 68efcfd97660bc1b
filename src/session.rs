use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, io};

use log::{debug, info, warn};

use crate::buffer::{Metadata, Type};
use crate::capability::{Capabilities, Flags};
use crate::config::{Config, FrameLength};
use crate::device::{retry, Device, Handle, Open};
use crate::error::{Error, Result};
use crate::format::{Description as FormatDescription, Format};
use crate::fourcc::FourCC;
use crate::framesize::{self, FrameSize};
use crate::pool::{BufferPool, Ownership};
use crate::v4l2::videodev::VIDEO_MAX_PLANES;

/// Lifecycle state of a [`Session`]
///
/// Stopping a stream returns to [`State::BuffersReady`], from where streaming may be restarted
/// or the session closed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Closed,
    Opened,
    FormatSet,
    BuffersReady,
    Streaming,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Closed => "closed",
            State::Opened => "opened",
            State::FormatSet => "format set",
            State::BuffersReady => "buffers ready",
            State::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// A frame held by the consumer
///
/// Borrows the mapped buffer memory, so the session cannot release the buffer (or do anything
/// else) while the frame is alive. Pass [`Frame::index`] to [`Session::release`] once done.
#[derive(Debug)]
pub struct Frame<'a> {
    index: usize,
    data: &'a [u8],
    planes: Vec<&'a [u8]>,
    meta: Metadata,
}

impl<'a> Frame<'a> {
    /// Pool index of the buffer holding this frame
    pub fn index(&self) -> usize {
        self.index
    }

    /// Frame bytes
    ///
    /// Single-planar frames cover the bytes the driver filled in. Multi-planar frames cover
    /// plane 0, sized per [`FrameLength`].
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    /// Bytes of plane `index`, as far as the driver filled them
    pub fn plane(&self, index: usize) -> Option<&'a [u8]> {
        self.planes.get(index).copied()
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }
}

impl<'a> Deref for Frame<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

/// Memory-mapped streaming capture session
///
/// Drives one device through open, format negotiation, buffer allocation and streaming, and
/// hands out frames one buffer at a time:
///
/// ```no_run
/// use std::time::Duration;
/// use v4l_capture::{FourCC, Session};
///
/// let mut session: Session = Session::new();
/// session.open("/dev/video0")?;
/// session.negotiate_format(FourCC::MJPG)?;
/// session.allocate_buffers(3)?;
/// session.start_streaming()?;
///
/// let frame = session.acquire(Duration::from_secs(2))?;
/// println!("{} bytes", frame.len());
/// let index = frame.index();
/// session.release(index)?;
///
/// session.stop_streaming()?;
/// session.close()?;
/// # Ok::<(), v4l_capture::Error>(())
/// ```
///
/// Every operation checks the lifecycle state first and fails with [`Error::InvalidState`]
/// without side effects when called out of order. A failing operation leaves the session in
/// the last state it completed.
pub struct Session<D: Device = Handle> {
    config: Config,
    state: State,
    path: Option<PathBuf>,
    // shared with every Mapping so the pool can unmap on drop; Arc keeps the session Send
    device: Option<Arc<D>>,
    typ: Type,
    caps: Option<Capabilities>,
    format: Option<Format>,
    pool: Option<BufferPool<D>>,
}

impl Session<Handle> {
    /// Opens `path` and runs format negotiation and buffer allocation from the config
    ///
    /// The returned session is ready to start streaming.
    pub fn prepare<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let mut session = Self::with_config(config);
        session.open(path)?;
        session.negotiate_format(session.config.pixel_format)?;
        session.allocate_buffers(session.config.buffer_count)?;
        Ok(session)
    }
}

impl<D: Device> Default for Session<D> {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl<D: Device> Session<D> {
    /// Returns a closed session with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a closed session using `config`
    pub fn with_config(config: Config) -> Self {
        Session {
            config,
            state: State::Closed,
            path: None,
            device: None,
            typ: Type::VideoCapture,
            caps: None,
            format: None,
            pool: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the open device, if it was opened by path
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Buffer type selected on open
    pub fn buffer_type(&self) -> Option<Type> {
        self.device.as_ref().map(|_| self.typ)
    }

    /// Capabilities reported by the device on open
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.caps.as_ref()
    }

    /// Format accepted by the device
    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Number of buffers in the pool, as granted by the driver
    pub fn buffer_count(&self) -> usize {
        self.pool.as_ref().map_or(0, BufferPool::len)
    }

    /// The mapped buffer pool
    pub fn pool(&self) -> Option<&BufferPool<D>> {
        self.pool.as_ref()
    }

    fn check_state(&self, op: &'static str, allowed: &[State]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    fn device(&self) -> &D {
        // every state past Closed holds a device
        self.device
            .as_deref()
            .unwrap_or_else(|| unreachable!("session in state {} without a device", self.state))
    }

    fn planes(&self) -> usize {
        self.format.as_ref().map_or(1, Format::num_planes)
    }

    /// Opens the device node at `path`
    ///
    /// See [`Session::attach`] for the checks performed once the node is open.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()>
    where
        D: Open,
    {
        self.check_state("open a device", &[State::Closed])?;

        let path = path.as_ref();
        let device = D::open(path).map_err(|source| Error::DeviceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        self.attach(device)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Takes over an already open device
    ///
    /// Checks that the device supports streaming video capture, selects single- or multi-planar
    /// buffers (single-planar if both are offered) and selects the configured input. On failure
    /// the device is dropped and the session stays closed.
    pub fn attach(&mut self, device: D) -> Result<()> {
        self.check_state("open a device", &[State::Closed])?;

        let caps = retry("VIDIOC_QUERYCAP", || device.query_caps())
            .map_err(|e| Error::UnsupportedDevice(format!("capability query failed: {}", e)))?;
        let flags = caps.effective();

        if !flags.contains(Flags::STREAMING) {
            return Err(Error::UnsupportedDevice(format!(
                "{} does not support streaming I/O",
                caps.card
            )));
        }
        let typ = if flags.contains(Flags::VIDEO_CAPTURE) {
            Type::VideoCapture
        } else if flags.contains(Flags::VIDEO_CAPTURE_MPLANE) {
            Type::VideoCaptureMplane
        } else {
            return Err(Error::UnsupportedDevice(format!(
                "{} is not a video capture device",
                caps.card
            )));
        };

        let input = self.config.input;
        retry("VIDIOC_S_INPUT", || device.set_input(input))
            .map_err(|source| Error::InputSelectionFailed { input, source })?;

        info!("opened {} ({}), {}", caps.card, caps.driver, typ);
        self.typ = typ;
        self.caps = Some(caps);
        self.device = Some(Arc::new(device));
        self.state = State::Opened;
        Ok(())
    }

    /// Pixel formats the device offers for the selected buffer type
    pub fn formats(&self) -> Result<Vec<FormatDescription>> {
        self.check_state(
            "enumerate formats",
            &[State::Opened, State::FormatSet, State::BuffersReady, State::Streaming],
        )?;
        retry("VIDIOC_ENUM_FMT", || self.device().enum_formats(self.typ))
            .map_err(Error::FormatNegotiationFailed)
    }

    /// Resolutions the device offers for `fourcc`
    pub fn framesizes(&self, fourcc: FourCC) -> Result<Vec<FrameSize>> {
        self.check_state(
            "enumerate frame sizes",
            &[State::Opened, State::FormatSet, State::BuffersReady, State::Streaming],
        )?;
        retry("VIDIOC_ENUM_FRAMESIZES", || {
            self.device().enum_framesizes(fourcc)
        })
        .map_err(Error::FormatNegotiationFailed)
    }

    /// Applies `fourcc` at the resolution the device prefers for it
    ///
    /// A stepwise or continuous resolution range resolves to its maximum, a discrete list to its
    /// first entry. The device may adjust the request; whatever it accepted is recorded and
    /// returned, with a warning if it differs from the request. For multi-planar devices the
    /// plane count is read back from the device.
    pub fn negotiate_format(&mut self, fourcc: FourCC) -> Result<Format> {
        self.check_state("negotiate a format", &[State::Opened])?;

        if log::log_enabled!(log::Level::Debug) {
            match self.formats() {
                Ok(formats) => formats.iter().for_each(|desc| debug!("offered: {}", desc)),
                Err(e) => debug!("format enumeration failed: {}", e),
            }
        }

        let sizes = self.framesizes(fourcc)?;
        sizes.iter().for_each(|size| debug!("{} frame size: {}", fourcc, size));
        let size = framesize::select(&sizes).ok_or_else(|| {
            Error::FormatNegotiationFailed(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no frame sizes for {}", fourcc),
            ))
        })?;

        let device = self.device();
        let typ = self.typ;
        let request = Format::new(size.width, size.height, fourcc);
        let mut applied = retry("VIDIOC_S_FMT", || device.set_format(typ, &request))
            .map_err(Error::FormatNegotiationFailed)?;

        if typ.is_multiplanar() {
            applied = retry("VIDIOC_G_FMT", || device.format(typ))
                .map_err(Error::FormatNegotiationFailed)?;
            if applied.num_planes() == 0 || applied.num_planes() > VIDEO_MAX_PLANES {
                return Err(Error::FormatNegotiationFailed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("device reports {} planes", applied.num_planes()),
                )));
            }
        }

        if applied.width != request.width
            || applied.height != request.height
            || applied.fourcc != request.fourcc
        {
            warn!(
                "requested {}x{} {}, device applied {}x{} {}",
                request.width,
                request.height,
                request.fourcc,
                applied.width,
                applied.height,
                applied.fourcc
            );
        }

        info!("format: {}", applied);
        self.format = Some(applied.clone());
        self.state = State::FormatSet;
        Ok(applied)
    }

    /// Allocates and maps at least `count` buffers
    ///
    /// Returns the number of buffers the driver granted, which is authoritative from here on.
    pub fn allocate_buffers(&mut self, count: u32) -> Result<usize> {
        self.check_state("allocate buffers", &[State::FormatSet])?;

        let device = self
            .device
            .as_ref()
            .unwrap_or_else(|| unreachable!("format set without a device"));
        let pool = BufferPool::allocate(device, self.typ, count, self.planes())?;

        let granted = pool.len();
        info!("mapped {} buffers", granted);
        self.pool = Some(pool);
        self.state = State::BuffersReady;
        Ok(granted)
    }

    /// Queues every buffer and starts the stream
    ///
    /// If queueing or VIDIOC_STREAMON fails, the stream is switched off again, which returns
    /// all queued buffers, and the session stays in [`State::BuffersReady`].
    pub fn start_streaming(&mut self) -> Result<()> {
        self.check_state("start streaming", &[State::BuffersReady])?;

        let typ = self.typ;
        let planes = self.planes();
        let Session { device, pool, .. } = self;
        let (device, pool) = match (device.as_deref(), pool.as_mut()) {
            (Some(device), Some(pool)) => (device, pool),
            _ => unreachable!("buffers ready without a pool"),
        };

        let res = (0..pool.len())
            .try_for_each(|index| {
                retry("VIDIOC_QBUF", || device.queue(typ, index as u32, planes))?;
                pool.set_owner(index, Ownership::Device);
                Ok::<(), io::Error>(())
            })
            .and_then(|_| retry("VIDIOC_STREAMON", || device.stream_on(typ)));

        if let Err(e) = res {
            if let Err(off) = device.stream_off(typ) {
                debug!("stream off after failed start: {}", off);
            }
            pool.set_all(Ownership::Unqueued);
            return Err(Error::StreamStartFailed(e));
        }

        info!("streaming started");
        self.state = State::Streaming;
        Ok(())
    }

    /// Waits up to `timeout` for a filled buffer and hands it to the consumer
    ///
    /// No more than `buffer_count - 1` buffers (at least one) can be held at a time, so the
    /// driver always has a buffer to fill. A timeout is reported as [`Error::AcquireTimeout`],
    /// any failure of the wait or the dequeue as [`Error::AcquireIo`].
    pub fn acquire(&mut self, timeout: Duration) -> Result<Frame<'_>> {
        self.check_state("acquire a frame", &[State::Streaming])?;

        let typ = self.typ;
        let planes = self.planes();
        let frame_length = self.config.frame_length;
        let Session { device, pool, .. } = self;
        let (device, pool) = match (device.as_deref(), pool.as_mut()) {
            (Some(device), Some(pool)) => (device, pool),
            _ => unreachable!("streaming without a pool"),
        };

        let limit = pool.len().saturating_sub(1).max(1);
        if pool.outstanding() >= limit {
            return Err(Error::InvalidState {
                op: "acquire another frame before releasing one",
                state: State::Streaming,
            });
        }

        match device.wait_readable(timeout) {
            Ok(true) => {}
            Ok(false) => return Err(Error::AcquireTimeout(timeout)),
            Err(e) => return Err(Error::AcquireIo(e)),
        }

        let dq = retry("VIDIOC_DQBUF", || device.dequeue(typ, planes)).map_err(Error::AcquireIo)?;
        let index = dq.index as usize;
        match pool.owner(index) {
            Some(Ownership::Device) => pool.set_owner(index, Ownership::Consumer),
            Some(owner) => {
                // the driver no longer queues this buffer; a held one comes back on release
                warn!(
                    "driver returned buffer {} which is {:?}, it stays out of the queue",
                    index, owner
                );
                return Err(Error::AcquireIo(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("driver returned buffer {} which is {:?}", index, owner),
                )))
            }
            None => {
                warn!("driver returned unknown buffer {}", index);
                return Err(Error::AcquireIo(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("driver returned unknown buffer {}", index),
                )))
            }
        }

        let pool = &*pool;
        let mappings = pool
            .get(index)
            .unwrap_or_else(|| unreachable!("index checked above"))
            .planes();

        let used = |plane: usize| {
            let mapped = mappings[plane].len();
            match dq.planes.get(plane).copied() {
                Some(0) | None => mapped,
                Some(n) => n as usize,
            }
        };
        let length = if typ.is_multiplanar() {
            match frame_length {
                FrameLength::MappedPlane => mappings[0].len(),
                FrameLength::BytesUsed => used(0),
            }
        } else {
            dq.meta.bytesused as usize
        };

        let data = mappings[0].bytes(length);
        let planes = if typ.is_multiplanar() {
            (0..mappings.len())
                .map(|plane| mappings[plane].bytes(used(plane)))
                .collect()
        } else {
            vec![data]
        };

        debug!("buffer {}: {} ({} bytes)", index, dq.meta, data.len());
        Ok(Frame {
            index,
            data,
            planes,
            meta: dq.meta,
        })
    }

    /// Requeues buffer `index` after the consumer is done with it
    ///
    /// If the driver rejects the buffer it stays with the consumer and the pool runs with one
    /// buffer less until a later release succeeds.
    pub fn release(&mut self, index: usize) -> Result<()> {
        self.check_state("release a frame", &[State::Streaming])?;

        let typ = self.typ;
        let planes = self.planes();
        let Session { device, pool, .. } = self;
        let (device, pool) = match (device.as_deref(), pool.as_mut()) {
            (Some(device), Some(pool)) => (device, pool),
            _ => unreachable!("streaming without a pool"),
        };

        if pool.owner(index) != Some(Ownership::Consumer) {
            return Err(Error::InvalidBuffer(index));
        }

        match retry("VIDIOC_QBUF", || device.queue(typ, index as u32, planes)) {
            Ok(()) => {
                pool.set_owner(index, Ownership::Device);
                Ok(())
            }
            Err(source) => {
                warn!(
                    "buffer {} could not be requeued, {} of {} buffers left to the driver",
                    index,
                    pool.len() - pool.outstanding(),
                    pool.len()
                );
                Err(Error::ReleaseFailed { index, source })
            }
        }
    }

    /// Stops the stream
    ///
    /// The session returns to [`State::BuffersReady`] even if VIDIOC_STREAMOFF fails; the
    /// failure is logged and returned as [`Error::StreamStopFailed`].
    pub fn stop_streaming(&mut self) -> Result<()> {
        self.check_state("stop streaming", &[State::Streaming])?;

        let res = retry("VIDIOC_STREAMOFF", || self.device().stream_off(self.typ));
        if let Some(pool) = self.pool.as_mut() {
            pool.set_all(Ownership::Unqueued);
        }
        self.state = State::BuffersReady;

        match res {
            Ok(()) => {
                info!("streaming stopped");
                Ok(())
            }
            Err(e) => {
                let err = Error::StreamStopFailed(e);
                warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Unmaps all buffers and releases the device
    ///
    /// A streaming session is stopped first. The session is closed afterwards even if releasing
    /// the device fails. Closing an already closed session is an error.
    pub fn close(&mut self) -> Result<()> {
        self.check_state(
            "close",
            &[State::Opened, State::FormatSet, State::BuffersReady, State::Streaming],
        )?;

        if self.state == State::Streaming {
            // failure is logged by stop_streaming and does not hold up teardown
            let _ = self.stop_streaming();
        }

        let device = self.device.take();
        if let (Some(pool), Some(device)) = (self.pool.take(), device.as_deref()) {
            pool.free(device, self.typ);
        }

        self.state = State::Closed;
        self.format = None;
        self.caps = None;
        self.path = None;

        let device = device.unwrap_or_else(|| unreachable!("open session without a device"));
        match Arc::try_unwrap(device) {
            Ok(device) => device.close().map_err(Error::CloseError)?,
            Err(_) => {
                return Err(Error::CloseError(io::Error::new(
                    io::ErrorKind::Other,
                    "device still referenced",
                )))
            }
        }

        info!("closed");
        Ok(())
    }

    /// Runs one acquire, copy and release cycle into `buf`
    ///
    /// `buf` is cleared and refilled with the frame bytes; its capacity is grown to the
    /// negotiated frame size so repeated captures do not reallocate. Returns the frame metadata.
    pub fn capture_into(&mut self, timeout: Duration, buf: &mut Vec<u8>) -> Result<Metadata> {
        let max = self.format.as_ref().map_or(0, Format::frame_size);
        let (index, meta) = {
            let frame = self.acquire(timeout)?;
            buf.clear();
            buf.reserve(max.max(frame.len()));
            buf.extend_from_slice(frame.data());
            (frame.index(), *frame.meta())
        };
        self.release(index)?;
        Ok(meta)
    }
}

impl<D: Device> Drop for Session<D> {
    fn drop(&mut self) {
        if self.state != State::Closed {
            if let Err(e) = self.close() {
                warn!("teardown on drop: {}", e);
            }
        }
    }
}

impl<D: Device> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("path", &self.path)
            .field("type", &self.typ)
            .field("format", &self.format)
            .field("buffers", &self.buffer_count())
            .finish()
    }
}
