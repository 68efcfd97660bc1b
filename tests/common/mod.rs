//! Scripted in-memory capture device

#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;

use v4l_capture::buffer::{Dequeued, Layout, Metadata, PlaneLayout, Type};
use v4l_capture::capability::Flags;
use v4l_capture::format::{Description, DescriptionFlags, PlaneFormat};
use v4l_capture::framesize::{Discrete, FrameSize, FrameSizeEnum, Stepwise};
use v4l_capture::{Capabilities, Device, Format, FourCC, Timestamp};

/// Distance between the mmap offsets of two buffers
pub const BUFFER_STRIDE: u32 = 0x10_0000;
/// Distance between the mmap offsets of two planes of one buffer
pub const PLANE_STRIDE: u32 = 0x1000;

/// Installs a logger once per test binary
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What the device does on the next readiness wait
#[derive(Debug, Clone)]
pub enum Event {
    /// Buffer `index` was filled with `bytesused` bytes
    Ready {
        index: u32,
        bytesused: u32,
        timestamp: Timestamp,
    },
    /// Nothing arrives within the timeout
    Timeout,
    /// The readiness wait fails with this errno
    WaitError(i32),
    /// The wait succeeds, the dequeue fails with this errno
    DequeueError(i32),
}

#[derive(Debug, Default)]
pub struct MockState {
    pub caps: Option<Capabilities>,
    pub formats: Vec<FourCC>,
    pub framesizes: Vec<FrameSizeEnum>,
    /// Resolution the driver forces instead of the requested one
    pub adjust: Option<(u32, u32)>,
    /// Mapped length of each plane; one entry for single-planar devices
    pub plane_lengths: Vec<u32>,
    /// Buffer count the driver grants regardless of the request
    pub grant: Option<u32>,

    pub fail_input: bool,
    pub fail_framesizes: bool,
    /// The n-th map call (counting from 0) fails
    pub fail_map_at: Option<usize>,
    /// Queueing this index fails with EIO
    pub fail_queue: Option<u32>,
    pub fail_stream_on: bool,
    pub fail_stream_off: bool,
    pub fail_close: bool,
    /// Number of EINTR results to return before an operation succeeds
    pub transient: HashMap<&'static str, u32>,

    /// Scripted readiness results; when empty the oldest queued buffer is delivered
    pub events: VecDeque<Event>,
    /// Bytes used reported for automatically delivered buffers; 0 stalls the device
    pub auto_bytesused: u32,
    pub sequence: u32,

    pub applied: Option<Format>,
    pub input: Option<u32>,
    pub buffer_count: u32,
    pub queued: VecDeque<u32>,
    pub streaming: bool,
    pub closed: bool,

    /// Live mappings keyed by address
    pub regions: HashMap<usize, Box<[u8]>>,
    pub maps: usize,
    pub unmaps: usize,
    pub frees: usize,
    pub calls: Vec<&'static str>,
}

impl MockState {
    pub fn live_mappings(&self) -> usize {
        self.regions.len()
    }

    fn record(&mut self, op: &'static str) -> io::Result<()> {
        self.calls.push(op);
        if let Some(left) = self.transient.get_mut(op) {
            if *left > 0 {
                *left -= 1;
                return Err(io::Error::from_raw_os_error(libc::EINTR));
            }
        }
        Ok(())
    }

    fn typ(&self) -> Type {
        match &self.caps {
            Some(caps) if !caps.effective().contains(Flags::VIDEO_CAPTURE) => {
                Type::VideoCaptureMplane
            }
            _ => Type::VideoCapture,
        }
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn caps(flags: Flags) -> Capabilities {
    Capabilities {
        driver: "mock".to_string(),
        card: "Mock Camera".to_string(),
        bus: "platform:mock".to_string(),
        version: (6, 1, 0),
        capabilities: flags | Flags::DEVICE_CAPS,
        device_caps: Some(flags),
    }
}

/// In-memory stand-in for a capture device node
///
/// Clones share state, so a test keeps one clone to inspect and script the device after handing
/// the other to a session.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    /// Single-planar MJPEG webcam offering 640x480 and 320x240
    pub fn camera() -> Self {
        let dev = MockDevice::default();
        {
            let mut state = dev.state();
            state.caps = Some(caps(Flags::VIDEO_CAPTURE | Flags::STREAMING));
            state.formats = vec![FourCC::MJPG, FourCC::YUYV];
            state.framesizes = vec![
                FrameSizeEnum::Discrete(Discrete {
                    width: 640,
                    height: 480,
                }),
                FrameSizeEnum::Discrete(Discrete {
                    width: 320,
                    height: 240,
                }),
            ];
            state.plane_lengths = vec![640 * 480 * 2];
            state.auto_bytesused = 4096;
        }
        dev
    }

    /// Multi-planar device with a continuous resolution range up to 1920x1080
    pub fn mplane_camera(plane_lengths: &[u32]) -> Self {
        let dev = MockDevice::default();
        {
            let mut state = dev.state();
            state.caps = Some(caps(Flags::VIDEO_CAPTURE_MPLANE | Flags::STREAMING));
            state.formats = vec![FourCC::NM12];
            state.framesizes = vec![FrameSizeEnum::Stepwise(Stepwise {
                min_width: 64,
                max_width: 1920,
                step_width: 1,
                min_height: 64,
                max_height: 1080,
                step_height: 1,
            })];
            state.plane_lengths = plane_lengths.to_vec();
            state.auto_bytesused = 1000;
        }
        dev
    }

    /// Device advertising exactly `flags`
    pub fn with_caps(flags: Flags) -> Self {
        let dev = MockDevice::camera();
        dev.state().caps = Some(caps(flags));
        dev
    }

    pub fn state(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    pub fn push(&self, event: Event) {
        self.state().events.push_back(event);
    }

    pub fn ready(&self, index: u32, bytesused: u32) {
        let timestamp = Timestamp::new(100, 0);
        self.push(Event::Ready {
            index,
            bytesused,
            timestamp,
        });
    }

    /// Byte every mapping of buffer `index` is filled with
    pub fn fill_byte(index: u32) -> u8 {
        (index + 1) as u8
    }
}

impl Device for MockDevice {
    fn query_caps(&self) -> io::Result<Capabilities> {
        let mut state = self.state();
        state.record("QUERYCAP")?;
        state.caps.clone().ok_or_else(|| errno(libc::ENOTTY))
    }

    fn enum_formats(&self, _typ: Type) -> io::Result<Vec<Description>> {
        let mut state = self.state();
        state.record("ENUM_FMT")?;
        Ok(state
            .formats
            .iter()
            .enumerate()
            .map(|(index, &fourcc)| Description {
                index: index as u32,
                flags: DescriptionFlags::empty(),
                description: fourcc.to_string(),
                fourcc,
            })
            .collect())
    }

    fn enum_framesizes(&self, fourcc: FourCC) -> io::Result<Vec<FrameSize>> {
        let mut state = self.state();
        state.record("ENUM_FRAMESIZES")?;
        if state.fail_framesizes || !state.formats.contains(&fourcc) {
            return Err(errno(libc::EINVAL));
        }
        Ok(state
            .framesizes
            .iter()
            .enumerate()
            .map(|(index, size)| FrameSize {
                index: index as u32,
                fourcc,
                size: size.clone(),
            })
            .collect())
    }

    fn set_input(&self, index: u32) -> io::Result<()> {
        let mut state = self.state();
        state.record("S_INPUT")?;
        if state.fail_input {
            return Err(errno(libc::EINVAL));
        }
        state.input = Some(index);
        Ok(())
    }

    fn set_format(&self, typ: Type, fmt: &Format) -> io::Result<Format> {
        let mut state = self.state();
        state.record("S_FMT")?;
        assert_eq!(typ, state.typ());

        let mut applied = fmt.clone();
        if let Some((width, height)) = state.adjust {
            applied.width = width;
            applied.height = height;
        }
        applied.planes = state
            .plane_lengths
            .iter()
            .map(|&size| PlaneFormat {
                stride: applied.width,
                size,
            })
            .collect();
        state.applied = Some(applied.clone());

        if typ.is_multiplanar() {
            // plane geometry is only reliable after reading the format back
            applied.planes.truncate(1);
        }
        Ok(applied)
    }

    fn format(&self, _typ: Type) -> io::Result<Format> {
        let mut state = self.state();
        state.record("G_FMT")?;
        state.applied.clone().ok_or_else(|| errno(libc::EINVAL))
    }

    fn request_buffers(&self, _typ: Type, count: u32) -> io::Result<u32> {
        let mut state = self.state();
        state.record("REQBUFS")?;
        if state.streaming {
            return Err(errno(libc::EBUSY));
        }
        if count == 0 {
            state.buffer_count = 0;
            state.frees += 1;
            return Ok(0);
        }
        state.buffer_count = state.grant.unwrap_or(count);
        Ok(state.buffer_count)
    }

    fn query_buffer(&self, typ: Type, index: u32, planes: usize) -> io::Result<Layout> {
        let mut state = self.state();
        state.record("QUERYBUF")?;
        if index >= state.buffer_count {
            return Err(errno(libc::EINVAL));
        }
        let layout = |plane: usize| PlaneLayout {
            offset: index * BUFFER_STRIDE + plane as u32 * PLANE_STRIDE,
            length: state.plane_lengths[plane],
        };
        if typ.is_multiplanar() {
            let count = planes.min(state.plane_lengths.len());
            Ok(Layout::MultiPlane((0..count).map(layout).collect()))
        } else {
            Ok(Layout::SinglePlane(layout(0)))
        }
    }

    fn map(&self, offset: u32, length: usize) -> io::Result<NonNull<u8>> {
        let mut state = self.state();
        state.calls.push("mmap");
        let attempt = state.maps;
        state.maps += 1;
        if state.fail_map_at == Some(attempt) {
            return Err(errno(libc::ENOMEM));
        }

        let fill = MockDevice::fill_byte(offset / BUFFER_STRIDE);
        let mut region = vec![fill; length].into_boxed_slice();
        let ptr = NonNull::new(region.as_mut_ptr()).ok_or_else(|| errno(libc::EFAULT))?;
        state.regions.insert(ptr.as_ptr() as usize, region);
        Ok(ptr)
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, length: usize) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push("munmap");
        match state.regions.remove(&(ptr.as_ptr() as usize)) {
            Some(region) if region.len() == length => {
                state.unmaps += 1;
                Ok(())
            }
            _ => Err(errno(libc::EINVAL)),
        }
    }

    fn queue(&self, _typ: Type, index: u32, _planes: usize) -> io::Result<()> {
        let mut state = self.state();
        state.record("QBUF")?;
        if state.fail_queue == Some(index) {
            return Err(errno(libc::EIO));
        }
        if index >= state.buffer_count || state.queued.contains(&index) {
            return Err(errno(libc::EINVAL));
        }
        state.queued.push_back(index);
        Ok(())
    }

    fn dequeue(&self, _typ: Type, planes: usize) -> io::Result<Dequeued> {
        let mut state = self.state();
        state.record("DQBUF")?;

        let (index, bytesused, timestamp) = match state.events.pop_front() {
            Some(Event::Ready {
                index,
                bytesused,
                timestamp,
            }) => {
                state.queued.retain(|&i| i != index);
                (index, bytesused, timestamp)
            }
            Some(Event::DequeueError(code)) => return Err(errno(code)),
            Some(other) => panic!("dequeue without readiness: {:?}", other),
            None => {
                let index = state.queued.pop_front().ok_or_else(|| errno(libc::EAGAIN))?;
                let micros = u64::from(state.sequence) * 40_000;
                (index, state.auto_bytesused, Timestamp::from(Duration::from_micros(micros)))
            }
        };

        let sequence = state.sequence;
        state.sequence += 1;
        Ok(Dequeued {
            index,
            meta: Metadata {
                bytesused,
                sequence,
                timestamp,
                ..Metadata::default()
            },
            planes: vec![bytesused; planes.max(1)],
        })
    }

    fn stream_on(&self, _typ: Type) -> io::Result<()> {
        let mut state = self.state();
        state.record("STREAMON")?;
        if state.fail_stream_on {
            return Err(errno(libc::EIO));
        }
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&self, _typ: Type) -> io::Result<()> {
        let mut state = self.state();
        state.record("STREAMOFF")?;
        state.streaming = false;
        state.queued.clear();
        if state.fail_stream_off {
            return Err(errno(libc::EIO));
        }
        Ok(())
    }

    fn wait_readable(&self, _timeout: Duration) -> io::Result<bool> {
        let mut state = self.state();
        state.calls.push("wait");
        match state.events.front().cloned() {
            Some(Event::Ready { .. }) | Some(Event::DequeueError(_)) => Ok(true),
            Some(Event::Timeout) => {
                state.events.pop_front();
                Ok(false)
            }
            Some(Event::WaitError(code)) => {
                state.events.pop_front();
                Err(errno(code))
            }
            None => Ok(state.streaming && !state.queued.is_empty() && state.auto_bytesused > 0),
        }
    }

    fn close(self) -> io::Result<()> {
        let mut state = self.state();
        state.record("close")?;
        state.closed = true;
        if state.fail_close {
            return Err(errno(libc::EIO));
        }
        Ok(())
    }
}
