//! In-memory stand-ins for the capture device, the input and the decoder

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use rpi_camera_fb::camera::{BufferInfo, CaptureBackend, DeviceCaps, FrameFormat};
use rpi_camera_fb::display::{Geometry, MemorySurface, Surface};
use rpi_camera_fb::event_loop::{Command, EventSource, Readiness};
use rpi_camera_fb::render::{DecodeError, DecodedImage, FrameDecoder};
use v4l::FourCC;

/// One scripted outcome of a dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The driver hands back this slot
    Frame(u32),
    /// Nothing filled yet (EAGAIN)
    Empty,
    /// VIDIOC_DQBUF fails outright
    Fail,
}

/// Calls observed by a `FakeBackend`
#[derive(Debug, Default)]
pub struct CallLog {
    pub formats_tried: Vec<(u32, u32)>,
    pub buffer_requests: u32,
    pub queued: Vec<u32>,
    pub dequeued: Vec<u32>,
    pub stream_on: u32,
    pub stream_off: u32,
    pub closed: u32,
}

pub struct FakeBackend {
    pub caps: DeviceCaps,
    /// Resolutions `set_format` accepts
    pub accepted: Vec<(u32, u32)>,
    pub granted: u32,
    /// Contents of each slot, fixed at map time
    pub slot_contents: Vec<Vec<u8>>,
    pub script: VecDeque<Step>,
    /// Queue calls that succeed before every later one fails
    pub queue_budget: Option<usize>,
    pub log: Rc<RefCell<CallLog>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            caps: DeviceCaps {
                driver: "fake".into(),
                card: "Fake Camera".into(),
                video_capture: true,
                streaming: true,
            },
            accepted: vec![(640, 480), (1280, 1024)],
            granted: 4,
            slot_contents: (0..4u8).map(|i| vec![i; 16]).collect(),
            script: VecDeque::new(),
            queue_budget: None,
            log: Rc::new(RefCell::new(CallLog::default())),
        }
    }

    pub fn with_script(mut self, steps: &[Step]) -> Self {
        self.script = steps.iter().copied().collect();
        self
    }

    pub fn with_slot_contents(mut self, contents: Vec<Vec<u8>>) -> Self {
        self.slot_contents = contents;
        self
    }

    /// Handle onto the call log that outlives the backend
    pub fn log(&self) -> Rc<RefCell<CallLog>> {
        Rc::clone(&self.log)
    }
}

impl CaptureBackend for FakeBackend {
    type Mapping = Vec<u8>;

    fn query_caps(&mut self) -> io::Result<DeviceCaps> {
        Ok(self.caps.clone())
    }

    fn set_format(&mut self, width: u32, height: u32, fourcc: FourCC) -> io::Result<FrameFormat> {
        self.log.borrow_mut().formats_tried.push((width, height));
        if self.accepted.contains(&(width, height)) {
            Ok(FrameFormat { width, height, fourcc })
        } else {
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        }
    }

    fn request_buffers(&mut self, _count: u32) -> io::Result<u32> {
        self.log.borrow_mut().buffer_requests += 1;
        Ok(self.granted)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Vec<u8>> {
        self.slot_contents
            .get(index as usize)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        if let Some(budget) = self.queue_budget.as_mut() {
            if *budget == 0 {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            *budget -= 1;
        }
        self.log.borrow_mut().queued.push(index);
        Ok(())
    }

    fn dequeue(&mut self) -> io::Result<BufferInfo> {
        match self.script.pop_front() {
            Some(Step::Frame(index)) => {
                self.log.borrow_mut().dequeued.push(index);
                let bytes_used = self
                    .slot_contents
                    .get(index as usize)
                    .map_or(0, |c| c.len() as u32);
                Ok(BufferInfo { index, bytes_used })
            }
            Some(Step::Fail) => Err(io::Error::from_raw_os_error(libc::EIO)),
            Some(Step::Empty) | None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.log.borrow_mut().stream_on += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.log.borrow_mut().stream_off += 1;
        Ok(())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        match self.script.front() {
            Some(Step::Empty) => {
                self.script.pop_front();
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(-1)
    }

    fn close(&mut self) {
        self.log.borrow_mut().closed += 1;
    }
}

/// One scripted result of a readiness wait
#[derive(Debug)]
pub enum Tick {
    Idle,
    Camera,
    Input(Command),
    /// Input readable but no complete line yet
    PartialInput,
    Both(Command),
    Interrupted,
    Fail,
}

/// Replays a fixed sequence of waits, then asks the loop to terminate
pub struct ScriptedEvents {
    ticks: VecDeque<Tick>,
    pending: Option<Command>,
    pub waits: usize,
    pub timeouts_seen: Vec<Duration>,
}

impl ScriptedEvents {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self {
            ticks: ticks.into(),
            pending: None,
            waits: 0,
            timeouts_seen: Vec::new(),
        }
    }
}

impl EventSource for ScriptedEvents {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        self.waits += 1;
        self.timeouts_seen.push(timeout);

        let tick = self.ticks.pop_front().unwrap_or(Tick::Idle);
        let (readiness, pending) = match tick {
            Tick::Idle => (Readiness::default(), None),
            Tick::PartialInput => (Readiness { camera: false, input: true }, None),
            Tick::Camera => (Readiness { camera: true, input: false }, None),
            Tick::Input(cmd) => (Readiness { camera: false, input: true }, Some(cmd)),
            Tick::Both(cmd) => (Readiness { camera: true, input: true }, Some(cmd)),
            Tick::Interrupted => return Err(io::Error::from(io::ErrorKind::Interrupted)),
            Tick::Fail => return Err(io::Error::from_raw_os_error(libc::EBADF)),
        };
        self.pending = pending;
        Ok(readiness)
    }

    fn read_command(&mut self) -> Option<Command> {
        self.pending.take()
    }

    fn termination_requested(&self) -> bool {
        self.ticks.is_empty()
    }
}

/// In-memory surface that counts how often it was released
pub struct CountingSurface {
    inner: MemorySurface,
    pub releases: Rc<Cell<usize>>,
}

impl CountingSurface {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            inner: MemorySurface::new(geometry),
            releases: Rc::new(Cell::new(0)),
        }
    }
}

impl Surface for CountingSurface {
    fn geometry(&self) -> Geometry {
        self.inner.geometry()
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        self.inner.pixels_mut()
    }

    fn release(&mut self) {
        self.releases.set(self.releases.get() + 1);
    }
}

/// Decodes frames of the form [w, h, r, g, b] into a solid image and
/// rejects anything else as a bad header
#[derive(Default)]
pub struct FakeDecoder {
    pub calls: usize,
}

impl FrameDecoder for FakeDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedImage, DecodeError> {
        self.calls += 1;
        match data {
            [w, h, r, g, b] => {
                let (w, h) = (*w as u32, *h as u32);
                let rgb = [*r, *g, *b]
                    .iter()
                    .copied()
                    .cycle()
                    .take(w as usize * h as usize * 3)
                    .collect();
                DecodedImage::from_rgb(w, h, rgb)
            }
            _ => Err(DecodeError::Header("not a test frame".into())),
        }
    }
}

/// A real baseline JPEG of a single color
pub fn solid_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let pixels: Vec<u8> = rgb
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 3)
        .collect();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode(&pixels, width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out
}
