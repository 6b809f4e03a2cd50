//! V4L2 capture: format negotiation, the mmap buffer ring and the
//! dequeue/requeue protocol.

mod slots;
mod v4l2;

pub use slots::{DequeuedFrame, SlotRing, SlotState, SlotStateError};
pub use v4l2::{MmapRegion, V4l2Backend};

use log::{debug, info, warn};
use std::io;
use std::ops::Deref;
use std::os::unix::io::RawFd;
use std::time::Duration;
use thiserror::Error;
use v4l::FourCC;

use crate::config::CaptureConfig;

/// Number of kernel buffers requested at setup
pub const SLOT_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open capture device {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("VIDIOC_QUERYCAP failed: {0}")]
    QueryCaps(io::Error),

    #[error("device {card} does not support video capture with streaming I/O")]
    DeviceUnsupported { card: String },

    #[error("VIDIOC_S_FMT rejected every resolution ({tried})")]
    FormatNegotiationFailed { tried: String },

    #[error("VIDIOC_REQBUFS failed: {0}")]
    BufferRequest(io::Error),

    #[error("driver granted no capture buffers")]
    NoBuffers,

    #[error("failed to map buffer {index}: {source}")]
    BufferMap { index: u32, source: io::Error },

    #[error("VIDIOC_QBUF failed for buffer {index}: {source}")]
    Queue { index: u32, source: io::Error },

    #[error("VIDIOC_STREAMON failed: {0}")]
    StreamOn(io::Error),

    #[error("VIDIOC_DQBUF failed: {0}")]
    Dequeue(io::Error),

    #[error("no frame ready")]
    NotReady,

    #[error("no frame within {0:?}")]
    TimedOut(Duration),

    #[error("buffer slot state violation: {0}")]
    SlotState(#[from] SlotStateError),

    #[error("capture is not streaming")]
    NotStreaming,
}

/// Capabilities relevant to streaming capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    pub driver: String,
    pub card: String,
    pub video_capture: bool,
    pub streaming: bool,
}

/// Format the driver agreed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
}

/// A buffer returned by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub bytes_used: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninit,
    Configured,
    Streaming,
    Stopped,
}

/// Device-level operations of a streaming capture device.
///
/// `V4l2Backend` talks to the kernel; tests substitute an in-memory device.
pub trait CaptureBackend {
    /// Memory shared with the driver for one buffer. Dropping it unmaps it.
    type Mapping: Deref<Target = [u8]>;

    fn query_caps(&mut self) -> io::Result<DeviceCaps>;

    fn set_format(&mut self, width: u32, height: u32, fourcc: FourCC) -> io::Result<FrameFormat>;

    /// Requests `count` mmap buffers and returns how many the driver granted
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Mapping>;

    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// Takes the next filled buffer without blocking
    fn dequeue(&mut self) -> io::Result<BufferInfo>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    /// Waits until a filled buffer is available. `Ok(false)` on timeout.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Descriptor for the shared readiness wait, if the device has one
    fn raw_fd(&self) -> Option<RawFd>;

    /// Releases the device handle. Must be idempotent.
    fn close(&mut self);
}

/// Streaming capture device with a fixed ring of mapped buffers
pub struct Camera<B: CaptureBackend> {
    backend: B,
    format: Option<FrameFormat>,
    ring: SlotRing<B::Mapping>,
    state: StreamState,
}

impl<B: CaptureBackend> Camera<B> {
    /// Negotiates the format, maps and queues every buffer and starts
    /// streaming. On error, whatever was acquired is released by `Drop`.
    pub fn initialize(backend: B, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let mut camera = Camera {
            backend,
            format: None,
            ring: SlotRing::with_capacity(SLOT_COUNT as usize),
            state: StreamState::Uninit,
        };

        camera.check_caps()?;
        camera.negotiate_format(config)?;
        camera.setup_buffers()?;
        camera.start()?;

        Ok(camera)
    }

    fn check_caps(&mut self) -> Result<(), CaptureError> {
        let caps = self.backend.query_caps().map_err(CaptureError::QueryCaps)?;
        info!("Capture device: {} ({})", caps.card, caps.driver);

        if !caps.video_capture || !caps.streaming {
            return Err(CaptureError::DeviceUnsupported { card: caps.card });
        }
        Ok(())
    }

    fn negotiate_format(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        let fourcc = FourCC::new(&config.fourcc_bytes());
        let mut tried = Vec::new();

        for (width, height) in config.resolutions() {
            tried.push(format!("{}x{}", width, height));
            match self.backend.set_format(width, height, fourcc) {
                Ok(format) => {
                    if format.width != width || format.height != height {
                        warn!(
                            "Driver adjusted {}x{} to {}x{}",
                            width, height, format.width, format.height
                        );
                    }
                    if format.fourcc != fourcc {
                        warn!("Driver substituted pixel format {} for {}", format.fourcc, fourcc);
                    }
                    info!(
                        "V4L2 format set to: {}x{} {}",
                        format.width, format.height, format.fourcc
                    );
                    self.format = Some(format);
                    self.state = StreamState::Configured;
                    return Ok(());
                }
                Err(e) => warn!("VIDIOC_S_FMT {}x{} failed: {}", width, height, e),
            }
        }

        Err(CaptureError::FormatNegotiationFailed {
            tried: tried.join(", "),
        })
    }

    fn setup_buffers(&mut self) -> Result<(), CaptureError> {
        let granted = self
            .backend
            .request_buffers(SLOT_COUNT)
            .map_err(CaptureError::BufferRequest)?;
        if granted == 0 {
            return Err(CaptureError::NoBuffers);
        }
        if granted != SLOT_COUNT {
            warn!("Requested {} buffers, driver granted {}", SLOT_COUNT, granted);
        }

        // The ring never grows past what the driver granted at setup
        for index in 0..granted.min(SLOT_COUNT) {
            let mapping = self
                .backend
                .map_buffer(index)
                .map_err(|source| CaptureError::BufferMap { index, source })?;
            debug!("Mapped buffer {} ({} bytes)", index, mapping.len());

            let slot = self.ring.insert(mapping);
            self.backend
                .queue(slot)
                .map_err(|source| CaptureError::Queue { index: slot, source })?;
            self.ring.mark_queued(slot)?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.backend.stream_on().map_err(CaptureError::StreamOn)?;
        self.state = StreamState::Streaming;
        info!("Camera stream started with {} buffers", self.ring.len());
        Ok(())
    }

    /// Takes the next filled slot; readiness must already be known
    pub fn dequeue(&mut self) -> Result<DequeuedFrame, CaptureError> {
        if self.state != StreamState::Streaming {
            return Err(CaptureError::NotStreaming);
        }

        let info = self.backend.dequeue().map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock {
                CaptureError::NotReady
            } else {
                CaptureError::Dequeue(e)
            }
        })?;

        Ok(self.ring.mark_dequeued(info.index, info.bytes_used as usize)?)
    }

    /// Waits up to `timeout` for the next filled slot, then takes it
    pub fn dequeue_timeout(&mut self, timeout: Duration) -> Result<DequeuedFrame, CaptureError> {
        if self.state != StreamState::Streaming {
            return Err(CaptureError::NotStreaming);
        }

        match self.backend.wait_readable(timeout) {
            Ok(true) => self.dequeue(),
            Ok(false) => Err(CaptureError::TimedOut(timeout)),
            Err(e) => Err(CaptureError::Dequeue(e)),
        }
    }

    /// Compressed bytes of a dequeued frame
    pub fn frame_bytes(&self, frame: &DequeuedFrame) -> &[u8] {
        self.ring.bytes(frame)
    }

    /// Hands a dequeued slot back to the driver
    pub fn requeue(&mut self, frame: DequeuedFrame) -> Result<(), CaptureError> {
        let index = frame.index();
        self.ring.check_queueable(index)?;
        self.backend
            .queue(index)
            .map_err(|source| CaptureError::Queue { index, source })?;
        self.ring.mark_queued(index)?;
        Ok(())
    }

    /// Stops streaming, unmaps every slot and closes the device.
    /// Safe to call repeatedly and on a partially initialized camera.
    pub fn stop(&mut self) {
        if self.state == StreamState::Streaming {
            match self.backend.stream_off() {
                Ok(()) => info!("V4L2 stream stopped."),
                Err(e) => warn!("VIDIOC_STREAMOFF failed: {}", e),
            }
        }

        let released = self.ring.release_all();
        if released > 0 {
            info!("V4L2 buffers unmapped ({}).", released);
        }

        if self.state != StreamState::Stopped {
            self.backend.close();
            self.state = StreamState::Stopped;
        }
    }

    pub fn format(&self) -> Option<FrameFormat> {
        self.format
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn slot_count(&self) -> usize {
        self.ring.len()
    }

    pub fn slot_state(&self, index: u32) -> Option<SlotState> {
        self.ring.state(index)
    }

    /// Slots currently held by the process
    pub fn outstanding(&self) -> usize {
        self.ring.outstanding()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        if self.state == StreamState::Stopped {
            return None;
        }
        self.backend.raw_fd()
    }
}

impl<B: CaptureBackend> Drop for Camera<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
