//! The single-threaded dispatcher: waits on the camera and the input,
//! renders frames and saves snapshots on request.

mod input;

pub use input::{Command, EventSource, PollEvents, Readiness};

use log::{debug, info, warn};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::camera::{Camera, CaptureBackend, CaptureError};
use crate::config::{Config, EventLoopConfig};
use crate::display::Surface;
use crate::render::{FrameDecoder, FrameRenderer};
use crate::snapshot::SnapshotWriter;

/// Conditions that end the loop with an error
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("readiness wait failed: {0}")]
    Wait(io::Error),

    #[error("failed to hand a buffer back to the driver: {0}")]
    Requeue(CaptureError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub dequeue_failures: u64,
    pub snapshots_saved: u64,
    pub snapshots_skipped: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames rendered, {} skipped, {} dequeue failures, {} snapshots saved, {} skipped",
            self.frames_rendered,
            self.frames_skipped,
            self.dequeue_failures,
            self.snapshots_saved,
            self.snapshots_skipped
        )
    }
}

/// Everything the running program owns.
///
/// Field order is teardown order: the camera is released before the surface.
pub struct Session<B: CaptureBackend, S: Surface, D: FrameDecoder> {
    camera: Camera<B>,
    surface: S,
    renderer: FrameRenderer<D>,
    snapshots: SnapshotWriter,
    config: EventLoopConfig,
    stats: SessionStats,
    closed: bool,
}

impl<B: CaptureBackend, S: Surface, D: FrameDecoder> Session<B, S, D> {
    pub fn new(camera: Camera<B>, surface: S, decoder: D, config: &Config) -> Self {
        Self {
            camera,
            surface,
            renderer: FrameRenderer::new(decoder),
            snapshots: SnapshotWriter::new(&config.snapshot),
            config: config.event_loop.clone(),
            stats: SessionStats::default(),
            closed: false,
        }
    }

    /// Runs until the process is asked to terminate (`Ok`) or a fatal error.
    /// Input is always handled before the camera within one iteration.
    pub fn run<E: EventSource + ?Sized>(&mut self, events: &mut E) -> Result<(), LoopError> {
        loop {
            if events.termination_requested() {
                info!("Termination requested, shutting down");
                return Ok(());
            }

            let ready = match events.wait(self.config.poll_timeout()) {
                Ok(ready) => ready,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LoopError::Wait(e)),
            };

            if ready.is_idle() {
                info!("poll timeout");
                continue;
            }

            if ready.input {
                match events.read_command() {
                    Some(Command::Capture) => self.capture_snapshot()?,
                    Some(Command::Other(line)) => debug!("Ignoring input {:?}", line),
                    Some(Command::Closed) | None => {}
                }
            }

            if ready.camera {
                self.display_next_frame()?;
            }
        }
    }

    /// Saves the next frame to disk. A frame that does not arrive in time
    /// skips the snapshot silently.
    pub fn capture_snapshot(&mut self) -> Result<(), LoopError> {
        let wait = self.config.snapshot_wait();
        let frame = match self.camera.dequeue_timeout(wait) {
            Ok(frame) => frame,
            Err(CaptureError::TimedOut(_)) => {
                debug!("No frame within {:?}, snapshot skipped", wait);
                self.stats.snapshots_skipped += 1;
                return Ok(());
            }
            Err(e) => {
                warn!("Snapshot skipped: {}", e);
                self.stats.snapshots_skipped += 1;
                return Ok(());
            }
        };

        match self.snapshots.persist(self.camera.frame_bytes(&frame)) {
            Ok(path) => {
                info!("Saved {}", path.display());
                self.stats.snapshots_saved += 1;
            }
            Err(e) => {
                warn!("Snapshot skipped: {}", e);
                self.stats.snapshots_skipped += 1;
            }
        }

        self.camera.requeue(frame).map_err(LoopError::Requeue)
    }

    /// Dequeues one frame, draws it and hands the buffer back
    pub fn display_next_frame(&mut self) -> Result<(), LoopError> {
        let frame = match self.camera.dequeue() {
            Ok(frame) => frame,
            Err(CaptureError::NotReady) => {
                // A snapshot in the same iteration already took it
                debug!("Camera readiness was stale");
                return Ok(());
            }
            Err(e) => {
                warn!("{}", e);
                self.stats.dequeue_failures += 1;
                return Ok(());
            }
        };

        match self
            .renderer
            .render(self.camera.frame_bytes(&frame), &mut self.surface)
        {
            Ok(_) => self.stats.frames_rendered += 1,
            Err(e) => {
                warn!("Frame {} skipped: {}", frame.index(), e);
                self.stats.frames_skipped += 1;
            }
        }

        self.camera.requeue(frame).map_err(LoopError::Requeue)
    }

    /// Stops the camera, releases the surface and logs the totals.
    /// Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.camera.stop();
        self.surface.release();
        info!("Session: {}", self.stats);
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn camera(&self) -> &Camera<B> {
        &self.camera
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn snapshots(&self) -> &SnapshotWriter {
        &self.snapshots
    }
}

impl<B: CaptureBackend, S: Surface, D: FrameDecoder> Drop for Session<B, S, D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
