use log::{info, warn};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsFd, AsRawFd, RawFd};
use std::time::Duration;

use crate::readiness::{self, Watch};
use crate::shutdown;

/// Largest single read from the input
const READ_CHUNK: usize = 1024;

/// What a line of user input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Empty line (Enter): save the next frame
    Capture,
    /// End of input; nothing more will be read
    Closed,
    /// Anything else, ignored
    Other(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            Command::Capture
        } else {
            Command::Other(line.to_string())
        }
    }
}

/// Which sources became ready in one wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub camera: bool,
    pub input: bool,
}

impl Readiness {
    pub fn is_idle(&self) -> bool {
        !self.camera && !self.input
    }
}

/// The two readiness sources the loop multiplexes
pub trait EventSource {
    /// Blocks until the camera or the input is ready, or `timeout` elapses.
    /// A signal surfaces as `io::ErrorKind::Interrupted`.
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness>;

    /// Consumes what the input has ready without blocking. `None` until a
    /// complete line has arrived.
    fn read_command(&mut self) -> Option<Command>;

    /// Checked at the top of every loop iteration
    fn termination_requested(&self) -> bool {
        shutdown::requested()
    }
}

/// `poll(2)` over the capture descriptor and a line-oriented input.
///
/// Each readiness report is answered with a single `read`, so a partial
/// line never blocks the loop; bytes are held until the newline arrives.
pub struct PollEvents<R> {
    camera_fd: RawFd,
    input_fd: Option<RawFd>,
    input: R,
    pending: Vec<u8>,
}

impl PollEvents<File> {
    /// Watches a duplicate of stdin, read without std's internal buffering
    pub fn stdin(camera_fd: RawFd) -> io::Result<Self> {
        let input = File::from(io::stdin().as_fd().try_clone_to_owned()?);
        let fd = input.as_raw_fd();
        Ok(Self::new(camera_fd, fd, input))
    }
}

impl<R: Read> PollEvents<R> {
    /// `input` must read from `input_fd` without buffering of its own
    pub fn new(camera_fd: RawFd, input_fd: RawFd, input: R) -> Self {
        Self {
            camera_fd,
            input_fd: Some(input_fd),
            input,
            pending: Vec::new(),
        }
    }

    fn has_line(&self) -> bool {
        self.pending.contains(&b'\n')
    }

    fn take_line(&mut self) -> Option<Command> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(Command::parse(&String::from_utf8_lossy(&line)))
    }

    fn close_input(&mut self) {
        if self.input_fd.take().is_some() {
            info!("Input closed, continuing with preview only");
        }
        self.pending.clear();
    }
}

impl<R: Read> EventSource for PollEvents<R> {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        // Complete lines already read never show up in poll
        let buffered = self.input_fd.is_some() && self.has_line();
        let timeout = if buffered { Duration::ZERO } else { timeout };

        let input = self.input_fd.map(Watch::new).unwrap_or_else(Watch::disabled);
        let mut watches = [Watch::new(self.camera_fd), input];
        readiness::wait_readable(&mut watches, timeout)?;

        Ok(Readiness {
            camera: watches[0].ready,
            input: buffered || watches[1].ready,
        })
    }

    fn read_command(&mut self) -> Option<Command> {
        if self.input_fd.is_none() {
            return Some(Command::Closed);
        }
        if self.has_line() {
            return self.take_line();
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.input.read(&mut chunk) {
            Ok(0) => {
                self.close_input();
                Some(Command::Closed)
            }
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                self.take_line()
            }
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                None
            }
            Err(e) => {
                warn!("Reading input failed: {}", e);
                self.close_input();
                Some(Command::Closed)
            }
        }
    }
}
