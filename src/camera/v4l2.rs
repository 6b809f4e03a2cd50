//! Kernel-facing capture backend built on the `v4l` crate.
//!
//! Capability and format calls go through `v4l::Device`; the buffer ring uses
//! the raw `v4l::v4l2` ioctl layer so each slot's queue/dequeue is explicit.

use log::warn;
use std::io;
use std::mem;
use std::ops::Deref;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use super::{BufferInfo, CaptureBackend, DeviceCaps, FrameFormat};
use crate::readiness::{self, Watch};

/// One driver buffer mapped into the process
pub struct MmapRegion {
    ptr: *mut c_void,
    len: usize,
}

impl Deref for MmapRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the region stays mapped for the lifetime of `self`.
        unsafe { slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` came from a successful mmap and are unmapped once.
        if let Err(e) = unsafe { v4l2::munmap(self.ptr, self.len) } {
            warn!("munmap of capture buffer failed: {}", e);
        }
    }
}

pub struct V4l2Backend {
    path: PathBuf,
    device: Option<Device>,
}

impl V4l2Backend {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let device = Device::with_path(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            device: Some(device),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn device(&self) -> io::Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "capture device closed"))
    }

    fn fd(&self) -> io::Result<RawFd> {
        Ok(self.device()?.handle().fd())
    }

    fn buffer_request(index: u32) -> v4l_sys::v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
        let mut buf: v4l_sys::v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    fn stream_ioctl(&mut self, request: vidioc::_IOC_TYPE) -> io::Result<()> {
        let fd = self.fd()?;
        let mut typ = Type::VideoCapture as u32;
        // SAFETY: the request takes a pointer to the buffer type.
        unsafe { v4l2::ioctl(fd, request, &mut typ as *mut _ as *mut c_void) }
    }
}

impl CaptureBackend for V4l2Backend {
    type Mapping = MmapRegion;

    fn query_caps(&mut self) -> io::Result<DeviceCaps> {
        let caps = self.device()?.query_caps()?;
        Ok(DeviceCaps {
            driver: caps.driver,
            card: caps.card,
            video_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    fn set_format(&mut self, width: u32, height: u32, fourcc: FourCC) -> io::Result<FrameFormat> {
        let requested = Format::new(width, height, fourcc);
        let applied = self.device()?.set_format(&requested)?;
        Ok(FrameFormat {
            width: applied.width,
            height: applied.height,
            fourcc: applied.fourcc,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let fd = self.fd()?;
        // SAFETY: plain C struct, zero-initialised before use.
        let mut req: v4l_sys::v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        // SAFETY: `req` outlives the call and matches VIDIOC_REQBUFS.
        unsafe {
            v4l2::ioctl(
                fd,
                vidioc::VIDIOC_REQBUFS,
                &mut req as *mut _ as *mut c_void,
            )?;
        }
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<MmapRegion> {
        let fd = self.fd()?;
        let mut buf = Self::buffer_request(index);

        // SAFETY: `buf` outlives the call and matches VIDIOC_QUERYBUF.
        unsafe {
            v4l2::ioctl(
                fd,
                vidioc::VIDIOC_QUERYBUF,
                &mut buf as *mut _ as *mut c_void,
            )?;
        }

        let len = buf.length as usize;
        // SAFETY: for MMAP buffers the driver fills the `offset` member.
        let offset = unsafe { buf.m.offset };
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )?
        };

        Ok(MmapRegion { ptr, len })
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let fd = self.fd()?;
        let mut buf = Self::buffer_request(index);
        // SAFETY: `buf` outlives the call and matches VIDIOC_QBUF.
        unsafe { v4l2::ioctl(fd, vidioc::VIDIOC_QBUF, &mut buf as *mut _ as *mut c_void) }
    }

    fn dequeue(&mut self) -> io::Result<BufferInfo> {
        let fd = self.fd()?;
        let mut buf = Self::buffer_request(0);
        // SAFETY: `buf` outlives the call and matches VIDIOC_DQBUF.
        unsafe {
            v4l2::ioctl(fd, vidioc::VIDIOC_DQBUF, &mut buf as *mut _ as *mut c_void)?;
        }
        Ok(BufferInfo {
            index: buf.index,
            bytes_used: buf.bytesused,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMON)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMOFF)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut watches = [Watch::new(self.fd()?)];
        match readiness::wait_readable(&mut watches, timeout) {
            Ok(_) => Ok(watches[0].ready),
            // A signal ends the wait early; the caller treats it as no frame
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.fd().ok()
    }

    fn close(&mut self) {
        // Dropping the device closes its handle
        self.device.take();
    }
}
