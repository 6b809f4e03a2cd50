//! Display surfaces the renderer can draw into

mod fb;

pub use fb::{FixScreenInfo, VarScreenInfo};

use log::info;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use thiserror::Error;

use fb::FbMapping;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("cannot open framebuffer device {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("error reading variable screen information: {0}")]
    VarInfo(io::Error),

    #[error("error reading fixed screen information: {0}")]
    FixInfo(io::Error),

    #[error("framebuffer reports an empty surface ({width}x{height}, {bits_per_pixel} bpp)")]
    EmptySurface {
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    },

    #[error("failed to map framebuffer device to memory: {0}")]
    Map(io::Error),
}

/// Screen layout, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    /// Bytes between the starts of consecutive rows
    pub row_stride: u32,
}

impl Geometry {
    /// Geometry with rows packed back to back
    pub fn packed(width: u32, height: u32, bits_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bits_per_pixel,
            row_stride: width * bits_per_pixel / 8,
        }
    }

    fn from_screen_info(var: &VarScreenInfo, fix: &FixScreenInfo) -> Self {
        let mut geometry = Self::packed(var.xres, var.yres, var.bits_per_pixel);
        if fix.line_length != 0 {
            geometry.row_stride = fix.line_length;
        }
        geometry
    }

    /// Mapped size: width x height x bpp / 8
    pub fn surface_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bits_per_pixel as usize / 8
    }
}

/// Pixel memory the renderer writes into
pub trait Surface {
    fn geometry(&self) -> Geometry;

    /// The writable pixel bytes; empty once released
    fn pixels_mut(&mut self) -> &mut [u8];

    /// Releases the underlying memory. Must be idempotent.
    fn release(&mut self) {}
}

/// The memory-mapped framebuffer device
pub struct DisplaySurface {
    geometry: Geometry,
    mapping: Option<FbMapping>,
    file: Option<File>,
}

impl DisplaySurface {
    pub fn initialize<P: AsRef<Path>>(path: P) -> Result<Self, DisplayError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DisplayError::Open {
                path: path.display().to_string(),
                source,
            })?;

        let var = fb::read_var_info(&file).map_err(DisplayError::VarInfo)?;
        info!(
            "Framebuffer: {}x{}, {} bpp",
            var.xres, var.yres, var.bits_per_pixel
        );
        let fix = fb::read_fix_info(&file).map_err(DisplayError::FixInfo)?;

        let geometry = Geometry::from_screen_info(&var, &fix);
        let len = geometry.surface_len();
        if len == 0 {
            return Err(DisplayError::EmptySurface {
                width: geometry.width,
                height: geometry.height,
                bits_per_pixel: geometry.bits_per_pixel,
            });
        }

        let mapping = FbMapping::map(&file, len).map_err(DisplayError::Map)?;
        info!(
            "Mapped {} ({}) {} bytes, stride {}",
            path.display(),
            fix.id(),
            mapping.len(),
            geometry.row_stride
        );

        Ok(Self {
            geometry,
            mapping: Some(mapping),
            file: Some(file),
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Unmaps the surface and closes the device; later calls do nothing
    pub fn teardown(&mut self) {
        if self.mapping.take().is_some() {
            info!("Framebuffer unmapped.");
        }
        self.file.take();
    }
}

impl Surface for DisplaySurface {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        match self.mapping.as_mut() {
            Some(mapping) => mapping.as_mut_slice(),
            None => &mut [],
        }
    }

    fn release(&mut self) {
        self.teardown();
    }
}

impl Drop for DisplaySurface {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Heap-backed surface with the framebuffer's geometry model
#[derive(Debug, Clone)]
pub struct MemorySurface {
    geometry: Geometry,
    pixels: Vec<u8>,
}

impl MemorySurface {
    /// Allocates `row_stride * height` bytes, zeroed
    pub fn new(geometry: Geometry) -> Self {
        let len = geometry.row_stride as usize * geometry.height as usize;
        Self {
            geometry,
            pixels: vec![0; len.max(geometry.surface_len())],
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = (self.geometry.bits_per_pixel / 8).max(1) as usize;
        let base = y as usize * self.geometry.row_stride as usize + x as usize * bpp;
        &self.pixels[base..base + bpp]
    }
}

impl Surface for MemorySurface {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}
