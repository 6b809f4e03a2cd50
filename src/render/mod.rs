//! Decode-and-blit of compressed frames onto a display surface

mod decoder;

pub use decoder::{DecodeError, DecodedImage, FrameDecoder, JpegDecoder};

use log::debug;

use crate::display::{Geometry, Surface};

/// How a surface stores one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 32 bpp: blue, green, red, zero
    Bgrx32,
    /// 24 bpp: blue, green, red
    Bgr24,
    /// Any other depth; nothing is drawn
    Unsupported(u32),
}

impl PixelLayout {
    pub fn from_bits_per_pixel(bits_per_pixel: u32) -> Self {
        match bits_per_pixel {
            32 => PixelLayout::Bgrx32,
            24 => PixelLayout::Bgr24,
            other => PixelLayout::Unsupported(other),
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Bgrx32 => 4,
            PixelLayout::Bgr24 => 3,
            PixelLayout::Unsupported(bits) => (*bits / 8) as usize,
        }
    }

    #[inline]
    fn write(&self, dst: &mut [u8], rgb: &[u8]) {
        match self {
            PixelLayout::Bgrx32 => {
                dst[0] = rgb[2];
                dst[1] = rgb[1];
                dst[2] = rgb[0];
                dst[3] = 0;
            }
            PixelLayout::Bgr24 => {
                dst[0] = rgb[2];
                dst[1] = rgb[1];
                dst[2] = rgb[0];
            }
            PixelLayout::Unsupported(_) => {}
        }
    }
}

/// Top-left corner of the image on the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x_offset: u32,
    pub y_offset: u32,
}

impl Placement {
    /// Centers the image, pinning it to the top-left edge when it is larger
    pub fn centered(surface: &Geometry, image_width: u32, image_height: u32) -> Self {
        Self {
            x_offset: surface.width.saturating_sub(image_width) / 2,
            y_offset: surface.height.saturating_sub(image_height) / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSummary {
    pub image_width: u32,
    pub image_height: u32,
    pub placement: Placement,
    pub layout: PixelLayout,
    pub rows_written: u32,
}

pub struct FrameRenderer<D: FrameDecoder> {
    decoder: D,
    warned_unsupported: bool,
}

impl<D: FrameDecoder> FrameRenderer<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            warned_unsupported: false,
        }
    }

    /// Decodes `data` and draws it centered on `surface`, clipping whatever
    /// falls outside. On a decode error the surface is left untouched.
    pub fn render<S: Surface + ?Sized>(
        &mut self,
        data: &[u8],
        surface: &mut S,
    ) -> Result<RenderSummary, DecodeError> {
        let image = self.decoder.decode(data)?;
        let geometry = surface.geometry();
        let layout = PixelLayout::from_bits_per_pixel(geometry.bits_per_pixel);
        let placement = Placement::centered(&geometry, image.width(), image.height());

        if let PixelLayout::Unsupported(bits) = layout {
            if !self.warned_unsupported {
                debug!("{} bpp surfaces are not supported, frames are not drawn", bits);
                self.warned_unsupported = true;
            }
        }

        let rows_written = blit(&image, surface.pixels_mut(), &geometry, layout, placement);

        Ok(RenderSummary {
            image_width: image.width(),
            image_height: image.height(),
            placement,
            layout,
            rows_written,
        })
    }
}

fn blit(
    image: &DecodedImage,
    pixels: &mut [u8],
    geometry: &Geometry,
    layout: PixelLayout,
    placement: Placement,
) -> u32 {
    if let PixelLayout::Unsupported(_) = layout {
        return 0;
    }

    let bpp = layout.bytes_per_pixel();
    let stride = geometry.row_stride as usize;
    let visible_cols = image
        .width()
        .min(geometry.width.saturating_sub(placement.x_offset)) as usize;
    let mut rows_written = 0;

    for (r, rgb_row) in image.rows().enumerate() {
        let y = r as u32 + placement.y_offset;
        if y >= geometry.height {
            break;
        }

        let row_base = y as usize * stride + placement.x_offset as usize * bpp;
        let row_end = (row_base + visible_cols * bpp).min(pixels.len());
        if row_base >= row_end {
            // Past the end of the mapping
            break;
        }

        let dst_row = &mut pixels[row_base..row_end];
        for (dst, rgb) in dst_row.chunks_exact_mut(bpp).zip(rgb_row.chunks_exact(3)) {
            layout.write(dst, rgb);
        }
        rows_written += 1;
    }

    rows_written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::MemorySurface;
    use assert_matches::assert_matches;
    use rstest::rstest;

    /// Solid-color images described in the frame bytes: [w, h, r, g, b]
    struct SolidDecoder;

    impl FrameDecoder for SolidDecoder {
        fn decode(&mut self, data: &[u8]) -> Result<DecodedImage, DecodeError> {
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
                _ => Err(DecodeError::Header("bad test frame".into())),
            }
        }
    }

    fn painted(surface: &MemorySurface, x: u32, y: u32) -> bool {
        surface.pixel(x, y).iter().any(|&b| b != 0)
    }

    #[test]
    fn test_layout_from_depth() {
        assert_eq!(PixelLayout::from_bits_per_pixel(32), PixelLayout::Bgrx32);
        assert_eq!(PixelLayout::from_bits_per_pixel(24), PixelLayout::Bgr24);
        assert_eq!(
            PixelLayout::from_bits_per_pixel(16),
            PixelLayout::Unsupported(16)
        );
    }

    #[test]
    fn test_placement_is_clamped() {
        let g = Geometry::packed(100, 50, 32);
        assert_eq!(
            Placement::centered(&g, 40, 20),
            Placement { x_offset: 30, y_offset: 15 }
        );
        assert_eq!(
            Placement::centered(&g, 400, 200),
            Placement { x_offset: 0, y_offset: 0 }
        );
    }

    #[test]
    fn test_bgrx32_byte_order() {
        let mut surface = MemorySurface::new(Geometry::packed(1, 1, 32));
        let mut renderer = FrameRenderer::new(SolidDecoder);
        renderer.render(&[1, 1, 10, 20, 30], &mut surface).unwrap();
        assert_eq!(surface.pixel(0, 0), &[30, 20, 10, 0]);
    }

    #[test]
    fn test_bgr24_byte_order() {
        let mut surface = MemorySurface::new(Geometry::packed(1, 1, 24));
        let mut renderer = FrameRenderer::new(SolidDecoder);
        renderer.render(&[1, 1, 10, 20, 30], &mut surface).unwrap();
        assert_eq!(surface.pixel(0, 0), &[30, 20, 10]);
    }

    #[test]
    fn test_alpha_byte_is_cleared() {
        let mut surface = MemorySurface::new(Geometry::packed(1, 1, 32));
        surface.pixels_mut().fill(0xFF);
        let mut renderer = FrameRenderer::new(SolidDecoder);
        renderer.render(&[1, 1, 1, 2, 3], &mut surface).unwrap();
        assert_eq!(surface.pixel(0, 0), &[3, 2, 1, 0]);
    }

    #[rstest]
    #[case(24, 8, 6)]
    #[case(32, 8, 6)]
    #[case(24, 20, 10)]
    #[case(32, 20, 10)]
    #[case(32, 1, 1)]
    #[case(24, 7, 3)]
    fn test_centered_and_bounded(#[case] bits: u32, #[case] w: u8, #[case] h: u8) {
        let geometry = Geometry::packed(20, 10, bits);
        let mut surface = MemorySurface::new(geometry);
        let mut renderer = FrameRenderer::new(SolidDecoder);

        let summary = renderer.render(&[w, h, 9, 9, 9], &mut surface).unwrap();
        let x0 = (20 - w as u32) / 2;
        let y0 = (10 - h as u32) / 2;
        assert_eq!(summary.placement, Placement { x_offset: x0, y_offset: y0 });
        assert_eq!(summary.rows_written, h as u32);

        for y in 0..10 {
            for x in 0..20 {
                let inside = x >= x0 && x < x0 + w as u32 && y >= y0 && y < y0 + h as u32;
                assert_eq!(painted(&surface, x, y), inside, "pixel ({}, {})", x, y);
            }
        }
    }

    #[rstest]
    #[case(24)]
    #[case(32)]
    fn test_oversized_image_is_clipped(#[case] bits: u32) {
        // Padding after each row must stay untouched
        let geometry = Geometry {
            width: 4,
            height: 3,
            bits_per_pixel: bits,
            row_stride: 4 * bits / 8 + 8,
        };
        let mut surface = MemorySurface::new(geometry);
        let mut renderer = FrameRenderer::new(SolidDecoder);

        let summary = renderer.render(&[10, 9, 5, 5, 5], &mut surface).unwrap();
        assert_eq!(summary.placement, Placement { x_offset: 0, y_offset: 0 });
        assert_eq!(summary.rows_written, 3);

        let bpp = (bits / 8) as usize;
        for y in 0..3usize {
            let row = &surface.pixels()[y * geometry.row_stride as usize..][..geometry.row_stride as usize];
            assert!(row[..4 * bpp].iter().any(|&b| b != 0));
            assert!(row[4 * bpp..].iter().all(|&b| b == 0), "row {} padding written", y);
        }
    }

    #[test]
    fn test_writes_stop_at_mapping_end() {
        // A stride wider than the mapped length must not write out of bounds
        let geometry = Geometry {
            width: 2,
            height: 4,
            bits_per_pixel: 32,
            row_stride: 64,
        };
        let mut renderer = FrameRenderer::new(SolidDecoder);
        let mut pixels = vec![0u8; geometry.surface_len()];
        let image = SolidDecoder.decode(&[2, 4, 1, 1, 1]).unwrap();
        let rows = blit(
            &image,
            &mut pixels,
            &geometry,
            PixelLayout::Bgrx32,
            Placement { x_offset: 0, y_offset: 0 },
        );
        assert_eq!(rows, 1);

        let mut surface = MemorySurface::new(geometry);
        assert!(renderer.render(&[2, 4, 1, 1, 1], &mut surface).is_ok());
    }

    #[test]
    fn test_16bpp_draws_nothing() {
        let mut surface = MemorySurface::new(Geometry::packed(8, 8, 16));
        let mut renderer = FrameRenderer::new(SolidDecoder);

        let summary = renderer.render(&[4, 4, 255, 255, 255], &mut surface).unwrap();
        assert_eq!(summary.layout, PixelLayout::Unsupported(16));
        assert_eq!(summary.rows_written, 0);
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_failure_leaves_surface_untouched() {
        let mut surface = MemorySurface::new(Geometry::packed(4, 4, 32));
        surface.pixels_mut().fill(7);
        let mut renderer = FrameRenderer::new(SolidDecoder);

        let err = renderer.render(b"garbage", &mut surface).unwrap_err();
        assert_matches!(err, DecodeError::Header(_));
        assert!(surface.pixels().iter().all(|&b| b == 7));
    }
}
