//! Pixel and geometry types shared by the backends and the pipeline.

use crate::error::CommandError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Layout of the pixel data handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Full-resolution luma plane of `tile_width × tile_height` bytes,
    /// followed by an interleaved U/V plane at half height.
    Nv12,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha/unused (X server default).
    Bgra32,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha/unused.
    Rgba32,
}

impl PixelFormat {
    /// Wire code used in GFX command headers.
    pub const fn code(self) -> u8 {
        match self {
            PixelFormat::Nv12 => 0,
            PixelFormat::Bgra32 => 1,
            PixelFormat::Rgba32 => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, CommandError> {
        match code {
            0 => Ok(PixelFormat::Nv12),
            1 => Ok(PixelFormat::Bgra32),
            2 => Ok(PixelFormat::Rgba32),
            other => Err(CommandError::UnknownFormat(other)),
        }
    }

    /// Whether the data must be converted before an H.264 backend sees it.
    pub const fn is_packed_rgb(self) -> bool {
        matches!(self, PixelFormat::Bgra32 | PixelFormat::Rgba32)
    }

    /// Bytes needed for a `width × height` tile in this format.
    pub const fn tile_len(self, width: usize, height: usize) -> usize {
        match self {
            PixelFormat::Nv12 => width * height + width * height.div_ceil(2),
            PixelFormat::Bgra32 | PixelFormat::Rgba32 => width * height * 4,
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// A damage rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Intersection with `other`, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x.saturating_add(self.width).min(other.x.saturating_add(other.width));
        let y1 = self.y.saturating_add(self.height).min(other.y.saturating_add(other.height));
        let r = Rect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0));
        (!r.is_empty()).then_some(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_tile_len_rounds_chroma_rows_up() {
        assert_eq!(PixelFormat::Nv12.tile_len(64, 64), 64 * 64 + 64 * 32);
        assert_eq!(PixelFormat::Nv12.tile_len(4, 3), 12 + 8);
        assert_eq!(PixelFormat::Bgra32.tile_len(4, 3), 48);
    }

    #[test]
    fn format_codes_roundtrip() {
        for f in [PixelFormat::Nv12, PixelFormat::Bgra32, PixelFormat::Rgba32] {
            assert_eq!(PixelFormat::from_code(f.code()).unwrap(), f);
        }
        assert!(PixelFormat::from_code(9).is_err());
    }

    #[test]
    fn intersect_clips() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
        assert_eq!(a.intersect(&Rect::new(20, 20, 1, 1)), None);
    }

    #[test]
    fn intersect_saturates_at_extremes() {
        let huge = Rect::new(i32::MAX - 1, i32::MAX - 1, i32::MAX, i32::MAX);
        let tile = Rect::new(0, 0, 64, 64);
        assert_eq!(huge.intersect(&tile), None);

        let far_left = Rect::new(i32::MIN, 0, 16, 16);
        assert_eq!(far_left.intersect(&tile), None);

        let wide = Rect::new(-8, -8, i32::MAX, i32::MAX);
        assert_eq!(wide.intersect(&tile), Some(tile));
    }
}
