//! Planar colour conversion and damage-rectangle copies.
//!
//! Source tiles are NV12: a luma plane of `tile_width × tile_height` bytes
//! followed by an interleaved U/V plane with the same row pitch and half the
//! rows. Damage rectangles are in screen coordinates; the destination picture
//! starts at `(left, top)` and is `padded_width × padded_height` luma samples.
//!
//! Each rectangle is copied independently, in list order, so overlapping
//! rectangles resolve last-wins. Rectangles are clipped to both the source
//! tile and the destination picture first.

use super::types::{PixelFormat, Rect};

/// Geometry shared by every copy in one encode call.
#[derive(Debug, Clone, Copy)]
pub struct CopyGeometry {
    pub left: i32,
    pub top: i32,
    pub tile_width: usize,
    pub tile_height: usize,
    pub padded_width: usize,
    pub padded_height: usize,
}

impl CopyGeometry {
    fn clip(&self, rect: &Rect) -> Option<Rect> {
        let source = Rect::new(0, 0, self.tile_width as i32, self.tile_height as i32);
        let dest = Rect::new(
            self.left,
            self.top,
            self.padded_width as i32,
            self.padded_height as i32,
        );
        rect.intersect(&source)?.intersect(&dest)
    }

    /// Chroma copy for a clipped rectangle. The destination starts at
    /// `((x - left) / 2, (y - top) / 2)` and the span is cut to both the
    /// source chroma plane and the destination picture.
    fn chroma_span(&self, r: &Rect) -> Option<ChromaSpan> {
        // `clip` guarantees `r.x >= max(0, left)` and `r.y >= max(0, top)`.
        let src_x = (r.x / 2) as usize;
        let src_y = (r.y / 2) as usize;
        let dst_x = ((r.x - self.left) / 2) as usize;
        let dst_y = ((r.y - self.top) / 2) as usize;
        let cols = (r.width as usize)
            .div_ceil(2)
            .min((self.tile_width / 2).saturating_sub(src_x))
            .min((self.padded_width / 2).saturating_sub(dst_x));
        let rows = (r.height as usize)
            .div_ceil(2)
            .min(self.tile_height.div_ceil(2).saturating_sub(src_y))
            .min((self.padded_height / 2).saturating_sub(dst_y));
        (cols > 0 && rows > 0).then_some(ChromaSpan {
            src_x,
            src_y,
            dst_x,
            dst_y,
            cols,
            rows,
        })
    }
}

/// Chroma-sample rectangle to copy, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChromaSpan {
    src_x: usize,
    src_y: usize,
    dst_x: usize,
    dst_y: usize,
    cols: usize,
    rows: usize,
}

/// Copy the luma samples of `rects` into a plane with pitch `padded_width`.
fn copy_luma(src: &[u8], dst: &mut [u8], geo: &CopyGeometry, rects: &[Rect]) {
    for r in rects.iter().filter_map(|r| geo.clip(r)) {
        let cx = r.width as usize;
        let dx = (r.x - geo.left) as usize;
        for row in 0..r.height as usize {
            let sy = r.y as usize + row;
            let dy = (r.y - geo.top) as usize + row;
            let s = sy * geo.tile_width + r.x as usize;
            let d = dy * geo.padded_width + dx;
            dst[d..d + cx].copy_from_slice(&src[s..s + cx]);
        }
    }
}

/// Copy damaged areas of an NV12 tile into an I420 picture, splitting the
/// interleaved chroma into separate U and V planes.
///
/// `dst` must hold at least `padded_width * padded_height * 3 / 2` bytes.
pub fn nv12_to_i420(src: &[u8], dst: &mut [u8], geo: &CopyGeometry, rects: &[Rect]) {
    let luma_len = geo.padded_width * geo.padded_height;
    let chroma_pitch = geo.padded_width / 2;
    let chroma_len = chroma_pitch * (geo.padded_height / 2);

    let (y_plane, rest) = dst.split_at_mut(luma_len);
    let (u_plane, rest) = rest.split_at_mut(chroma_len);
    let v_plane = &mut rest[..chroma_len];

    copy_luma(src, y_plane, geo, rects);

    let uv = &src[geo.tile_width * geo.tile_height..];
    for span in rects.iter().filter_map(|r| geo.clip(r)).filter_map(|r| geo.chroma_span(&r)) {
        for row in 0..span.rows {
            let s_row = (span.src_y + row) * geo.tile_width + span.src_x * 2;
            let d_row = (span.dst_y + row) * chroma_pitch + span.dst_x;
            for col in 0..span.cols {
                u_plane[d_row + col] = uv[s_row + col * 2];
                v_plane[d_row + col] = uv[s_row + col * 2 + 1];
            }
        }
    }
}

/// Copy damaged areas of an NV12 tile into an NV12 picture whose planes
/// both have pitch `padded_width`.
///
/// `dst` must hold at least `padded_width * padded_height * 3 / 2` bytes.
pub fn nv12_to_nv12(src: &[u8], dst: &mut [u8], geo: &CopyGeometry, rects: &[Rect]) {
    let luma_len = geo.padded_width * geo.padded_height;
    let (y_plane, uv_plane) = dst.split_at_mut(luma_len);

    copy_luma(src, y_plane, geo, rects);

    let uv = &src[geo.tile_width * geo.tile_height..];
    for span in rects.iter().filter_map(|r| geo.clip(r)).filter_map(|r| geo.chroma_span(&r)) {
        let bytes = span.cols * 2;
        for row in 0..span.rows {
            let s = (span.src_y + row) * geo.tile_width + span.src_x * 2;
            let d = (span.dst_y + row) * geo.padded_width + span.dst_x * 2;
            uv_plane[d..d + bytes].copy_from_slice(&uv[s..s + bytes]);
        }
    }
}

/// Convert damaged areas of a packed 32-bit RGB tile into an NV12 tile of the
/// same dimensions (BT.601, limited range). Chroma is averaged over each 2×2
/// block.
///
/// `dst` must hold `PixelFormat::Nv12.tile_len(width, height)` bytes.
pub fn packed_rgb_to_nv12(
    src: &[u8],
    format: PixelFormat,
    width: usize,
    height: usize,
    rects: &[Rect],
    dst: &mut [u8],
) {
    let (ri, bi) = match format {
        PixelFormat::Rgba32 => (0, 2),
        _ => (2, 0),
    };
    let rgb = |x: usize, y: usize| -> (i32, i32, i32) {
        let p = (y * width + x) * 4;
        (src[p + ri] as i32, src[p + 1] as i32, src[p + bi] as i32)
    };

    let (y_plane, uv_plane) = dst.split_at_mut(width * height);
    let tile = Rect::new(0, 0, width as i32, height as i32);

    for r in rects.iter().filter_map(|r| r.intersect(&tile)) {
        let (x0, y0) = (r.x as usize, r.y as usize);
        let (x1, y1) = (x0 + r.width as usize, y0 + r.height as usize);

        for y in y0..y1 {
            for x in x0..x1 {
                let (rr, g, b) = rgb(x, y);
                y_plane[y * width + x] = (((66 * rr + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
            }
        }

        for cy in y0 / 2..y1.div_ceil(2) {
            for cx in x0 / 2..(x1.div_ceil(2)).min(width / 2) {
                let (mut rs, mut gs, mut bs, mut n) = (0, 0, 0, 0);
                for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (px, py) = (cx * 2 + x, cy * 2 + y);
                    if px < width && py < height {
                        let (rr, g, b) = rgb(px, py);
                        rs += rr;
                        gs += g;
                        bs += b;
                        n += 1;
                    }
                }
                let (rr, g, b) = (rs / n, gs / n, bs / n);
                let d = cy * width + cx * 2;
                uv_plane[d] = (((-38 * rr - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
                uv_plane[d + 1] = (((112 * rr - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
