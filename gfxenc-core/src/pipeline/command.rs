//! Commands accepted by the encode pipeline.
//!
//! A GFX command carries its geometry in a little-endian header:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | surface id (selects the encoder slot)   |
//! | 4      | 2    | left (i16)                              |
//! | 6      | 2    | top (i16)                               |
//! | 8      | 2    | width                                   |
//! | 10     | 2    | height                                  |
//! | 12     | 2    | tile width                              |
//! | 14     | 2    | tile height                             |
//! | 16     | 1    | pixel format code                       |
//! | 17     | 1    | flags (bit 0: frame id present)         |
//! | 18     | 2    | damage rectangle count                  |
//! | 20     | 4    | frame id                                |
//! | 24     | 8·n  | rectangles: x, y (i16), width, height   |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::encoder::types::{PixelFormat, Rect};
use crate::error::CommandError;

/// Fixed part of a GFX header.
pub const GFX_HEADER_LEN: usize = 24;
const GFX_RECT_LEN: usize = 8;
const GFX_FLAG_FRAME_ID: u8 = 0x01;

// ── SurfaceUpdate ────────────────────────────────────────────────

/// Damaged screen regions of one surface, ready to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceUpdate {
    /// Pixels of the whole tile, `tile_width` bytes per luma row.
    pub data: Bytes,
    pub rects: Vec<Rect>,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub tile_width: usize,
    pub tile_height: usize,
    pub format: PixelFormat,
    pub channel_id: u32,
    pub frame_id: Option<u32>,
}

impl SurfaceUpdate {
    /// Bytes `data` must hold for the declared tile.
    pub fn required_len(&self) -> usize {
        self.format.tile_len(self.tile_width, self.tile_height)
    }

    pub fn check_data(&self) -> Result<(), CommandError> {
        let needed = self.required_len();
        if !self.data.is_empty() && self.data.len() < needed {
            return Err(CommandError::PixelDataTooShort {
                needed,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

// ── GfxFrameHeader ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfxFrameHeader {
    pub surface_id: u32,
    pub left: i16,
    pub top: i16,
    pub width: u16,
    pub height: u16,
    pub tile_width: u16,
    pub tile_height: u16,
    pub format: PixelFormat,
    pub frame_id: Option<u32>,
    pub rects: Vec<Rect>,
}

impl GfxFrameHeader {
    pub fn decode(mut buf: &[u8]) -> Result<Self, CommandError> {
        if buf.remaining() < GFX_HEADER_LEN {
            return Err(CommandError::HeaderTooShort {
                needed: GFX_HEADER_LEN,
                actual: buf.remaining(),
            });
        }
        let total = buf.remaining();
        let surface_id = buf.get_u32_le();
        let left = buf.get_i16_le();
        let top = buf.get_i16_le();
        let width = buf.get_u16_le();
        let height = buf.get_u16_le();
        let tile_width = buf.get_u16_le();
        let tile_height = buf.get_u16_le();
        let format = PixelFormat::from_code(buf.get_u8())?;
        let flags = buf.get_u8();
        let rect_count = buf.get_u16_le() as usize;
        let raw_frame_id = buf.get_u32_le();

        let needed = GFX_HEADER_LEN + rect_count * GFX_RECT_LEN;
        if total < needed {
            return Err(CommandError::HeaderTooShort {
                needed,
                actual: total,
            });
        }
        let rects = (0..rect_count)
            .map(|_| {
                let x = buf.get_i16_le() as i32;
                let y = buf.get_i16_le() as i32;
                let w = buf.get_u16_le() as i32;
                let h = buf.get_u16_le() as i32;
                Rect::new(x, y, w, h)
            })
            .collect();

        Ok(Self {
            surface_id,
            left,
            top,
            width,
            height,
            tile_width,
            tile_height,
            format,
            frame_id: (flags & GFX_FLAG_FRAME_ID != 0).then_some(raw_frame_id),
            rects,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(GFX_HEADER_LEN + self.rects.len() * GFX_RECT_LEN);
        buf.put_u32_le(self.surface_id);
        buf.put_i16_le(self.left);
        buf.put_i16_le(self.top);
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u16_le(self.tile_width);
        buf.put_u16_le(self.tile_height);
        buf.put_u8(self.format.code());
        buf.put_u8(if self.frame_id.is_some() {
            GFX_FLAG_FRAME_ID
        } else {
            0
        });
        buf.put_u16_le(self.rects.len() as u16);
        buf.put_u32_le(self.frame_id.unwrap_or(0));
        for r in &self.rects {
            buf.put_i16_le(r.x as i16);
            buf.put_i16_le(r.y as i16);
            buf.put_u16_le(r.width as u16);
            buf.put_u16_le(r.height as u16);
        }
        buf.freeze()
    }
}

// ── EncodeCommand ────────────────────────────────────────────────

/// A command for the dynamic graphics channel: encoded header plus pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfxCommand {
    pub header: Bytes,
    pub payload: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeCommand {
    SurfaceUpdate(SurfaceUpdate),
    Gfx(GfxCommand),
}

impl EncodeCommand {
    pub fn is_gfx(&self) -> bool {
        matches!(self, EncodeCommand::Gfx(_))
    }

    /// Frame id carried by the command. Malformed GFX headers carry none.
    pub fn frame_id(&self) -> Option<u32> {
        match self {
            EncodeCommand::SurfaceUpdate(u) => u.frame_id,
            EncodeCommand::Gfx(g) => GfxFrameHeader::decode(&g.header).ok()?.frame_id,
        }
    }

    /// Resolve the command into the surface update it describes.
    ///
    /// A GFX command without a payload initialises its encoder slot only,
    /// unless its header names damage rectangles.
    pub fn into_surface(self) -> Result<SurfaceUpdate, CommandError> {
        let update = match self {
            EncodeCommand::SurfaceUpdate(u) => u,
            EncodeCommand::Gfx(GfxCommand { header, payload }) => {
                let h = GfxFrameHeader::decode(&header)?;
                if payload.is_none() && !h.rects.is_empty() {
                    return Err(CommandError::MissingPayload);
                }
                SurfaceUpdate {
                    data: payload.unwrap_or_default(),
                    rects: h.rects,
                    left: h.left as i32,
                    top: h.top as i32,
                    width: h.width as i32,
                    height: h.height as i32,
                    tile_width: h.tile_width as usize,
                    tile_height: h.tile_height as usize,
                    format: h.format,
                    channel_id: h.surface_id,
                    frame_id: h.frame_id,
                }
            }
        };
        update.check_data()?;
        Ok(update)
    }
}

impl From<SurfaceUpdate> for EncodeCommand {
    fn from(update: SurfaceUpdate) -> Self {
        EncodeCommand::SurfaceUpdate(update)
    }
}

impl From<GfxCommand> for EncodeCommand {
    fn from(cmd: GfxCommand) -> Self {
        EncodeCommand::Gfx(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> GfxFrameHeader {
        GfxFrameHeader {
            surface_id: 3,
            left: -16,
            top: 32,
            width: 64,
            height: 48,
            tile_width: 128,
            tile_height: 96,
            format: PixelFormat::Nv12,
            frame_id: Some(77),
            rects: vec![Rect::new(0, 32, 16, 16), Rect::new(10, 40, 5, 6)],
        }
    }

    #[test]
    fn header_layout_is_little_endian() {
        let bytes = header().encode();
        assert_eq!(bytes.len(), GFX_HEADER_LEN + 2 * 8);
        assert_eq!(&bytes[0..4], &[3, 0, 0, 0]);
        assert_eq!(&bytes[4..6], &(-16i16).to_le_bytes());
        assert_eq!(bytes[16], PixelFormat::Nv12.code());
        assert_eq!(bytes[17], GFX_FLAG_FRAME_ID);
        assert_eq!(&bytes[20..24], &77u32.to_le_bytes());
        assert_eq!(GfxFrameHeader::decode(&bytes).unwrap(), header());
    }

    #[test]
    fn frame_id_absent_when_flag_clear() {
        let mut h = header();
        h.frame_id = None;
        let decoded = GfxFrameHeader::decode(&h.encode()).unwrap();
        assert_eq!(decoded.frame_id, None);
    }

    #[test]
    fn truncated_headers_are_rejected() {
        assert_eq!(
            GfxFrameHeader::decode(&[0u8; 10]),
            Err(CommandError::HeaderTooShort {
                needed: GFX_HEADER_LEN,
                actual: 10
            })
        );
        let bytes = header().encode();
        assert_eq!(
            GfxFrameHeader::decode(&bytes[..GFX_HEADER_LEN + 8]),
            Err(CommandError::HeaderTooShort {
                needed: GFX_HEADER_LEN + 16,
                actual: GFX_HEADER_LEN + 8
            })
        );
    }

    #[test]
    fn unknown_format_is_rejected() {
        let mut raw = BytesMut::from(&header().encode()[..]);
        raw[16] = 0x42;
        assert_eq!(
            GfxFrameHeader::decode(&raw),
            Err(CommandError::UnknownFormat(0x42))
        );
    }

    #[test]
    fn gfx_command_resolves_to_surface() {
        let h = header();
        let payload = Bytes::from(vec![0u8; PixelFormat::Nv12.tile_len(128, 96)]);
        let cmd = EncodeCommand::from(GfxCommand {
            header: h.encode(),
            payload: Some(payload),
        });
        assert!(cmd.is_gfx());
        assert_eq!(cmd.frame_id(), Some(77));

        let u = cmd.into_surface().unwrap();
        assert_eq!(u.channel_id, 3);
        assert_eq!((u.left, u.top, u.width, u.height), (-16, 32, 64, 48));
        assert_eq!(u.rects.len(), 2);
    }

    #[test]
    fn gfx_rects_without_payload_are_rejected() {
        let cmd = EncodeCommand::Gfx(GfxCommand {
            header: header().encode(),
            payload: None,
        });
        assert_eq!(cmd.into_surface(), Err(CommandError::MissingPayload));

        let mut h = header();
        h.rects.clear();
        let cmd = EncodeCommand::Gfx(GfxCommand {
            header: h.encode(),
            payload: None,
        });
        assert!(cmd.into_surface().unwrap().data.is_empty());
    }

    #[test]
    fn short_pixel_data_is_rejected() {
        let update = SurfaceUpdate {
            data: Bytes::from_static(&[0; 10]),
            rects: vec![],
            left: 0,
            top: 0,
            width: 4,
            height: 4,
            tile_width: 4,
            tile_height: 4,
            format: PixelFormat::Bgra32,
            channel_id: 0,
            frame_id: None,
        };
        assert_eq!(
            EncodeCommand::from(update).into_surface(),
            Err(CommandError::PixelDataTooShort {
                needed: 64,
                actual: 10
            })
        );
    }
}
