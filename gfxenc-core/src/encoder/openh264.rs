//! OpenH264 codec backend.
//!
//! Damage rectangles of an NV12 tile are copied into a padded I420 scratch
//! picture, which is encoded by the slot's native session. Every NAL unit
//! of every layer is appended to the destination in bitstream order.

use tracing::trace;

use super::backend::{CodecBackend, CodecId, EncodeOutcome, EncodeRequest};
use super::convert::{CopyGeometry, nv12_to_i420};
use super::native::{NativeEngine, NativeOutput, PlaneLayout, Picture};
use super::pool::{EncoderPool, align_to_16};
use crate::connection::ParamTable;
use crate::error::BackendError;
use crate::gfx_config::OpenH264Params;

pub struct OpenH264Backend<E> {
    engine: E,
    table: ParamTable<OpenH264Params>,
    pool: EncoderPool,
}

impl<E: NativeEngine<Params = OpenH264Params>> OpenH264Backend<E> {
    pub fn new(engine: E, table: ParamTable<OpenH264Params>) -> Self {
        Self {
            engine,
            table,
            pool: EncoderPool::new(),
        }
    }

    pub fn pool(&self) -> &EncoderPool {
        &self.pool
    }
}

/// Append every NAL of `layers` to `dest`, failing on the first one that
/// does not fit.
fn write_layers(output: &NativeOutput, dest: &mut [u8]) -> Result<usize, BackendError> {
    let NativeOutput::Coded(layers) = output else {
        return Ok(0);
    };
    let mut written = 0;
    for nal in layers.iter().flat_map(|layer| layer.nals.iter()) {
        let end = written + nal.len();
        if end > dest.len() {
            return Err(BackendError::Overflow {
                needed: output.len(),
                capacity: dest.len(),
            });
        }
        dest[written..end].copy_from_slice(nal);
        written = end;
    }
    Ok(written)
}

impl<E: NativeEngine<Params = OpenH264Params>> CodecBackend for OpenH264Backend<E> {
    fn codec(&self) -> CodecId {
        CodecId::OpenH264
    }

    fn encode(
        &mut self,
        req: &EncodeRequest<'_>,
        dest: &mut [u8],
    ) -> Result<EncodeOutcome, BackendError> {
        req.validate()?;
        let params = self.table.for_encode(req.tuning_class());
        let flags = self
            .pool
            .prepare(&self.engine, req.channel_id, req.width, req.height, params)?;

        let Some((session, scratch)) = self.pool.slot_mut(req.channel_id).parts() else {
            return Ok(EncodeOutcome {
                bytes_written: 0,
                flags,
            });
        };
        if req.data.is_empty() {
            return Ok(EncodeOutcome {
                bytes_written: 0,
                flags,
            });
        }

        let geo = CopyGeometry {
            left: req.left,
            top: req.top,
            tile_width: req.tile_width,
            tile_height: req.tile_height,
            padded_width: align_to_16(req.width as usize),
            padded_height: align_to_16(req.height as usize),
        };
        nv12_to_i420(req.data, scratch, &geo, req.rects);

        let picture = Picture {
            width: geo.padded_width,
            height: geo.padded_height,
            layout: PlaneLayout::I420,
            data: scratch,
        };
        let output = session
            .encode(&picture)
            .map_err(|e| BackendError::EncodeFailed(e.to_string()))?;
        if output == NativeOutput::Skipped {
            return Err(BackendError::FrameSkipped);
        }

        let bytes_written = write_layers(&output, dest)?;
        trace!(
            channel = req.channel_id,
            rects = req.rects.len(),
            bytes_written,
            "OpenH264 frame encoded"
        );
        Ok(EncodeOutcome {
            bytes_written,
            flags,
        })
    }

    fn self_test(&self) -> bool {
        self.engine.self_test()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionType;
    use crate::encoder::backend::EncodeFlags;
    use crate::encoder::native::{NalLayer, NativeError, NativeSession, UnlinkedEngine};
    use crate::encoder::types::{PixelFormat, Rect};

    /// Emits one layer of two NALs: the picture's first luma byte, then the
    /// first U byte.
    struct FirstSampleSession;

    impl NativeSession for FirstSampleSession {
        fn encode(&mut self, p: &Picture<'_>) -> Result<NativeOutput, NativeError> {
            assert_eq!(p.layout, PlaneLayout::I420);
            Ok(NativeOutput::Coded(vec![NalLayer {
                nals: vec![vec![p.luma()[0]], vec![p.chroma().0[0]]],
            }]))
        }
    }

    struct FirstSampleEngine;

    impl NativeEngine for FirstSampleEngine {
        type Params = OpenH264Params;

        fn name(&self) -> &'static str {
            "first-sample"
        }

        fn open(
            &self,
            width: usize,
            height: usize,
            _: &OpenH264Params,
        ) -> Result<Box<dyn NativeSession>, NativeError> {
            assert_eq!((width % 16, height % 16), (0, 0));
            Ok(Box::new(FirstSampleSession))
        }
    }

    /// Emits the whole picture as three NALs: Y, U and V planes.
    struct PlaneDumpSession;

    impl NativeSession for PlaneDumpSession {
        fn encode(&mut self, p: &Picture<'_>) -> Result<NativeOutput, NativeError> {
            let (u, v) = p.chroma();
            Ok(NativeOutput::Coded(vec![NalLayer {
                nals: vec![p.luma().to_vec(), u.to_vec(), v.to_vec()],
            }]))
        }
    }

    struct PlaneDumpEngine;

    impl NativeEngine for PlaneDumpEngine {
        type Params = OpenH264Params;

        fn name(&self) -> &'static str {
            "plane-dump"
        }

        fn open(
            &self,
            _: usize,
            _: usize,
            _: &OpenH264Params,
        ) -> Result<Box<dyn NativeSession>, NativeError> {
            Ok(Box::new(PlaneDumpSession))
        }
    }

    /// NV12 tile where luma is `x + 3y` and chroma sample `(cx, cy)` holds
    /// U = `100 + cx`, V = `200 + cy`.
    fn gradient_tile(width: usize, height: usize) -> Vec<u8> {
        let mut t: Vec<u8> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x + 3 * y) as u8))
            .collect();
        for cy in 0..height / 2 {
            for cx in 0..width / 2 {
                t.push(100 + cx as u8);
                t.push(200 + cy as u8);
            }
        }
        t
    }

    /// Y, U and V planes of a 16×16 picture.
    fn planes(dest: &[u8]) -> (&[u8], &[u8], &[u8]) {
        let (y, rest) = dest.split_at(256);
        let (u, rest) = rest.split_at(64);
        (y, u, &rest[..64])
    }

    fn encode_region(
        backend: &mut OpenH264Backend<PlaneDumpEngine>,
        data: &[u8],
        (left, top): (i32, i32),
        (tile_width, tile_height): (usize, usize),
        rects: &[Rect],
    ) -> Vec<u8> {
        let req = EncodeRequest {
            left,
            top,
            tile_width,
            tile_height,
            ..request(data, rects)
        };
        let mut dest = vec![0u8; 384];
        let out = backend.encode(&req, &mut dest).unwrap();
        assert_eq!(out.bytes_written, 384);
        dest
    }

    fn tile() -> Vec<u8> {
        let mut t = vec![7u8; 16 * 16];
        t.extend(std::iter::repeat_n(9u8, 16 * 8));
        t
    }

    fn request<'a>(data: &'a [u8], rects: &'a [Rect]) -> EncodeRequest<'a> {
        EncodeRequest {
            channel_id: 4,
            left: 0,
            top: 0,
            width: 16,
            height: 16,
            tile_width: 16,
            tile_height: 16,
            format: PixelFormat::Nv12,
            data,
            rects,
            connection_type: ConnectionType::Lan,
        }
    }

    #[test]
    fn encodes_damaged_pixels() {
        let mut backend = OpenH264Backend::new(FirstSampleEngine, ParamTable::default());
        let data = tile();
        let rects = [Rect::new(0, 0, 16, 16)];
        let mut dest = [0u8; 8];

        let out = backend.encode(&request(&data, &rects), &mut dest).unwrap();
        assert_eq!(out.bytes_written, 2);
        assert_eq!(out.flags, EncodeFlags::CONTEXT_CREATED);
        assert_eq!(&dest[..2], &[7, 9]);
    }

    #[test]
    fn empty_data_only_initialises() {
        let mut backend = OpenH264Backend::new(FirstSampleEngine, ParamTable::default());
        let out = backend.encode(&request(&[], &[]), &mut []).unwrap();
        assert_eq!(out.bytes_written, 0);
        assert_eq!(out.flags, EncodeFlags::CONTEXT_CREATED);
        assert!(backend.pool().slot(4).is_live());
    }

    #[test]
    fn small_destination_overflows() {
        let mut backend = OpenH264Backend::new(FirstSampleEngine, ParamTable::default());
        let data = tile();
        let rects = [Rect::new(0, 0, 16, 16)];
        let mut dest = [0u8; 1];
        let err = backend.encode(&request(&data, &rects), &mut dest).unwrap_err();
        assert_eq!(
            err,
            BackendError::Overflow {
                needed: 2,
                capacity: 1
            }
        );
    }

    #[test]
    fn unlinked_library_cannot_create_context() {
        let mut backend = OpenH264Backend::new(
            UnlinkedEngine::<OpenH264Params>::new("OpenH264"),
            ParamTable::default(),
        );
        assert!(!backend.self_test());
        let err = backend.encode(&request(&[], &[]), &mut []).unwrap_err();
        assert!(matches!(err, BackendError::ContextCreate(_)));
    }

    #[test]
    fn concatenates_layers_in_order() {
        let out = NativeOutput::Coded(vec![
            NalLayer {
                nals: vec![vec![1], vec![2, 3]],
            },
            NalLayer {
                nals: vec![vec![4]],
            },
        ]);
        let mut dest = [0u8; 4];
        assert_eq!(write_layers(&out, &mut dest), Ok(4));
        assert_eq!(dest, [1, 2, 3, 4]);
    }

    #[test]
    fn region_origin_offsets_luma_and_chroma() {
        let mut backend = OpenH264Backend::new(PlaneDumpEngine, ParamTable::default());
        let data = gradient_tile(48, 32);
        let rects = [Rect::new(20, 12, 4, 4)];
        let dest = encode_region(&mut backend, &data, (16, 8), (48, 32), &rects);
        let (y, u, v) = planes(&dest);

        // Luma (20, 12) lands at (4, 4).
        assert_eq!(y[4 * 16 + 4], 20 + 36);
        assert_eq!(y[7 * 16 + 7], 23 + 45);
        assert_eq!(y[3 * 16 + 4], 0);
        // Chroma (10, 6) lands at ((20 - 16) / 2, (12 - 8) / 2) = (2, 2).
        assert_eq!(u[2 * 8 + 2], 110);
        assert_eq!(v[2 * 8 + 2], 206);
        assert_eq!(u[3 * 8 + 3], 111);
        assert_eq!(v[3 * 8 + 3], 207);
        assert_eq!(u[2 * 8 + 1], 0);
    }

    #[test]
    fn negative_origin_encodes_without_panicking() {
        let mut backend = OpenH264Backend::new(PlaneDumpEngine, ParamTable::default());
        let data = gradient_tile(16, 16);
        let rects = [Rect::new(0, 0, 8, 8)];
        let dest = encode_region(&mut backend, &data, (-8, -8), (16, 16), &rects);
        let (y, u, v) = planes(&dest);

        // Tile (0, 0) sits at picture (8, 8); chroma at (4, 4).
        assert_eq!(y[8 * 16 + 8], 0);
        assert_eq!(y[8 * 16 + 15], 7);
        assert_eq!(y[15 * 16 + 8], 21);
        assert_eq!(y[7 * 16 + 8], 0);
        assert_eq!(u[4 * 8 + 4], 100);
        assert_eq!(v[4 * 8 + 4], 200);
        assert_eq!(u[7 * 8 + 7], 103);
        assert_eq!(v[7 * 8 + 7], 203);
        assert!(u[..4 * 8].iter().all(|b| *b == 0));
    }

    #[test]
    fn overlapping_rects_match_their_union() {
        let data = gradient_tile(16, 16);

        let mut split = OpenH264Backend::new(PlaneDumpEngine, ParamTable::default());
        let overlapping = [Rect::new(0, 0, 10, 10), Rect::new(4, 4, 12, 12)];
        let a = encode_region(&mut split, &data, (0, 0), (16, 16), &overlapping);

        let mut whole = OpenH264Backend::new(PlaneDumpEngine, ParamTable::default());
        let union = [Rect::new(0, 0, 10, 10), Rect::new(10, 4, 6, 12), Rect::new(4, 10, 6, 6)];
        let b = encode_region(&mut whole, &data, (0, 0), (16, 16), &union);

        assert_eq!(a, b);
        let (y, _, _) = planes(&a);
        assert_eq!(y[15 * 16 + 15], 15 + 45);
        assert_eq!(y[15 * 16], 0);
    }

    #[test]
    fn later_rects_overwrite_earlier_content() {
        let mut backend = OpenH264Backend::new(PlaneDumpEngine, ParamTable::default());
        let first = gradient_tile(16, 16);
        encode_region(&mut backend, &first, (0, 0), (16, 16), &[Rect::new(0, 0, 16, 16)]);

        // Same context, new content only under the second rectangle.
        let second = vec![0xEEu8; first.len()];
        let rects = [Rect::new(0, 0, 4, 4), Rect::new(2, 2, 4, 4)];
        let dest = encode_region(&mut backend, &second, (0, 0), (16, 16), &rects);
        let (y, u, v) = planes(&dest);

        assert_eq!(y[5 * 16 + 5], 0xEE);
        assert_eq!(y[0], 0xEE);
        assert_eq!(y[6 * 16 + 6], 6 + 18);
        assert_eq!(u[2 * 8 + 2], 0xEE);
        assert_eq!(v[3 * 8 + 3], 203);
    }
}
