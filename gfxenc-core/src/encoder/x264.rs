//! x264 codec backend.
//!
//! Same slot and re-initialisation rules as the OpenH264 backend, but the
//! scratch picture stays NV12 and the native session returns the frame as a
//! single payload, which is copied whole or not at all.

use tracing::trace;

use super::backend::{CodecBackend, CodecId, EncodeOutcome, EncodeRequest};
use super::convert::{CopyGeometry, nv12_to_nv12};
use super::native::{NativeEngine, NativeOutput, Picture, PlaneLayout};
use super::pool::{EncoderPool, align_to_16};
use crate::connection::ParamTable;
use crate::error::BackendError;
use crate::gfx_config::X264Params;

pub struct X264Backend<E> {
    engine: E,
    table: ParamTable<X264Params>,
    pool: EncoderPool,
}

impl<E: NativeEngine<Params = X264Params>> X264Backend<E> {
    pub fn new(engine: E, table: ParamTable<X264Params>) -> Self {
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

impl<E: NativeEngine<Params = X264Params>> CodecBackend for X264Backend<E> {
    fn codec(&self) -> CodecId {
        CodecId::X264
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

        let idle = EncodeOutcome {
            bytes_written: 0,
            flags,
        };
        if req.data.is_empty() {
            return Ok(idle);
        }
        let Some((session, scratch)) = self.pool.slot_mut(req.channel_id).parts() else {
            return Ok(idle);
        };

        let geo = CopyGeometry {
            left: req.left,
            top: req.top,
            tile_width: req.tile_width,
            tile_height: req.tile_height,
            padded_width: align_to_16(req.width as usize),
            padded_height: align_to_16(req.height as usize),
        };
        nv12_to_nv12(req.data, scratch, &geo, req.rects);

        let picture = Picture {
            width: geo.padded_width,
            height: geo.padded_height,
            layout: PlaneLayout::Nv12,
            data: scratch,
        };
        let output = session
            .encode(&picture)
            .map_err(|e| BackendError::EncodeFailed(e.to_string()))?;
        let NativeOutput::Coded(layers) = &output else {
            return Err(BackendError::FrameSkipped);
        };

        let needed = output.len();
        if needed == 0 {
            return Err(BackendError::EncodeFailed("empty payload".into()));
        }
        if needed > dest.len() {
            return Err(BackendError::Overflow {
                needed,
                capacity: dest.len(),
            });
        }
        let mut written = 0;
        for nal in layers.iter().flat_map(|layer| layer.nals.iter()) {
            dest[written..written + nal.len()].copy_from_slice(nal);
            written += nal.len();
        }

        trace!(
            channel = req.channel_id,
            preset = %params.preset,
            bytes_written = written,
            "x264 frame encoded"
        );
        Ok(EncodeOutcome {
            bytes_written: written,
            flags,
        })
    }

    fn self_test(&self) -> bool {
        self.engine.self_test()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::connection::ConnectionType;
    use crate::encoder::backend::EncodeFlags;
    use crate::encoder::native::{NalLayer, NativeError, NativeSession};
    use crate::encoder::types::{PixelFormat, Rect};

    /// Echoes the first four UV bytes of the picture as its payload.
    struct EchoSession;

    impl NativeSession for EchoSession {
        fn encode(&mut self, p: &Picture<'_>) -> Result<NativeOutput, NativeError> {
            assert_eq!(p.layout, PlaneLayout::Nv12);
            Ok(NativeOutput::Coded(vec![NalLayer {
                nals: vec![p.chroma().0[..4].to_vec()],
            }]))
        }
    }

    struct EmptySession;

    impl NativeSession for EmptySession {
        fn encode(&mut self, _: &Picture<'_>) -> Result<NativeOutput, NativeError> {
            Ok(NativeOutput::Coded(Vec::new()))
        }
    }

    #[derive(Default)]
    struct EchoEngine {
        empty: bool,
        presets: Arc<Mutex<Vec<String>>>,
    }

    impl NativeEngine for EchoEngine {
        type Params = X264Params;

        fn name(&self) -> &'static str {
            "echo"
        }

        fn open(
            &self,
            _: usize,
            _: usize,
            params: &X264Params,
        ) -> Result<Box<dyn NativeSession>, NativeError> {
            self.presets.lock().unwrap().push(params.preset.clone());
            if self.empty {
                Ok(Box::new(EmptySession))
            } else {
                Ok(Box::new(EchoSession))
            }
        }
    }

    fn tile() -> Vec<u8> {
        let mut t = vec![0u8; 16 * 16];
        t.extend((0..16 * 8).map(|i| i as u8));
        t
    }

    fn request<'a>(data: &'a [u8], rects: &'a [Rect], ct: ConnectionType) -> EncodeRequest<'a> {
        EncodeRequest {
            channel_id: 1,
            left: 0,
            top: 0,
            width: 16,
            height: 16,
            tile_width: 16,
            tile_height: 16,
            format: PixelFormat::Nv12,
            data,
            rects,
            connection_type: ct,
        }
    }

    #[test]
    fn keeps_uv_interleaved() {
        let mut backend = X264Backend::new(EchoEngine::default(), ParamTable::default());
        let data = tile();
        let rects = [Rect::new(0, 0, 16, 16)];
        let mut dest = [0u8; 16];
        let out = backend
            .encode(&request(&data, &rects, ConnectionType::Lan), &mut dest)
            .unwrap();
        assert_eq!(out.bytes_written, 4);
        assert_eq!(&dest[..4], &[0, 1, 2, 3]);
        assert_eq!(out.flags, EncodeFlags::CONTEXT_CREATED);
    }

    #[test]
    fn payload_is_copied_whole_or_not_at_all() {
        let mut backend = X264Backend::new(EchoEngine::default(), ParamTable::default());
        let data = tile();
        let rects = [Rect::new(0, 0, 16, 16)];
        let mut dest = [0xAAu8; 3];
        let err = backend
            .encode(&request(&data, &rects, ConnectionType::Lan), &mut dest)
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Overflow {
                needed: 4,
                capacity: 3
            }
        );
        assert_eq!(dest, [0xAA; 3]);
    }

    #[test]
    fn empty_payload_is_a_failure() {
        let engine = EchoEngine {
            empty: true,
            ..Default::default()
        };
        let mut backend = X264Backend::new(engine, ParamTable::default());
        let data = tile();
        let rects = [Rect::new(0, 0, 16, 16)];
        let err = backend
            .encode(&request(&data, &rects, ConnectionType::Lan), &mut [0u8; 16])
            .unwrap_err();
        assert!(matches!(err, BackendError::EncodeFailed(_)));
    }

    #[test]
    fn opens_with_clamped_connection_tuning() {
        let mut table: ParamTable<X264Params> = ParamTable::default();
        table.slot_mut(ConnectionType::Lan as usize).preset = "veryfast".into();
        table.slot_mut(ConnectionType::Modem as usize).preset = "slow".into();
        let engine = EchoEngine::default();
        let presets = engine.presets.clone();
        let mut backend = X264Backend::new(engine, table);

        backend
            .encode(&request(&[], &[], ConnectionType::Autodetect), &mut [])
            .unwrap();
        let mut req = request(&[], &[], ConnectionType::Modem);
        req.channel_id = 2;
        backend.encode(&req, &mut []).unwrap();

        assert_eq!(*presets.lock().unwrap(), ["veryfast", "slow"]);
        assert_eq!(backend.pool().live_count(), 2);
    }
}
