// QR decoding behind a single-method engine contract.
//
// The controller only sees `DecodeEngine`; concrete decoders are picked by
// `EngineKind` so tests and alternative libraries can be swapped in without
// touching the session logic.

use crate::error::DecodeError;
use crate::types::{DecodeOutcome, Frame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Decode one frame. Implementations hold no per-call state and must not keep
/// the frame past the call.
#[async_trait]
pub trait DecodeEngine: Send + Sync {
    async fn decode(&self, frame: &Frame) -> Result<DecodeOutcome, DecodeError>;
}

/// Available decoder implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// rqrr on the luma frame as captured.
    Rqrr,
    /// rqrr, retried on the inverted and on the Otsu-binarized frame.
    #[default]
    RqrrCascade,
}

impl EngineKind {
    pub fn build(self) -> Arc<dyn DecodeEngine> {
        Arc::new(RqrrEngine::new(self))
    }
}

/// Preprocessing applied before handing pixels to rqrr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Raw,
    Inverted,           // light modules on a dark background
    Binarized(u8),      // global Otsu threshold
}

/// Pure-Rust decoder built on `rqrr`.
#[derive(Debug, Clone, Copy)]
pub struct RqrrEngine {
    kind: EngineKind,
}

impl RqrrEngine {
    pub fn new(kind: EngineKind) -> Self {
        Self { kind }
    }

    fn passes(&self, frame: &Frame) -> Vec<Pass> {
        match self.kind {
            EngineKind::Rqrr => vec![Pass::Raw],
            EngineKind::RqrrCascade => vec![Pass::Raw, Pass::Inverted, Pass::Binarized(otsu_threshold(&frame.pixels))],
        }
    }

    /// Synchronous core shared by the async engine and callers without a runtime.
    pub fn decode_sync(&self, frame: &Frame) -> Result<DecodeOutcome, DecodeError> {
        if !frame.is_well_formed() {
            return Err(DecodeError(format!(
                "frame buffer holds {} bytes, expected {}x{}",
                frame.pixels.len(),
                frame.width,
                frame.height
            )));
        }

        for pass in self.passes(frame) {
            if let Some(text) = decode_pass(frame, pass) {
                debug!(?pass, bytes = text.len(), "qr decoded");
                return Ok(DecodeOutcome::Found(text));
            }
        }
        Ok(DecodeOutcome::NotFound)
    }
}

#[async_trait]
impl DecodeEngine for RqrrEngine {
    /// Runs the passes on the blocking pool; a full-resolution cascade takes
    /// long enough to stall a current-thread runtime.
    async fn decode(&self, frame: &Frame) -> Result<DecodeOutcome, DecodeError> {
        let engine = *self;
        let frame = frame.clone();
        tokio::task::spawn_blocking(move || engine.decode_sync(&frame))
            .await
            .map_err(|e| DecodeError(format!("decode task failed: {e}")))?
    }
}

fn decode_pass(frame: &Frame, pass: Pass) -> Option<String> {
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(frame.width, frame.height, |x, y| {
        let v = frame.luma(x, y);
        match pass {
            Pass::Raw => v,
            Pass::Inverted => 255 - v,
            Pass::Binarized(t) => if v > t { 255 } else { 0 },
        }
    });

    let grids = prepared.detect_grids();
    trace!(?pass, grids = grids.len(), "grid detection");

    for grid in grids {
        match grid.decode() {
            Ok((_meta, content)) => return Some(content),
            // A finder pattern without a readable payload; keep looking.
            Err(e) => debug!(?pass, error = ?e, "grid decode failed"),
        }
    }
    None
}

/// Otsu's method: the threshold maximizing between-class variance of the histogram.
pub(crate) fn otsu_threshold(pixels: &[u8]) -> u8 {
    let mut hist = [0u64; 256];
    for &p in pixels {
        hist[p as usize] += 1;
    }

    let total = pixels.len() as f64;
    if total == 0.0 {
        return 127;
    }
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_bg = 0.0;
    let mut weight_bg = 0.0;
    let mut best = (0.0f64, 127u8);

    for (t, &count) in hist.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if between > best.0 {
            best = (between, t as u8);
        }
    }
    best.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otsu_splits_bimodal_histogram() {
        let mut px = vec![20u8; 500];
        px.extend(std::iter::repeat_n(220u8, 500));
        let t = otsu_threshold(&px);
        assert!((20..220).contains(&t), "threshold {t}");
    }

    #[test]
    fn otsu_on_empty_or_flat_input_is_stable() {
        assert_eq!(otsu_threshold(&[]), 127);
        assert_eq!(otsu_threshold(&[90u8; 64]), 127);
    }

    #[test]
    fn blank_frame_is_not_found() {
        let frame = Frame::new(64, 64, vec![255u8; 64 * 64]);
        for kind in [EngineKind::Rqrr, EngineKind::RqrrCascade] {
            let out = RqrrEngine::new(kind).decode_sync(&frame).unwrap();
            assert_eq!(out, DecodeOutcome::NotFound, "{kind:?}");
        }
    }

    #[test]
    fn malformed_frame_is_an_engine_error() {
        let frame = Frame::new(10, 10, vec![0u8; 7]);
        assert!(RqrrEngine::new(EngineKind::Rqrr).decode_sync(&frame).is_err());
    }

    #[test]
    fn cascade_adds_inverted_and_binarized_passes() {
        let frame = Frame::new(2, 1, vec![0u8, 255]);
        assert_eq!(RqrrEngine::new(EngineKind::Rqrr).passes(&frame), vec![Pass::Raw]);
        let passes = RqrrEngine::new(EngineKind::RqrrCascade).passes(&frame);
        assert_eq!(passes.len(), 3);
        assert_eq!(passes[1], Pass::Inverted);
    }

    fn rendered(text: &str, inverted: bool) -> Frame {
        let img = qrcode::QrCode::new(text.as_bytes())
            .unwrap()
            .render::<image::Luma<u8>>()
            .module_dimensions(4, 4)
            .build();
        let (w, h) = img.dimensions();
        let mut px = img.into_raw();
        if inverted {
            px.iter_mut().for_each(|p| *p = 255 - *p);
        }
        Frame::new(w as usize, h as usize, px)
    }

    #[test]
    fn rendered_code_decodes_with_either_engine() {
        let frame = rendered("shop.example", false);
        for kind in [EngineKind::Rqrr, EngineKind::RqrrCascade] {
            let out = RqrrEngine::new(kind).decode_sync(&frame).unwrap();
            assert_eq!(out, DecodeOutcome::Found("shop.example".into()), "{kind:?}");
        }
    }

    #[test]
    fn light_on_dark_code_needs_the_cascade() {
        let frame = rendered("shop.example", true);
        assert_eq!(
            RqrrEngine::new(EngineKind::Rqrr).decode_sync(&frame).unwrap(),
            DecodeOutcome::NotFound
        );
        assert_eq!(
            RqrrEngine::new(EngineKind::RqrrCascade).decode_sync(&frame).unwrap(),
            DecodeOutcome::Found("shop.example".into())
        );
    }

    #[tokio::test]
    async fn async_seam_decodes_off_the_runtime_thread() {
        let engine = EngineKind::RqrrCascade.build();
        let out = engine.decode(&rendered("https://a.com/x?y=1", false)).await.unwrap();
        assert_eq!(out, DecodeOutcome::Found("https://a.com/x?y=1".into()));
    }

    #[tokio::test]
    async fn async_seam_matches_sync_core() {
        let engine = EngineKind::Rqrr.build();
        let frame = Frame::new(8, 8, vec![0u8; 64]);
        assert_eq!(engine.decode(&frame).await.unwrap(), DecodeOutcome::NotFound);
    }
}
