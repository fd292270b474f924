// Capture sources: where a session's pixels come from.
// A `CaptureHandle` is exclusively owned by one session; `CaptureBackend` opens them.

use crate::error::CaptureError;
use crate::types::{Frame, ScanMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Environment, // rear / world-facing
    User,        // front / selfie
}

/// Preferences for a live stream. The backend may deliver something close instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConstraints {
    /// Explicit device index; wins over `facing`.
    pub device: Option<u32>,
    pub facing: Option<Facing>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for LiveConstraints {
    fn default() -> Self {
        Self {
            device: None,
            facing: Some(Facing::Environment),
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// An open capture source.
pub trait CaptureHandle: Send {
    fn mode(&self) -> ScanMode;

    /// Live: next unseen frame, or `NotReady` if none has arrived.
    /// Static: the same frame every time.
    fn sample_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Stop device use and free buffers. Calling it again is a no-op.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Opens capture handles.
#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    /// Suspends until the platform grants or denies access.
    async fn open_live(&self, constraints: &LiveConstraints) -> Result<Box<dyn CaptureHandle>, CaptureError>;

    fn open_static(&self, image_bytes: &[u8]) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        Ok(Box::new(StaticCapture::from_bytes(image_bytes)?))
    }
}

/// A single decoded image served as a one-shot frame source.
pub struct StaticCapture {
    frame: Option<Frame>,
}

impl StaticCapture {
    /// Decode encoded image bytes (PNG, JPEG, ...) into a luma frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CaptureError> {
        let img = image::load_from_memory(bytes).map_err(|e| CaptureError::ImageDecode(e.to_string()))?;
        Ok(Self::from_image(&img))
    }

    /// Wrap an image the caller already decoded.
    pub fn from_image(img: &image::DynamicImage) -> Self {
        let luma = img.to_luma8();
        let (w, h) = luma.dimensions();
        debug!(width = w, height = h, "static image loaded");
        Self::from_frame(Frame::new(w as usize, h as usize, luma.into_raw()))
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self { frame: Some(frame) }
    }
}

impl CaptureHandle for StaticCapture {
    fn mode(&self) -> ScanMode {
        ScanMode::Static
    }

    fn sample_frame(&mut self) -> Result<Frame, CaptureError> {
        self.frame.clone().ok_or(CaptureError::Released)
    }

    fn release(&mut self) {
        if self.frame.take().is_some() {
            info!("static image released");
        }
    }

    fn is_released(&self) -> bool {
        self.frame.is_none()
    }
}
