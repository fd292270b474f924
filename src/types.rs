// Core value types shared by capture, decode and the session controller.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// One sampled image considered for decoding.
/// Pixels are 8-bit luma, row-major, tightly packed (`width * height` bytes).
#[derive(Clone)]
pub struct Frame {
    pub width: usize,        // pixels per row
    pub height: usize,       // rows
    pub pixels: Arc<[u8]>,   // luma, length = width * height
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(width: usize, height: usize, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
            captured_at: Instant::now(),
        }
    }

    /// Luma at (x, y); out-of-range reads are black.
    #[inline]
    pub fn luma(&self, x: usize, y: usize) -> u8 {
        if x >= self.width {
            return 0;
        }
        self.pixels.get(y * self.width + x).copied().unwrap_or(0)
    }

    /// True when the buffer length matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.width * self.height
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Result of one decode attempt on exactly one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Found(String),
    NotFound,
}

/// Navigation-ready result plus the verbatim payload it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub canonical_url: String,
    pub raw_text: String,
}

impl NormalizedResult {
    /// Body for the downstream analysis endpoint: `{ url, qrCodeData? }`.
    /// `qrCodeData` is only sent when it differs from the URL.
    pub fn analysis_request(&self) -> AnalysisRequest {
        AnalysisRequest {
            url: self.canonical_url.clone(),
            qr_code_data: (self.raw_text != self.canonical_url).then(|| self.raw_text.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_data: Option<String>,
}

/// Where the session's pixels come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Live,   // camera stream, sampled on a timer
    Static, // one supplied image, decoded once on trigger
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AcquiringCapture,
    Active,
    Decoding,
    Detected,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Detected | Self::Cancelled | Self::Failed)
    }

    /// A new session may start from `Idle` or after the previous one ended.
    pub fn accepts_start(self) -> bool {
        self == Self::Idle || self.is_terminal()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AcquiringCapture => "acquiring-capture",
            Self::Active => "active",
            Self::Decoding => "decoding",
            Self::Detected => "detected",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
