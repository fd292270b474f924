// Error types for the scan pipeline.
// Every variant states *where* things went wrong; `ScanError` is what the
// hosting UI sees through `ScanObserver::on_error`.

use thiserror::Error;

/// Failures raised by a capture source (camera stream or static image).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera access was denied")]
    PermissionDenied,
    #[error("no camera device was found")]
    NoDeviceFound,
    #[error("live capture is not supported on this platform")]
    PlatformUnsupported,
    #[error("image could not be decoded: {0}")]
    ImageDecode(String),
    /// The stream has not produced a displayable frame yet. Not an error for the sampler.
    #[error("no frame available yet")]
    NotReady,
    #[error("capture handle already released")]
    Released,
    #[error("camera device error: {0}")]
    Device(String),
}

/// A decode engine failed outright (as opposed to finding no code).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("decode engine failed: {0}")]
pub struct DecodeError(pub String);

/// Terminal failures surfaced once per session, plus usage errors returned from
/// the controller's start/trigger calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("Camera permission denied. Allow camera access and try again.")]
    PermissionDenied,
    #[error("No camera found. Try scanning an image instead.")]
    NoDeviceFound,
    #[error("Live camera scanning is not supported here.")]
    PlatformUnsupported,
    #[error("The image could not be read: {0}")]
    ImageDecode(String),
    #[error("No QR code found in the image.")]
    NotFound,
    #[error("A scan is already in progress.")]
    AlreadyActive,
    #[error("There is no loaded image waiting to be scanned.")]
    NoStaticSession,
    #[error("QR decoding failed: {0}")]
    DecodeEngine(String),
    #[error("Camera error: {0}")]
    Device(String),
}

impl ScanError {
    /// Stable machine-readable tag for the error category.
    pub fn category(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::NoDeviceFound => "no-device-found",
            Self::PlatformUnsupported => "platform-unsupported",
            Self::ImageDecode(_) => "image-decode-error",
            Self::NotFound => "not-found",
            Self::AlreadyActive => "already-active",
            Self::NoStaticSession => "no-static-session",
            Self::DecodeEngine(_) => "decode-engine-error",
            Self::Device(_) => "device-error",
        }
    }
}

impl From<CaptureError> for ScanError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied => Self::PermissionDenied,
            CaptureError::NoDeviceFound => Self::NoDeviceFound,
            CaptureError::PlatformUnsupported => Self::PlatformUnsupported,
            CaptureError::ImageDecode(s) => Self::ImageDecode(s),
            CaptureError::NotReady | CaptureError::Released => Self::Device(e.to_string()),
            CaptureError::Device(s) => Self::Device(s),
        }
    }
}

impl From<DecodeError> for ScanError {
    fn from(e: DecodeError) -> Self {
        Self::DecodeEngine(e.0)
    }
}
