// QR code acquisition and decoding pipeline.
// Live camera or a single image -> frames -> decode -> normalized, navigable result.

pub mod capture;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod normalize;
pub mod sampler;
pub mod session;
pub mod types;

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub mod camera;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
#[path = "camera_unsupported.rs"]
pub mod camera;

pub use capture::{CaptureBackend, CaptureHandle, Facing, LiveConstraints, StaticCapture};
pub use config::ScanConfig;
pub use controller::{ScanController, ScanObserver};
pub use decode::{DecodeEngine, EngineKind, RqrrEngine};
pub use error::{CaptureError, DecodeError, ScanError};
pub use normalize::normalize;
pub use types::{AnalysisRequest, DecodeOutcome, Frame, NormalizedResult, ScanMode, SessionState};
