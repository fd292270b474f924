// Live capture on targets without a nokhwa backend: every open fails with
// `PlatformUnsupported`; static images still work.

use crate::capture::{CaptureBackend, CaptureHandle, LiveConstraints};
use crate::error::CaptureError;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
}

#[derive(Debug, Default, Clone)]
pub struct DeviceBackend;

impl DeviceBackend {
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Err(CaptureError::PlatformUnsupported)
    }
}

#[async_trait]
impl CaptureBackend for DeviceBackend {
    async fn open_live(&self, _constraints: &LiveConstraints) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        Err(CaptureError::PlatformUnsupported)
    }
}
