// Live camera capture backed by nokhwa.
// The camera is owned by a dedicated capture thread (nokhwa's `Camera` is not
// `Send`, and `frame()` blocks until the device delivers). The thread keeps only
// the most recent frame; the sampler takes it from the event loop without blocking.

use crate::capture::{CaptureBackend, CaptureHandle, Facing, LiveConstraints};
use crate::error::CaptureError;
use crate::types::{Frame, ScanMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

// Bring in nokhwa types for camera control.
use nokhwa::{
    Camera, NokhwaError,
    pixel_format::RgbFormat,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
};

/// A camera as reported by the platform.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
}

/// Opens live streams on the platform's default camera API.
#[derive(Debug, Default, Clone)]
pub struct DeviceBackend;

impl DeviceBackend {
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let cameras = nokhwa::query(ApiBackend::Auto).map_err(|e| classify(&e))?;
        Ok(cameras
            .iter()
            .enumerate()
            .map(|(i, c)| DeviceInfo {
                index: camera_index(c).unwrap_or(i as u32),
                name: c.human_name(),
            })
            .collect())
    }
}

#[async_trait]
impl CaptureBackend for DeviceBackend {
    async fn open_live(&self, constraints: &LiveConstraints) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let camera = LiveCamera::open(constraints.clone()).await?;
        let (width, height) = camera.resolution();
        info!(width, height, fps = constraints.fps, "camera stream open");
        Ok(Box::new(camera))
    }
}

/// Consecutive failed grabs after which the device is considered lost.
const MAX_GRAB_FAILURES: u32 = 20;
/// Pause between failed grabs.
const GRAB_BACKOFF: Duration = Duration::from_millis(50);

/// Latest-frame mailbox shared between the capture thread and the handle.
#[derive(Debug, Default)]
enum Slot {
    #[default]
    Empty,
    Frame(Frame),
    /// The device stopped delivering; sticky until release.
    Failed(CaptureError),
}

type SharedSlot = Arc<Mutex<Slot>>;
type ReadySender = oneshot::Sender<Result<(u32, u32), CaptureError>>;

/// Handle to a running capture thread.
pub struct LiveCamera {
    slot: SharedSlot,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    released: bool,
    width: u32,
    height: u32,
}

impl LiveCamera {
    /// Start the capture thread and wait until the device is streaming or has failed.
    pub async fn open(constraints: LiveConstraints) -> Result<Self, CaptureError> {
        Self::spawn(move |slot, stop_flag, ready_tx| capture_loop(constraints, slot, stop_flag, ready_tx)).await
    }

    /// Run `worker` on the capture thread. It must report readiness through the
    /// sender and return once the stop flag is set.
    async fn spawn<W>(worker: W) -> Result<Self, CaptureError>
    where
        W: FnOnce(SharedSlot, Arc<AtomicBool>, ReadySender) + Send + 'static,
    {
        let slot = SharedSlot::default();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = {
            let slot = Arc::clone(&slot);
            let stop_flag = Arc::clone(&stop_flag);
            thread::Builder::new()
                .name("qr-scan-camera".into())
                .spawn(move || worker(slot, stop_flag, ready_tx))
                .map_err(|e| CaptureError::Device(format!("spawn capture thread: {e}")))?
        };

        // The thread reports the actual resolution once the stream is open.
        let opened = match ready_rx.await {
            Ok(res) => res,
            Err(_) => Err(CaptureError::Device("capture thread exited during open".into())),
        };
        let (width, height) = match opened {
            Ok(res) => res,
            Err(e) => {
                let _ = handle.join();
                return Err(e);
            }
        };

        Ok(Self {
            slot,
            stop_flag,
            worker: Some(handle),
            released: false,
            width,
            height,
        })
    }

    /// Report the actual resolution the camera is delivering.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl CaptureHandle for LiveCamera {
    fn mode(&self) -> ScanMode {
        ScanMode::Live
    }

    fn sample_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }
        let mut slot = self.slot.lock();
        match std::mem::take(&mut *slot) {
            Slot::Empty => Err(CaptureError::NotReady),
            Slot::Frame(frame) => Ok(frame),
            Slot::Failed(e) => {
                *slot = Slot::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Stops the capture thread and waits for it to close the stream.
    /// Blocks for at most one frame period.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stop_flag.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture thread panicked");
            }
        }
        *self.slot.lock() = Slot::Empty;
        info!("camera released");
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for LiveCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Body of the capture thread.
fn capture_loop(constraints: LiveConstraints, slot: SharedSlot, stop_flag: Arc<AtomicBool>, ready_tx: ReadySender) {
    let mut cam = match open_camera(&constraints) {
        Ok(cam) => cam,
        Err(e) => {
            warn!(error = %e, "camera open failed");
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let actual = cam.resolution();
    if ready_tx.send(Ok((actual.width(), actual.height()))).is_err() {
        // Opener went away (session cancelled while acquiring).
        let _ = cam.stop_stream();
        return;
    }

    pump_frames(|| grab_luma(&mut cam), &slot, &stop_flag, GRAB_BACKOFF);

    if let Err(e) = cam.stop_stream() {
        warn!(error = %e, "stop stream");
    }
    debug!("capture thread exiting");
}

/// Keep the newest frame in `slot` until stopped. After `MAX_GRAB_FAILURES`
/// failures in a row the last error is parked in the slot and the pump ends.
fn pump_frames<G>(mut grab: G, slot: &Mutex<Slot>, stop_flag: &AtomicBool, backoff: Duration)
where
    G: FnMut() -> Result<Frame, CaptureError>,
{
    let mut failures = 0u32;
    while !stop_flag.load(Ordering::Acquire) {
        match grab() {
            Ok(frame) => {
                failures = 0;
                *slot.lock() = Slot::Frame(frame);
            }
            Err(e) => {
                failures += 1;
                debug!(error = %e, failures, "frame grab failed");
                if failures >= MAX_GRAB_FAILURES {
                    warn!(error = %e, "camera stopped delivering frames");
                    *slot.lock() = Slot::Failed(CaptureError::Device(e.to_string()));
                    return;
                }
                thread::sleep(backoff);
            }
        }
    }
}

/// Pick a device, request a format near the constraints, start streaming.
fn open_camera(constraints: &LiveConstraints) -> Result<Camera, CaptureError> {
    // 1) Choose the device.
    let index = match constraints.device {
        Some(i) => i,
        None => pick_device(constraints.facing)?,
    };

    // 2) Ask for RGB frames closest to the requested resolution and rate.
    let fmt = CameraFormat::new(
        Resolution::new(constraints.width, constraints.height),
        FrameFormat::MJPEG,
        constraints.fps,
    );
    let req = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(fmt));

    // 3) Create the camera (this fails if the device is missing or access is refused).
    let mut cam = Camera::new(CameraIndex::Index(index), req).map_err(|e| classify(&e))?;

    // 4) Start streaming frames from the camera.
    cam.open_stream().map_err(|e| classify(&e))?;
    Ok(cam)
}

/// Map facing to a device by name hint; falls back to the first camera.
fn pick_device(facing: Option<Facing>) -> Result<u32, CaptureError> {
    let cameras = nokhwa::query(ApiBackend::Auto).map_err(|e| classify(&e))?;
    if cameras.is_empty() {
        return Err(CaptureError::NoDeviceFound);
    }
    let names: Vec<String> = cameras.iter().map(|c| c.human_name()).collect();
    let pos = facing.and_then(|f| match_facing(&names, f)).unwrap_or(0);
    Ok(camera_index(&cameras[pos]).unwrap_or(pos as u32))
}

fn match_facing(names: &[String], facing: Facing) -> Option<usize> {
    let hints: &[&str] = match facing {
        Facing::Environment => &["back", "rear", "environment", "world"],
        Facing::User => &["front", "user", "face", "integrated"],
    };
    names.iter().position(|n| {
        let n = n.to_lowercase();
        hints.iter().any(|h| n.contains(h))
    })
}

fn camera_index(info: &CameraInfo) -> Option<u32> {
    match info.index() {
        CameraIndex::Index(i) => Some(*i),
        CameraIndex::String(_) => None,
    }
}

/// Grab one frame and convert it to packed luma.
fn grab_luma(cam: &mut Camera) -> Result<Frame, CaptureError> {
    // 1) Pull a frame from the camera (this blocks until a new frame is ready).
    let buffer = cam
        .frame()
        .map_err(|e| CaptureError::Device(format!("fetch frame: {e}")))?;

    // 2) Decode to an RGB image buffer (handles MJPEG/YUYV sources).
    let rgb = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| CaptureError::Device(format!("decode rgb: {e}")))?;

    // 3) Pack to luma (BT.601 weights), one byte per pixel.
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let raw = rgb.into_raw();
    let luma = rgb_to_luma(&raw);
    Ok(Frame::new(w, h, luma))
}

pub(crate) fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8)
        .collect()
}

/// Map nokhwa's errors onto the capture taxonomy.
fn classify(e: &NokhwaError) -> CaptureError {
    if matches!(e, NokhwaError::UnsupportedOperationError(_) | NokhwaError::NotImplementedError(_)) {
        return CaptureError::PlatformUnsupported;
    }
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied
    } else if lower.contains("no such device")
        || lower.contains("no such file")
        || lower.contains("not found")
        || lower.contains("no device")
    {
        CaptureError::NoDeviceFound
    } else {
        CaptureError::Device(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_uses_bt601_weights() {
        let rgb = [255u8, 255, 255, 0, 0, 0, 255, 0, 0, 0, 255, 0];
        assert_eq!(rgb_to_luma(&rgb), vec![255, 0, 76, 149]);
    }

    #[test]
    fn facing_matches_by_name() {
        let names = vec!["Integrated Webcam".to_string(), "USB Rear Camera".to_string()];
        assert_eq!(match_facing(&names, Facing::Environment), Some(1));
        assert_eq!(match_facing(&names, Facing::User), Some(0));
        assert_eq!(match_facing(&["Logitech C920".to_string()], Facing::Environment), None);
    }

    #[test]
    fn nokhwa_errors_map_onto_capture_categories() {
        let cases = [
            (NokhwaError::UnsupportedOperationError(ApiBackend::Auto), CaptureError::PlatformUnsupported),
            (NokhwaError::NotImplementedError("query".into()), CaptureError::PlatformUnsupported),
            (
                NokhwaError::OpenDeviceError("0".into(), "V4L2 Error: Permission denied (os error 13)".into()),
                CaptureError::PermissionDenied,
            ),
            (
                NokhwaError::OpenDeviceError("7".into(), "V4L2 Error: No such file or directory (os error 2)".into()),
                CaptureError::NoDeviceFound,
            ),
            (NokhwaError::GeneralError("camera not found".into()), CaptureError::NoDeviceFound),
        ];
        for (err, want) in cases {
            assert_eq!(classify(&err), want, "{err}");
        }

        let busy = NokhwaError::OpenStreamError("Device or resource busy".into());
        assert!(matches!(classify(&busy), CaptureError::Device(m) if m.contains("busy")));
    }

    #[test]
    fn pump_gives_up_after_repeated_failures() {
        let slot = Mutex::new(Slot::Empty);
        let stop = AtomicBool::new(false);
        let mut calls = 0;
        pump_frames(
            || {
                calls += 1;
                Err(CaptureError::Device("unplugged".into()))
            },
            &slot,
            &stop,
            Duration::ZERO,
        );
        assert_eq!(calls, MAX_GRAB_FAILURES);
        assert!(matches!(&*slot.lock(), Slot::Failed(CaptureError::Device(m)) if m.contains("unplugged")));
    }

    #[test]
    fn pump_recovers_from_intermittent_failures() {
        let slot = Mutex::new(Slot::Empty);
        let stop = AtomicBool::new(false);
        let mut calls = 0u32;
        pump_frames(
            || {
                calls += 1;
                if calls == 3 * MAX_GRAB_FAILURES {
                    stop.store(true, Ordering::Release);
                }
                if calls % 2 == 0 {
                    Ok(Frame::new(1, 1, vec![calls as u8]))
                } else {
                    Err(CaptureError::Device("glitch".into()))
                }
            },
            &slot,
            &stop,
            Duration::ZERO,
        );
        assert!(matches!(&*slot.lock(), Slot::Frame(_)));
    }

    #[tokio::test]
    async fn release_waits_for_the_capture_thread() {
        let exited = Arc::new(AtomicBool::new(false));
        let mut cam = {
            let exited = Arc::clone(&exited);
            LiveCamera::spawn(move |slot, stop, ready| {
                let _ = ready.send(Ok((2, 2)));
                while !stop.load(Ordering::Acquire) {
                    *slot.lock() = Slot::Frame(Frame::new(2, 2, vec![0u8; 4]));
                    thread::sleep(Duration::from_millis(5));
                }
                // Closing the device takes a while.
                thread::sleep(Duration::from_millis(50));
                exited.store(true, Ordering::Release);
            })
            .await
            .unwrap()
        };
        assert_eq!(cam.resolution(), (2, 2));

        cam.release();
        assert!(exited.load(Ordering::Acquire));
        assert!(cam.is_released());
        assert_eq!(cam.sample_frame().unwrap_err(), CaptureError::Released);
        cam.release();
    }

    #[tokio::test]
    async fn device_fault_is_sticky_until_release() {
        let mut cam = LiveCamera::spawn(|slot, stop, ready| {
            let _ = ready.send(Ok((1, 1)));
            pump_frames(|| Err(CaptureError::Device("gone".into())), &slot, &stop, Duration::ZERO);
        })
        .await
        .unwrap();

        // The worker parks the fault before finishing.
        let first = loop {
            match cam.sample_frame() {
                Err(CaptureError::NotReady) => tokio::time::sleep(Duration::from_millis(1)).await,
                other => break other.map(|_| ()),
            }
        };
        assert!(matches!(&first, Err(CaptureError::Device(m)) if m.contains("gone")));
        assert_eq!(cam.sample_frame().map(|_| ()), first);
        cam.release();
        assert_eq!(cam.sample_frame().unwrap_err(), CaptureError::Released);
    }

    #[tokio::test]
    async fn failed_open_reports_the_worker_error() {
        let res = LiveCamera::spawn(|_, _, ready| {
            let _ = ready.send(Err(CaptureError::PermissionDenied));
        })
        .await;
        assert_eq!(res.err(), Some(CaptureError::PermissionDenied));
    }
}
