// Scan session controller.
//
// Orchestrates capture, sampling, decoding and normalization for one session
// at a time, and reports the outcome through a `ScanObserver`.
//
// Guarantees:
// - at most one decode in flight per session;
// - every terminal transition stops the sampler and releases the capture
//   before callbacks run;
// - a decode that completes after the session ended is discarded;
// - `on_detected` fires at most once and `on_error` at most once per session.
//
// The controller is a cheap handle (`Clone`); dropping the last clone tears
// the current session down.

use crate::capture::{CaptureBackend, CaptureHandle, LiveConstraints, StaticCapture};
use crate::config::ScanConfig;
use crate::decode::DecodeEngine;
use crate::error::{CaptureError, DecodeError, ScanError};
use crate::normalize::normalize;
use crate::sampler::DEFAULT_INTERVAL;
use crate::session::{BeginDecode, ScanSession};
use crate::types::{DecodeOutcome, Frame, NormalizedResult, ScanMode, SessionState};
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callbacks into the hosting UI.
pub trait ScanObserver: Send + Sync {
    /// A code was decoded and normalized. Fires once per successful session.
    fn on_detected(&self, canonical_url: &str, raw_text: &str);

    /// The session failed. `error`'s `Display` is the user-facing message.
    fn on_error(&self, error: &ScanError);

    /// The session was stopped before it finished.
    fn on_cancelled(&self) {}
}

/// What to tell the observer once the lock is released.
enum Notice {
    Detected(NormalizedResult),
    Error(ScanError),
}

impl Notice {
    fn emit(self, session: u64, observer: &dyn ScanObserver) {
        match self {
            Notice::Detected(result) => {
                info!(session, url = %result.canonical_url, "qr code detected");
                observer.on_detected(&result.canonical_url, &result.raw_text);
            }
            Notice::Error(error) => {
                warn!(session, category = error.category(), %error, "scan failed");
                observer.on_error(&error);
            }
        }
    }
}

struct Inner {
    session: ScanSession,
    next_id: u64,
}

pub struct ScanController<B: CaptureBackend> {
    backend: Arc<B>,
    engine: Arc<dyn DecodeEngine>,
    observer: Arc<dyn ScanObserver>,
    interval: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl<B: CaptureBackend> Clone for ScanController<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            engine: Arc::clone(&self.engine),
            observer: Arc::clone(&self.observer),
            interval: self.interval,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: CaptureBackend> ScanController<B> {
    pub fn new(backend: B, engine: Arc<dyn DecodeEngine>, observer: Arc<dyn ScanObserver>) -> Self {
        Self {
            backend: Arc::new(backend),
            engine,
            observer,
            interval: DEFAULT_INTERVAL,
            inner: Arc::new(Mutex::new(Inner {
                session: ScanSession::idle(),
                next_id: 0,
            })),
        }
    }

    /// Build with the engine and cadence from `config`.
    pub fn from_config(backend: B, config: &ScanConfig, observer: Arc<dyn ScanObserver>) -> Self {
        Self::new(backend, config.engine.build(), observer).with_interval(config.sample_interval())
    }

    /// Sampling cadence for live sessions started after this call.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().session.state()
    }

    pub fn mode(&self) -> Option<ScanMode> {
        self.inner.lock().session.mode()
    }

    pub fn is_decode_pending(&self) -> bool {
        self.inner.lock().session.pending_decode()
    }

    /// True while the current session holds an open capture handle.
    pub fn has_capture(&self) -> bool {
        self.inner.lock().session.has_capture()
    }

    pub fn is_sampling(&self) -> bool {
        self.inner.lock().session.sampler_running()
    }

    /// Open the camera and start sampling.
    ///
    /// Returns `Err(AlreadyActive)` if a session is running; the running session
    /// is left untouched. Capture failures end the session and go to
    /// `on_error`, not to the return value.
    pub async fn start_live(&self, constraints: &LiveConstraints) -> Result<(), ScanError> {
        let id = self.begin(ScanMode::Live)?;
        let opened = self.backend.open_live(constraints).await;

        let notice = {
            let mut g = self.inner.lock();
            if !g.session.is_acquiring(id) {
                // Stopped while the platform was still deciding.
                if let Ok(mut capture) = opened {
                    capture.release();
                }
                debug!(session = id, "capture arrived after session ended");
                None
            } else {
                match opened {
                    Ok(capture) => self.activate_live(&mut g.session, id, capture),
                    Err(e) => {
                        g.session.terminate(SessionState::Failed);
                        Some(Notice::Error(e.into()))
                    }
                }
            }
        };

        if let Some(n) = notice {
            n.emit(id, &*self.observer);
        }
        Ok(())
    }

    /// Load encoded image bytes for a single-shot scan; call [`trigger`](Self::trigger) to decode.
    pub fn start_static(&self, image_bytes: &[u8]) -> Result<(), ScanError> {
        let id = self.begin(ScanMode::Static)?;
        let opened = self.backend.open_static(image_bytes);
        self.finish_static_open(id, opened);
        Ok(())
    }

    /// Like [`start_static`](Self::start_static) for pixels the caller already decoded.
    pub fn start_static_frame(&self, frame: Frame) -> Result<(), ScanError> {
        let id = self.begin(ScanMode::Static)?;
        self.finish_static_open(id, Ok(Box::new(StaticCapture::from_frame(frame))));
        Ok(())
    }

    /// Decode the loaded static image once.
    ///
    /// `Err(NoStaticSession)` if no static session is waiting. A miss fails the
    /// session with `NotFound` (there is no retry loop in static mode).
    pub async fn trigger(&self) -> Result<(), ScanError> {
        let (id, frame) = {
            let mut g = self.inner.lock();
            let session = &mut g.session;
            if session.mode() != Some(ScanMode::Static) || session.state() != SessionState::Active {
                return Err(ScanError::NoStaticSession);
            }
            let id = session.id();
            let frame = match session.sample_frame(id) {
                Ok(frame) => frame,
                Err(e) => {
                    session.terminate(SessionState::Failed);
                    drop(g);
                    Notice::Error(e.into()).emit(id, &*self.observer);
                    return Ok(());
                }
            };
            if session.try_begin_decode(id) != BeginDecode::Started {
                return Err(ScanError::NoStaticSession);
            }
            (id, frame)
        };

        let result = self.engine.decode(&frame).await;
        drop(frame);

        let (_, notice) = complete_decode(&self.inner, id, result);
        if let Some(n) = notice {
            n.emit(id, &*self.observer);
        }
        Ok(())
    }

    /// Cancel the current session and notify the observer. Idempotent.
    pub fn stop(&self) {
        self.end(true);
    }

    pub fn cancel(&self) {
        self.stop();
    }

    /// Release everything without a cancellation notice (hosting context going away).
    pub fn teardown(&self) {
        self.end(false);
    }

    fn end(&self, notify: bool) {
        let (id, ended) = {
            let mut g = self.inner.lock();
            (g.session.id(), g.session.terminate(SessionState::Cancelled))
        };
        if ended {
            info!(session = id, "scan cancelled");
            if notify {
                self.observer.on_cancelled();
            }
        }
    }

    /// Replace a finished (or never started) session with a new one.
    fn begin(&self, mode: ScanMode) -> Result<u64, ScanError> {
        let mut g = self.inner.lock();
        let state = g.session.state();
        if !state.accepts_start() {
            warn!(session = g.session.id(), %state, "start rejected, session already running");
            return Err(ScanError::AlreadyActive);
        }
        g.next_id += 1;
        let id = g.next_id;
        g.session = ScanSession::begin(id, mode);
        Ok(id)
    }

    fn finish_static_open(&self, id: u64, opened: Result<Box<dyn CaptureHandle>, CaptureError>) {
        let notice = {
            let mut g = self.inner.lock();
            match opened {
                Ok(capture) => install(&mut g.session, id, capture).err(),
                Err(e) => {
                    g.session.terminate(SessionState::Failed);
                    Some(Notice::Error(e.into()))
                }
            }
        };
        if let Some(n) = notice {
            n.emit(id, &*self.observer);
        }
    }

    /// Install the capture and wire the sampler to the decode path.
    fn activate_live(&self, session: &mut ScanSession, id: u64, capture: Box<dyn CaptureHandle>) -> Option<Notice> {
        if let Err(notice) = install(session, id, capture) {
            return Some(notice);
        }

        let sample_from = Arc::downgrade(&self.inner);
        let decode_into = Arc::downgrade(&self.inner);
        let engine = Arc::clone(&self.engine);
        let observer = Arc::clone(&self.observer);
        let fault_observer = Arc::clone(&self.observer);

        session.sampler_mut().start(
            self.interval,
            move || {
                let Some(inner) = sample_from.upgrade() else {
                    return Err(CaptureError::Released);
                };
                let sampled = inner.lock().session.sample_frame(id);
                match sampled {
                    Err(e @ (CaptureError::NotReady | CaptureError::Released)) => Err(e),
                    Err(e) => {
                        // The device is gone; end the session instead of polling forever.
                        if let Some(n) = fail_session(&inner, id, e.into()) {
                            n.emit(id, &*fault_observer);
                        }
                        Err(CaptureError::Released)
                    }
                    ok => ok,
                }
            },
            move |frame| {
                let inner = decode_into.clone();
                let engine = Arc::clone(&engine);
                let observer = Arc::clone(&observer);
                async move { decode_live_frame(inner, id, engine, observer, frame).await }
            },
        );
        None
    }
}

/// Hand `capture` to session `id`. A capture the session refuses is released,
/// and if the session was still waiting for one it fails.
fn install(session: &mut ScanSession, id: u64, capture: Box<dyn CaptureHandle>) -> Result<(), Notice> {
    let mut capture = match session.activate(capture) {
        Ok(()) => return Ok(()),
        Err(capture) => capture,
    };
    capture.release();
    if session.is_acquiring(id) {
        session.terminate(SessionState::Failed);
        return Err(Notice::Error(ScanError::Device("capture opened in the wrong mode".into())));
    }
    Ok(())
}

/// One live tick's worth of work: guard, decode, apply.
async fn decode_live_frame(
    inner: Weak<Mutex<Inner>>,
    id: u64,
    engine: Arc<dyn DecodeEngine>,
    observer: Arc<dyn ScanObserver>,
    frame: Frame,
) -> ControlFlow<()> {
    let begin = match inner.upgrade() {
        Some(strong) => {
            let mut g = strong.lock();
            g.session.try_begin_decode(id)
        }
        None => BeginDecode::Stale,
    };
    match begin {
        BeginDecode::Started => {}
        BeginDecode::Busy => {
            debug!(session = id, "decode in flight, frame dropped");
            return ControlFlow::Continue(());
        }
        BeginDecode::Stale => return ControlFlow::Break(()),
    }

    let result = engine.decode(&frame).await;
    drop(frame);

    let Some(inner) = inner.upgrade() else {
        return ControlFlow::Break(());
    };
    let (flow, notice) = complete_decode(&inner, id, result);
    if let Some(n) = notice {
        n.emit(id, &*observer);
    }
    flow
}

/// Fail session `id` if it is still running.
fn fail_session(inner: &Mutex<Inner>, id: u64, error: ScanError) -> Option<Notice> {
    let mut g = inner.lock();
    if g.session.id() != id || !g.session.terminate(SessionState::Failed) {
        return None;
    }
    Some(Notice::Error(error))
}

/// Apply a finished decode to session `id`, or discard it if the session moved on.
fn complete_decode(
    inner: &Mutex<Inner>,
    id: u64,
    result: Result<DecodeOutcome, DecodeError>,
) -> (ControlFlow<()>, Option<Notice>) {
    let mut g = inner.lock();
    let session = &mut g.session;
    if !session.is_decoding(id) {
        debug!(session = id, "stale decode result discarded");
        return (ControlFlow::Break(()), None);
    }

    match result {
        Ok(DecodeOutcome::NotFound) if session.mode() == Some(ScanMode::Live) => {
            session.resume();
            (ControlFlow::Continue(()), None)
        }
        Ok(DecodeOutcome::NotFound) => {
            session.terminate(SessionState::Failed);
            (ControlFlow::Break(()), Some(Notice::Error(ScanError::NotFound)))
        }
        Ok(DecodeOutcome::Found(payload)) => {
            session.terminate(SessionState::Detected);
            let result = normalize(&payload);
            (ControlFlow::Break(()), Some(Notice::Detected(result)))
        }
        Err(e) => {
            session.terminate(SessionState::Failed);
            (ControlFlow::Break(()), Some(Notice::Error(e.into())))
        }
    }
}
