// The scan session entity and its transition rules.
// A session exclusively owns its capture handle and sampler; every terminal
// transition releases both before the new state is visible.

use crate::capture::CaptureHandle;
use crate::error::CaptureError;
use crate::sampler::FrameSampler;
use crate::types::{Frame, ScanMode, SessionState};
use std::fmt;
use tracing::{debug, info, warn};

/// Outcome of asking to start a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginDecode {
    Started,
    /// A decode is already in flight; the frame is dropped.
    Busy,
    /// The session moved on (ended or replaced); the caller should stop.
    Stale,
}

pub struct ScanSession {
    id: u64,
    state: SessionState,
    mode: Option<ScanMode>,
    capture: Option<Box<dyn CaptureHandle>>,
    sampler: FrameSampler,
    pending_decode: bool,
}

impl ScanSession {
    /// The placeholder session a controller starts with.
    pub fn idle() -> Self {
        Self {
            id: 0,
            state: SessionState::Idle,
            mode: None,
            capture: None,
            sampler: FrameSampler::new(),
            pending_decode: false,
        }
    }

    /// A fresh session already in `AcquiringCapture`.
    pub fn begin(id: u64, mode: ScanMode) -> Self {
        info!(session = id, ?mode, "scan session started");
        Self {
            id,
            state: SessionState::AcquiringCapture,
            mode: Some(mode),
            capture: None,
            sampler: FrameSampler::new(),
            pending_decode: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> Option<ScanMode> {
        self.mode
    }

    pub fn pending_decode(&self) -> bool {
        self.pending_decode
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn sampler_running(&self) -> bool {
        self.sampler.is_running()
    }

    fn is_current(&self, id: u64) -> bool {
        self.id == id && !self.state.is_terminal()
    }

    pub fn is_acquiring(&self, id: u64) -> bool {
        self.id == id && self.state == SessionState::AcquiringCapture
    }

    pub fn is_decoding(&self, id: u64) -> bool {
        self.id == id && self.state == SessionState::Decoding
    }

    fn transition(&mut self, to: SessionState) {
        debug!(session = self.id, from = %self.state, to = %to, "session transition");
        self.state = to;
    }

    /// `AcquiringCapture -> Active`. Hands the capture back if the session is
    /// no longer acquiring, or the capture is of the wrong mode, so the caller
    /// can release it.
    pub fn activate(&mut self, capture: Box<dyn CaptureHandle>) -> Result<(), Box<dyn CaptureHandle>> {
        if self.state != SessionState::AcquiringCapture || self.capture.is_some() {
            return Err(capture);
        }
        if self.mode != Some(capture.mode()) {
            warn!(session = self.id, expected = ?self.mode, got = ?capture.mode(), "capture mode mismatch");
            return Err(capture);
        }
        self.capture = Some(capture);
        self.transition(SessionState::Active);
        Ok(())
    }

    pub fn sampler_mut(&mut self) -> &mut FrameSampler {
        &mut self.sampler
    }

    /// Pull a frame for session `id`. `Released` once the session has moved on.
    pub fn sample_frame(&mut self, id: u64) -> Result<Frame, CaptureError> {
        if !self.is_current(id) {
            return Err(CaptureError::Released);
        }
        if self.state != SessionState::Active {
            return Err(CaptureError::NotReady);
        }
        match self.capture.as_mut() {
            Some(capture) => capture.sample_frame(),
            None => Err(CaptureError::Released),
        }
    }

    /// `Active -> Decoding`, enforcing a single decode in flight.
    pub fn try_begin_decode(&mut self, id: u64) -> BeginDecode {
        if !self.is_current(id) {
            return BeginDecode::Stale;
        }
        if self.pending_decode || self.state != SessionState::Active {
            return BeginDecode::Busy;
        }
        self.pending_decode = true;
        self.transition(SessionState::Decoding);
        BeginDecode::Started
    }

    /// `Decoding -> Active` after a live miss.
    pub fn resume(&mut self) {
        if self.state == SessionState::Decoding {
            self.pending_decode = false;
            self.transition(SessionState::Active);
        }
    }

    /// Move to a terminal state: stop the sampler, release the capture, then
    /// publish the state. Returns false if there was nothing to end.
    pub fn terminate(&mut self, to: SessionState) -> bool {
        debug_assert!(to.is_terminal());
        if self.state == SessionState::Idle || self.state.is_terminal() {
            return false;
        }
        self.sampler.stop();
        self.release_capture();
        self.pending_decode = false;
        self.transition(to);
        info!(session = self.id, state = %to, "scan session ended");
        true
    }

    fn release_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if !capture.is_released() {
                capture.release();
            }
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.sampler.stop();
        self.release_capture();
    }
}

impl fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("has_capture", &self.capture.is_some())
            .field("pending_decode", &self.pending_decode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StaticCapture;

    fn image() -> Box<dyn CaptureHandle> {
        Box::new(StaticCapture::from_frame(Frame::new(1, 1, vec![0u8])))
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = ScanSession::begin(1, ScanMode::Static);
        assert_eq!(s.state(), SessionState::AcquiringCapture);
        assert!(s.activate(image()).is_ok());
        assert_eq!(s.state(), SessionState::Active);
        assert!(s.sample_frame(1).is_ok());

        assert_eq!(s.try_begin_decode(1), BeginDecode::Started);
        assert!(s.pending_decode());
        assert_eq!(s.try_begin_decode(1), BeginDecode::Busy);

        s.resume();
        assert_eq!(s.state(), SessionState::Active);
        assert!(!s.pending_decode());
    }

    #[test]
    fn terminate_releases_and_is_one_shot() {
        let mut s = ScanSession::begin(3, ScanMode::Static);
        assert!(s.activate(image()).is_ok());
        assert_eq!(s.try_begin_decode(3), BeginDecode::Started);

        assert!(s.terminate(SessionState::Cancelled));
        assert!(!s.has_capture());
        assert!(!s.pending_decode());
        assert_eq!(s.state(), SessionState::Cancelled);

        assert!(!s.terminate(SessionState::Failed));
        assert_eq!(s.state(), SessionState::Cancelled);
        assert_eq!(s.try_begin_decode(3), BeginDecode::Stale);
        assert_eq!(s.sample_frame(3).unwrap_err(), CaptureError::Released);
    }

    #[test]
    fn late_capture_is_handed_back() {
        let mut s = ScanSession::begin(4, ScanMode::Live);
        s.terminate(SessionState::Cancelled);
        assert!(s.activate(image()).is_err());
        assert!(!s.has_capture());
    }

    #[test]
    fn capture_of_the_other_mode_is_handed_back() {
        let mut s = ScanSession::begin(6, ScanMode::Live);
        let mut rejected = match s.activate(image()) {
            Err(capture) => capture,
            Ok(()) => panic!("static capture accepted by a live session"),
        };
        assert_eq!(s.state(), SessionState::AcquiringCapture);
        assert!(!s.has_capture());
        assert!(!rejected.is_released());
        rejected.release();
        assert!(rejected.is_released());
    }

    #[test]
    fn idle_session_cannot_be_terminated() {
        let mut s = ScanSession::idle();
        assert!(!s.terminate(SessionState::Cancelled));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn other_session_ids_are_stale() {
        let mut s = ScanSession::begin(5, ScanMode::Static);
        assert!(s.activate(image()).is_ok());
        assert_eq!(s.try_begin_decode(4), BeginDecode::Stale);
        assert!(!s.is_decoding(4));
    }
}
