// Periodic frame sampling for live sessions.
// One task per sampler: tick -> sample -> await on_frame. Because on_frame is
// awaited inline it never overlaps itself, and ticks that elapse while it runs
// collapse into at most one rather than queueing.

use crate::error::CaptureError;
use crate::types::Frame;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, trace, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Default)]
pub struct FrameSampler {
    task: Option<JoinHandle<()>>,
}

impl FrameSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin ticking every `period`.
    ///
    /// `sample` pulls a frame from the capture source; `NotReady` skips the tick,
    /// `Released` ends the loop. `on_frame` returning `Break` ends the loop too.
    /// A running sampler is stopped first.
    pub fn start<S, F, Fut>(&mut self, period: Duration, mut sample: S, mut on_frame: F)
    where
        S: FnMut() -> Result<Frame, CaptureError> + Send + 'static,
        F: FnMut(Frame) -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send,
    {
        self.stop();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame = match sample() {
                    Ok(frame) => frame,
                    Err(CaptureError::NotReady) => {
                        trace!("frame not ready, skipping tick");
                        continue;
                    }
                    Err(CaptureError::Released) => {
                        debug!("capture released, sampler exiting");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "frame sample failed, skipping tick");
                        continue;
                    }
                };
                if on_frame(frame).await.is_break() {
                    break;
                }
            }
        });
        self.task = Some(task);
        debug!(period_ms = period.as_millis() as u64, "sampler started");
    }

    /// Cancel the timer. Safe to call when not started or already stopped.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}
