use std::fmt;
use std::time::{Duration, Instant};

use crate::status::SafetyStatus;

/// Counters and last-seen state of one streaming session.
///
/// Owned by the control loop; everything is reset by [`StreamSession::start`].
#[derive(Clone, Debug, Default)]
pub struct StreamSession {
    running: bool,
    start_time: Option<Instant>,
    frame_count: u64,
    detection_count: u64,
    dropped_count: u64,
    last_status: Option<SafetyStatus>,
    last_message: Option<String>,
    last_fps: f64,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        *self = Self {
            running: true,
            start_time: Some(Instant::now()),
            ..Self::default()
        };
    }

    pub fn stop(&mut self, reason: StopReason) -> SessionSummary {
        self.running = false;
        SessionSummary {
            frames: self.frame_count,
            detections: self.detection_count,
            dropped: self.dropped_count,
            elapsed: self.elapsed(),
            last_status: self.last_status,
            reason,
        }
    }

    /// A frame was captured and submitted.
    pub(crate) fn record_frame(&mut self) {
        self.frame_count += 1;
    }

    pub(crate) fn record_result(&mut self, status: SafetyStatus, message: &str) {
        if status.is_alert() {
            self.detection_count += 1;
        }
        self.last_status = Some(status);
        self.last_message = Some(message.to_string());
    }

    pub(crate) fn record_drop(&mut self) {
        self.dropped_count += 1;
    }

    pub(crate) fn record_fps(&mut self, fps: f64) {
        self.last_fps = fps;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames whose status was not SAFE.
    pub fn detection_count(&self) -> u64 {
        self.detection_count
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    pub fn last_status(&self) -> Option<SafetyStatus> {
        self.last_status
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn last_fps(&self) -> f64 {
        self.last_fps
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Stop action from the operator or a shutdown signal.
    Requested,
    /// The frame source failed; the session cannot continue.
    CaptureFailed(String),
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub frames: u64,
    pub detections: u64,
    pub dropped: u64,
    pub elapsed: Duration,
    pub last_status: Option<SafetyStatus>,
    pub reason: StopReason,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} detections, {} dropped in {:.1}s",
            self.frames,
            self.detections,
            self.dropped,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(status) = self.last_status {
            write!(f, ", last status {}", status)?;
        }
        match &self.reason {
            StopReason::Requested => Ok(()),
            StopReason::CaptureFailed(err) => write!(f, " (capture failed: {})", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_resets_counters() {
        let mut session = StreamSession::new();
        session.start();
        session.record_frame();
        session.record_result(SafetyStatus::Danger, "FIRE DETECTED!");
        session.record_drop();
        session.record_fps(9.5);
        let summary = session.stop(StopReason::Requested);
        assert_eq!((summary.frames, summary.detections, summary.dropped), (1, 1, 1));
        assert!(!session.is_running());

        session.start();
        assert!(session.is_running());
        assert_eq!(session.frame_count(), 0);
        assert_eq!(session.detection_count(), 0);
        assert_eq!(session.dropped_count(), 0);
        assert_eq!(session.last_status(), None);
        assert_eq!(session.last_fps(), 0.0);
    }

    #[test]
    fn only_alerts_count_as_detections() {
        let mut session = StreamSession::new();
        session.start();
        session.record_result(SafetyStatus::Safe, "All clear");
        session.record_result(SafetyStatus::Warning, "Smoke detected");
        session.record_result(SafetyStatus::Safe, "All clear");
        assert_eq!(session.detection_count(), 1);
        assert_eq!(session.last_status(), Some(SafetyStatus::Safe));
        assert_eq!(session.last_message(), Some("All clear"));
    }

    #[test]
    fn summary_mentions_capture_failure() {
        let mut session = StreamSession::new();
        session.start();
        let summary = session.stop(StopReason::CaptureFailed("camera unplugged".into()));
        assert!(summary.to_string().contains("capture failed: camera unplugged"));
    }
}
