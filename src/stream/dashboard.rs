use crate::client::{ClientError, RemoteResult};
use crate::ingest::Frame;

use super::control::StreamSettings;
use super::session::{SessionSummary, StreamSession};

/// Display side of a streaming session.
///
/// Called from the control loop thread, in loop order. Every hook has a no-op
/// default so a renderer only implements what it shows.
pub trait Dashboard {
    fn session_started(&mut self, _settings: &StreamSettings) {}

    /// Raw frame, before it is sent.
    fn frame_captured(&mut self, _frame: &Frame) {}

    fn frame_processed(&mut self, _session: &StreamSession, _result: &RemoteResult) {}

    /// Called exactly once per dropped frame.
    fn frame_dropped(&mut self, _session: &StreamSession, _error: &ClientError) {}

    fn fps_updated(&mut self, _session: &StreamSession) {}

    fn session_stopped(&mut self, _summary: &SessionSummary) {}
}

/// Renders nothing.
pub struct NullDashboard;

impl Dashboard for NullDashboard {}
