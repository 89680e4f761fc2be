//! Client-side streaming control loop.
//!
//! A capture thread pulls frames from the source and publishes them on a
//! depth-1 latest-frame channel. The loop takes one frame at a time, sends it
//! for inference, reports the result and throttles itself to the target rate.
//! Only one frame is in flight at any moment; frames captured while a request
//! is outstanding are overwritten, never queued.

mod channel;
mod control;
mod dashboard;
mod pacing;
mod session;

pub use channel::{latest_channel, LatestSender};
pub use control::{
    clamp_fps, Command, SessionControl, StreamSettings, MAX_TARGET_FPS, MIN_TARGET_FPS,
};
pub use dashboard::{Dashboard, NullDashboard};
pub use pacing::{achieved_fps, frame_interval, throttle_delay};
pub use session::{SessionSummary, StopReason, StreamSession};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::client::{ClientError, FrameInference};
use crate::ingest::{Frame, FrameSource};

const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// JPEG quality of frames sent to the server.
    pub jpeg_quality: u8,
    /// Send the session threshold with each frame.
    pub forward_threshold: bool,
    /// Longest wait for the next frame before the source is declared dead.
    pub frame_wait: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            forward_threshold: false,
            frame_wait: Duration::from_secs(5),
        }
    }
}

type Captured = std::result::Result<Frame, String>;

/// Run one session until it is stopped or the source fails.
///
/// `source` is connected here and dropped before this returns, whatever the
/// exit path. Failing to connect is an error and leaves the session idle;
/// every later failure ends the session with a summary.
pub fn run_session<S, I, D>(
    control: &SessionControl,
    session: &mut StreamSession,
    mut source: S,
    inference: &I,
    dashboard: &mut D,
    options: &SessionOptions,
) -> Result<SessionSummary>
where
    S: FrameSource,
    I: FrameInference + ?Sized,
    D: Dashboard + ?Sized,
{
    source.set_capture_fps(control.settings().target_fps);
    if let Err(err) = source.connect() {
        control.stop();
        return Err(err).context("open frame source");
    }

    session.start();
    let settings = control.settings();
    dashboard.session_started(&settings);
    log::info!(
        "stream started: {} @ {} fps target, conf {:.2}",
        source.stats().source,
        settings.target_fps,
        settings.confidence_threshold
    );

    let capture_stop = AtomicBool::new(false);
    let reason = std::thread::scope(|scope| {
        let (tx, rx) = latest_channel::<Captured>();
        let capture_stop = &capture_stop;
        let producer = scope.spawn(move || capture_frames(source, control, tx, capture_stop));

        let reason = consume(control, session, &rx, inference, dashboard, options);

        capture_stop.store(true, Ordering::SeqCst);
        drop(rx);
        match producer.join() {
            Ok(()) => reason,
            Err(_) => StopReason::CaptureFailed("capture thread panicked".to_string()),
        }
    });

    control.stop();
    let summary = session.stop(reason);
    match &summary.reason {
        StopReason::Requested => log::info!("stream stopped: {}", summary),
        StopReason::CaptureFailed(_) => log::warn!("stream stopped: {}", summary),
    }
    dashboard.session_stopped(&summary);
    Ok(summary)
}

fn capture_frames<S: FrameSource>(
    mut source: S,
    control: &SessionControl,
    tx: LatestSender<Captured>,
    stop: &AtomicBool,
) {
    let mut overwritten = 0u64;
    while !stop.load(Ordering::SeqCst) {
        // The target may change mid-session.
        source.set_capture_fps(control.settings().target_fps);
        match source.next_frame() {
            Ok(frame) => {
                if tx.publish(Ok(frame)) {
                    overwritten += 1;
                }
            }
            Err(err) => {
                tx.publish(Err(format!("{:#}", err)));
                break;
            }
        }
    }
    log::debug!(
        "capture thread done: {} frames captured, {} overwritten before use",
        source.stats().frames_captured,
        overwritten
    );
    // `source` drops here, releasing the device.
}

fn consume<I, D>(
    control: &SessionControl,
    session: &mut StreamSession,
    rx: &Receiver<Captured>,
    inference: &I,
    dashboard: &mut D,
    options: &SessionOptions,
) -> StopReason
where
    I: FrameInference + ?Sized,
    D: Dashboard + ?Sized,
{
    loop {
        if !control.is_running() {
            return StopReason::Requested;
        }
        let iteration_start = Instant::now();
        let settings = control.settings();

        let frame = match next_frame(control, rx, options.frame_wait) {
            Ok(Some(frame)) => frame,
            Ok(None) => return StopReason::Requested,
            Err(reason) => return StopReason::CaptureFailed(reason),
        };
        session.record_frame();
        dashboard.frame_captured(&frame);

        let threshold = options
            .forward_threshold
            .then_some(settings.confidence_threshold);
        let outcome = frame
            .encode_jpeg(options.jpeg_quality)
            .map_err(ClientError::Encode)
            .and_then(|jpeg| inference.submit(&jpeg, threshold));
        match outcome {
            Ok(result) => {
                session.record_result(result.status, &result.message);
                log::debug!(
                    "frame {}: {} '{}' in {}ms",
                    frame.sequence,
                    result.status,
                    result.message,
                    result.round_trip.as_millis()
                );
                dashboard.frame_processed(session, &result);
            }
            Err(err) => {
                session.record_drop();
                log::warn!("frame {} dropped: {}", frame.sequence, err);
                dashboard.frame_dropped(session, &err);
            }
        }

        if let Some(delay) = throttle_delay(iteration_start.elapsed(), settings.target_fps) {
            std::thread::sleep(delay);
        }
        session.record_fps(achieved_fps(iteration_start.elapsed()));
        dashboard.fps_updated(session);
    }
}

/// Wait for a frame while watching the stop flag. `Ok(None)` means a stop was
/// requested during the wait.
fn next_frame(
    control: &SessionControl,
    rx: &Receiver<Captured>,
    frame_wait: Duration,
) -> std::result::Result<Option<Frame>, String> {
    let deadline = Instant::now() + frame_wait;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(format!("no frame within {:?}", frame_wait));
        }
        match rx.recv_timeout((deadline - now).min(STOP_POLL)) {
            Ok(Ok(frame)) => return Ok(Some(frame)),
            Ok(Err(err)) => return Err(err),
            Err(RecvTimeoutError::Timeout) => {
                if !control.is_running() {
                    return Ok(None);
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Err("capture thread ended".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteResult;
    use anyhow::anyhow;
    use crate::ingest::SourceStats;
    use crate::status::SafetyStatus;
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingSource {
        remaining: usize,
        dropped: Arc<AtomicBool>,
        connect_fails: bool,
    }

    impl FrameSource for CountingSource {
        fn connect(&mut self) -> Result<()> {
            if self.connect_fails {
                Err(anyhow!("no camera"))
            } else {
                Ok(())
            }
        }

        fn next_frame(&mut self) -> Result<Frame> {
            if self.remaining == 0 {
                return Err(anyhow!("camera unplugged"));
            }
            self.remaining -= 1;
            std::thread::sleep(Duration::from_millis(2));
            Ok(Frame::new(RgbImage::new(16, 12), 1))
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                source: "counting".into(),
            }
        }
    }

    impl Drop for CountingSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    /// Records every capture rate it is handed and retargets the session
    /// after its second frame.
    struct RateRecordingSource {
        control: SessionControl,
        rates: Arc<std::sync::Mutex<Vec<u32>>>,
        served: usize,
    }

    impl FrameSource for RateRecordingSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            if self.served == 4 {
                return Err(anyhow!("end of clip"));
            }
            self.served += 1;
            if self.served == 2 {
                self.control.set_target_fps(12);
            }
            Ok(Frame::new(RgbImage::new(16, 12), self.served as u64))
        }

        fn set_capture_fps(&mut self, fps: u32) {
            self.rates.lock().unwrap().push(fps);
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.served as u64,
                source: "rates".into(),
            }
        }
    }

    struct FixedInference {
        status: SafetyStatus,
        calls: AtomicUsize,
    }

    impl FrameInference for FixedInference {
        fn submit(&self, _jpeg: &[u8], threshold: Option<f32>) -> Result<RemoteResult, ClientError> {
            assert_eq!(threshold, None);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteResult {
                status: self.status,
                message: self.status.default_message().to_string(),
                annotated_image: Vec::new(),
                width: 16,
                height: 12,
                round_trip: Duration::ZERO,
            })
        }
    }

    fn control() -> SessionControl {
        let control = SessionControl::new(StreamSettings::new(0.4, 30));
        control.start();
        control
    }

    #[test]
    fn capture_failure_ends_session_and_releases_source() -> Result<()> {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            remaining: 3,
            dropped: dropped.clone(),
            connect_fails: false,
        };
        let inference = FixedInference {
            status: SafetyStatus::Warning,
            calls: AtomicUsize::new(0),
        };
        let control = control();
        let mut session = StreamSession::new();
        let summary = run_session(
            &control,
            &mut session,
            source,
            &inference,
            &mut NullDashboard,
            &SessionOptions::default(),
        )?;

        assert!(matches!(summary.reason, StopReason::CaptureFailed(ref msg) if msg.contains("unplugged")));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!control.is_running());
        assert!(!session.is_running());
        let calls = inference.calls.load(Ordering::SeqCst) as u64;
        assert!(calls <= 3);
        assert_eq!(summary.frames, calls);
        assert_eq!(summary.detections, calls);
        Ok(())
    }

    #[test]
    fn connect_failure_leaves_session_idle() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            remaining: 3,
            dropped: dropped.clone(),
            connect_fails: true,
        };
        let inference = FixedInference {
            status: SafetyStatus::Safe,
            calls: AtomicUsize::new(0),
        };
        let control = control();
        let mut session = StreamSession::new();
        let result = run_session(
            &control,
            &mut session,
            source,
            &inference,
            &mut NullDashboard,
            &SessionOptions::default(),
        );
        assert!(result.is_err());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!control.is_running());
        assert_eq!(inference.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stopped_control_returns_immediately() -> Result<()> {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            remaining: usize::MAX,
            dropped: dropped.clone(),
            connect_fails: false,
        };
        let inference = FixedInference {
            status: SafetyStatus::Safe,
            calls: AtomicUsize::new(0),
        };
        let control = SessionControl::new(StreamSettings::new(0.4, 30));
        let mut session = StreamSession::new();
        let summary = run_session(
            &control,
            &mut session,
            source,
            &inference,
            &mut NullDashboard,
            &SessionOptions::default(),
        )?;
        assert_eq!(summary.reason, StopReason::Requested);
        assert_eq!(summary.frames, 0);
        assert!(dropped.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn source_follows_target_rate_changes() -> Result<()> {
        let control = control();
        let rates = Arc::new(std::sync::Mutex::new(Vec::new()));
        let source = RateRecordingSource {
            control: control.clone(),
            rates: rates.clone(),
            served: 0,
        };
        let inference = FixedInference {
            status: SafetyStatus::Safe,
            calls: AtomicUsize::new(0),
        };
        let mut session = StreamSession::new();
        run_session(
            &control,
            &mut session,
            source,
            &inference,
            &mut NullDashboard,
            &SessionOptions::default(),
        )?;

        let rates = rates.lock().unwrap();
        assert_eq!(rates.first(), Some(&30));
        assert_eq!(rates.last(), Some(&12));
        Ok(())
    }
}
