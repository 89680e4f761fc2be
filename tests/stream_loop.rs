use anyhow::Result;
use image::{Rgb, RgbImage};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pyrovision::client::{ClientError, FrameInference, InferenceClient, RemoteResult};
use pyrovision::ingest::{MjpegSource, SyntheticSource};
use pyrovision::service::Endpoint;
use pyrovision::status::SafetyStatus;
use pyrovision::stream::{
    run_session, Dashboard, SessionControl, SessionOptions, StopReason, StreamSession,
    StreamSettings,
};

const SOURCE: &str = "stub://test?scene=fire&fps=0&width=64&height=48";

/// Stops the session after a fixed number of handled frames and keeps a
/// record of every hook call.
struct RecordingDashboard {
    control: SessionControl,
    stop_after: usize,
    processed: Vec<SafetyStatus>,
    dropped: Vec<String>,
    timeouts: usize,
    fps: Vec<f64>,
    stopped: usize,
}

impl RecordingDashboard {
    fn new(control: &SessionControl, stop_after: usize) -> Self {
        Self {
            control: control.clone(),
            stop_after,
            processed: Vec::new(),
            dropped: Vec::new(),
            timeouts: 0,
            fps: Vec::new(),
            stopped: 0,
        }
    }

    fn handled(&self) -> usize {
        self.processed.len() + self.dropped.len()
    }

    fn maybe_stop(&self) {
        if self.handled() >= self.stop_after {
            self.control.stop();
        }
    }
}

impl Dashboard for RecordingDashboard {
    fn frame_processed(&mut self, _session: &StreamSession, result: &RemoteResult) {
        self.processed.push(result.status);
        self.maybe_stop();
    }

    fn frame_dropped(&mut self, _session: &StreamSession, error: &ClientError) {
        if matches!(error, ClientError::Timeout(_)) {
            self.timeouts += 1;
        }
        self.dropped.push(error.to_string());
        self.maybe_stop();
    }

    fn fps_updated(&mut self, session: &StreamSession) {
        self.fps.push(session.last_fps());
    }

    fn session_stopped(&mut self, _summary: &pyrovision::stream::SessionSummary) {
        self.stopped += 1;
    }
}

/// Answers every frame with a fixed status after a fixed delay.
struct SlowInference {
    delay: Duration,
    status: SafetyStatus,
    calls: AtomicUsize,
}

impl SlowInference {
    fn new(delay: Duration, status: SafetyStatus) -> Self {
        Self {
            delay,
            status,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FrameInference for SlowInference {
    fn submit(&self, _jpeg: &[u8], _threshold: Option<f32>) -> Result<RemoteResult, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(RemoteResult {
            status: self.status,
            message: self.status.default_message().to_string(),
            annotated_image: Vec::new(),
            width: 64,
            height: 48,
            round_trip: self.delay,
        })
    }
}

/// Serves the same JPEG to every GET, one request per connection, and counts
/// the requests.
fn spawn_snapshot_camera() -> Result<(SocketAddr, Arc<AtomicUsize>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let gets = Arc::new(AtomicUsize::new(0));
    let jpeg = pyrovision::annotate::encode_jpeg(&RgbImage::from_pixel(32, 24, Rgb([200, 80, 20])), 90)?;
    let counter = gets.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut request = Vec::new();
            let mut chunk = [0u8; 512];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&chunk[..n]),
                }
            }
            if request.starts_with(b"GET ") {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                jpeg.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&jpeg);
        }
    });
    Ok((addr, gets))
}

fn started_control(fps: u32) -> SessionControl {
    let control = SessionControl::new(StreamSettings::new(0.4, fps));
    control.start();
    control
}

#[test]
fn unresponsive_server_drops_each_frame_once_and_keeps_going() -> Result<()> {
    // Connections sit in the listen backlog and are never answered.
    let silent = TcpListener::bind("127.0.0.1:0")?;
    let url = format!("http://{}", silent.local_addr()?);
    let client = InferenceClient::new(&url, Endpoint::DetectStream, Duration::from_millis(300))?;

    let control = started_control(30);
    let mut dashboard = RecordingDashboard::new(&control, 3);
    let mut session = StreamSession::new();
    let summary = run_session(
        &control,
        &mut session,
        SyntheticSource::from_uri(SOURCE)?,
        &client,
        &mut dashboard,
        &SessionOptions::default(),
    )?;

    assert_eq!(summary.reason, StopReason::Requested);
    assert_eq!(dashboard.dropped.len(), 3);
    assert_eq!(dashboard.timeouts, 3);
    assert!(dashboard.processed.is_empty());
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.dropped, 3);
    assert_eq!(summary.detections, 0);
    assert_eq!(summary.last_status, None);
    assert_eq!(dashboard.stopped, 1);
    drop(silent);
    Ok(())
}

#[test]
fn slow_round_trip_limits_achieved_rate() -> Result<()> {
    let inference = SlowInference::new(Duration::from_millis(200), SafetyStatus::Safe);
    let control = started_control(30);
    let mut dashboard = RecordingDashboard::new(&control, 4);
    let mut session = StreamSession::new();
    run_session(
        &control,
        &mut session,
        SyntheticSource::from_uri(SOURCE)?,
        &inference,
        &mut dashboard,
        &SessionOptions::default(),
    )?;

    assert_eq!(dashboard.fps.len(), 4);
    for fps in &dashboard.fps {
        assert!(*fps <= 5.01, "fps {} above what a 200ms round trip allows", fps);
        assert!(*fps > 3.5, "fps {} too low", fps);
    }
    Ok(())
}

#[test]
fn fast_round_trip_is_throttled_to_target() -> Result<()> {
    let inference = SlowInference::new(Duration::ZERO, SafetyStatus::Safe);
    let control = started_control(10);
    let mut dashboard = RecordingDashboard::new(&control, 5);
    let mut session = StreamSession::new();
    let summary = run_session(
        &control,
        &mut session,
        SyntheticSource::from_uri(SOURCE)?,
        &inference,
        &mut dashboard,
        &SessionOptions::default(),
    )?;

    assert_eq!(summary.frames, 5);
    for fps in &dashboard.fps {
        assert!(*fps <= 10.0 + 1e-6, "fps {} exceeds target", fps);
    }
    // Five paced iterations of 100ms each.
    assert!(summary.elapsed >= Duration::from_millis(450));
    Ok(())
}

#[test]
fn alerts_are_counted_and_restart_resets_counters() -> Result<()> {
    let inference = SlowInference::new(Duration::ZERO, SafetyStatus::Danger);
    let control = started_control(30);
    let mut session = StreamSession::new();

    let mut dashboard = RecordingDashboard::new(&control, 4);
    let first = run_session(
        &control,
        &mut session,
        SyntheticSource::from_uri(SOURCE)?,
        &inference,
        &mut dashboard,
        &SessionOptions::default(),
    )?;
    assert_eq!(first.frames, 4);
    assert_eq!(first.detections, 4);
    assert_eq!(first.last_status, Some(SafetyStatus::Danger));
    assert!(!control.is_running());

    assert!(control.start());
    let mut dashboard = RecordingDashboard::new(&control, 2);
    let second = run_session(
        &control,
        &mut session,
        SyntheticSource::from_uri(SOURCE)?,
        &inference,
        &mut dashboard,
        &SessionOptions::default(),
    )?;
    assert_eq!(second.frames, 2);
    assert_eq!(second.detections, 2);
    assert_eq!(session.frame_count(), 2);
    assert_eq!(inference.calls.load(Ordering::SeqCst), 6);
    Ok(())
}

#[test]
fn finite_source_ends_session_with_capture_failure() -> Result<()> {
    let inference = SlowInference::new(Duration::ZERO, SafetyStatus::Safe);
    let control = started_control(30);
    let mut dashboard = RecordingDashboard::new(&control, usize::MAX);
    let mut session = StreamSession::new();
    let summary = run_session(
        &control,
        &mut session,
        SyntheticSource::from_uri("stub://short?scene=clear&fps=0&frames=3&width=32&height=32")?,
        &inference,
        &mut dashboard,
        &SessionOptions::default(),
    )?;

    assert!(matches!(summary.reason, StopReason::CaptureFailed(_)));
    assert!(summary.frames <= 3);
    assert!(!control.is_running());
    Ok(())
}

#[test]
fn snapshot_camera_is_polled_at_target_rate() -> Result<()> {
    let (addr, gets) = spawn_snapshot_camera()?;
    let inference = SlowInference::new(Duration::ZERO, SafetyStatus::Safe);
    let control = started_control(2);
    let mut dashboard = RecordingDashboard::new(&control, 3);
    let mut session = StreamSession::new();
    let summary = run_session(
        &control,
        &mut session,
        MjpegSource::new(&format!("http://{}/capture", addr))?,
        &inference,
        &mut dashboard,
        &SessionOptions::default(),
    )?;

    assert_eq!(summary.reason, StopReason::Requested);
    assert_eq!(dashboard.processed.len(), 3);
    // Three frames at 2 fps take about a second; an unpaced poller would
    // issue hundreds of requests in that time.
    let requests = gets.load(Ordering::SeqCst);
    assert!(requests >= 3, "only {} requests", requests);
    assert!(requests <= 6, "{} requests for 3 frames at 2 fps", requests);
    Ok(())
}
