use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pyrovision::client::{ClientError, RemoteResult};
use pyrovision::ingest::Frame;
use pyrovision::status::SafetyStatus;
use pyrovision::stream::{Dashboard, SessionSummary, StopReason, StreamSession, StreamSettings};

const RAW_SNAPSHOT: &str = "latest_raw.jpg";
const ANNOTATED_SNAPSHOT: &str = "latest_annotated.jpg";

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Terminal rendering of a stream session: a live status line on a TTY,
/// line-per-event output otherwise.
pub struct TerminalDashboard {
    spinner: Option<ProgressBar>,
    snapshot_dir: Option<PathBuf>,
    last_status: Option<SafetyStatus>,
    transient: Option<String>,
}

impl TerminalDashboard {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        let use_pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !disable_pretty,
                UiMode::Plain => false,
            };
        Self {
            spinner: use_pretty.then(new_spinner),
            snapshot_dir: None,
            last_status: None,
            transient: None,
        }
    }

    pub fn from_args(ui_flag: &str, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    /// Keep the latest raw and annotated frames as JPEG files in `dir`.
    pub fn with_snapshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.snapshot_dir = dir;
        self
    }

    /// Idle placeholder shown while no session runs.
    pub fn idle(&self, hint: &str) {
        self.print(&format!("○ stream idle. {}", hint));
    }

    pub fn print(&self, line: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(line),
            None => eprintln!("{}", line),
        }
    }

    fn refresh(&self, session: &StreamSession) {
        let Some(spinner) = &self.spinner else {
            return;
        };
        let status = match (&self.transient, session.last_status()) {
            (Some(err), _) => format!("⚠ {}", err),
            (None, Some(status)) => format!(
                "{} {}",
                badge(status),
                session.last_message().unwrap_or(status.default_message())
            ),
            (None, None) => "waiting for first result".to_string(),
        };
        spinner.set_message(format!(
            "{} | frames {} | alerts {} | dropped {} | {:.1} fps",
            status,
            session.frame_count(),
            session.detection_count(),
            session.dropped_count(),
            session.last_fps()
        ));
    }

    fn save_snapshot(&self, name: &str, bytes: &[u8]) {
        if let Some(dir) = &self.snapshot_dir {
            if let Err(err) = write_atomic(&dir.join(name), bytes) {
                log::warn!("failed to write snapshot {}: {}", name, err);
            }
        }
    }
}

impl Dashboard for TerminalDashboard {
    fn session_started(&mut self, settings: &StreamSettings) {
        self.last_status = None;
        self.transient = None;
        if let Some(spinner) = &self.spinner {
            spinner.enable_steady_tick(Duration::from_millis(120));
        }
        self.print(&format!(
            "▶ stream started (target {} fps, confidence {:.2})",
            settings.target_fps, settings.confidence_threshold
        ));
    }

    fn frame_captured(&mut self, frame: &Frame) {
        if self.snapshot_dir.is_some() {
            match frame.encode_jpeg(85) {
                Ok(jpeg) => self.save_snapshot(RAW_SNAPSHOT, &jpeg),
                Err(err) => log::warn!("failed to encode raw snapshot: {}", err),
            }
        }
    }

    fn frame_processed(&mut self, session: &StreamSession, result: &RemoteResult) {
        self.transient = None;
        self.save_snapshot(ANNOTATED_SNAPSHOT, &result.annotated_image);
        if self.last_status != Some(result.status) {
            self.last_status = Some(result.status);
            self.print(&format!("{} {}", badge(result.status), result.message));
        }
        self.refresh(session);
    }

    fn frame_dropped(&mut self, session: &StreamSession, error: &ClientError) {
        let text = truncate(&error.to_string(), 60);
        if self.spinner.is_none() {
            eprintln!("⚠ connection error: {}", text);
        }
        self.transient = Some(format!("connection error: {}", text));
        self.refresh(session);
    }

    fn fps_updated(&mut self, session: &StreamSession) {
        self.refresh(session);
    }

    fn session_stopped(&mut self, summary: &SessionSummary) {
        if let Some(spinner) = &self.spinner {
            spinner.disable_steady_tick();
            spinner.set_message("");
        }
        if let StopReason::CaptureFailed(err) = &summary.reason {
            self.print(&format!("⚠ failed to read frame from camera: {}", err));
        }
        self.print(&format!("■ stream stopped: {}", summary));
    }
}

fn new_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

fn badge(status: SafetyStatus) -> &'static str {
    match status {
        SafetyStatus::Danger => "🚨 DANGER",
        SafetyStatus::Warning => "⚠ WARNING",
        SafetyStatus::Safe => "✔ SAFE",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("jpg.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
