use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const MIN_TARGET_FPS: u32 = 1;
pub const MAX_TARGET_FPS: u32 = 30;

pub fn clamp_fps(fps: u32) -> u32 {
    fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS)
}

/// Knobs the loop re-reads at the top of every iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamSettings {
    pub confidence_threshold: f32,
    pub target_fps: u32,
}

impl StreamSettings {
    pub fn new(confidence_threshold: f32, target_fps: u32) -> Self {
        Self {
            confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
            target_fps: clamp_fps(target_fps),
        }
    }
}

/// Shared start/stop flag and runtime settings.
///
/// Clones share state, so the stdin reader, the Ctrl-C handler and the
/// control loop can each hold one.
#[derive(Clone, Debug)]
pub struct SessionControl {
    running: Arc<AtomicBool>,
    settings: Arc<Mutex<StreamSettings>>,
}

impl SessionControl {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            settings: Arc::new(Mutex::new(settings)),
        }
    }

    /// IDLE → RUNNING. Returns false if already running.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// RUNNING → IDLE. Returns false if already idle.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> StreamSettings {
        *self.lock()
    }

    /// Returns the value actually applied after clamping.
    pub fn set_target_fps(&self, fps: u32) -> u32 {
        let fps = clamp_fps(fps);
        self.lock().target_fps = fps;
        fps
    }

    pub fn set_confidence(&self, threshold: f32) -> Result<f32> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("confidence must be within [0, 1], got {}", threshold));
        }
        self.lock().confidence_threshold = threshold;
        Ok(threshold)
    }

    fn lock(&self) -> MutexGuard<'_, StreamSettings> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Operator commands read from stdin by the client binary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Fps(u32),
    Confidence(f32),
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_lowercase();
        let arg = words.next();
        let command = match (verb.as_str(), arg) {
            ("start", None) => Command::Start,
            ("stop", None) => Command::Stop,
            ("status", None) => Command::Status,
            ("help" | "?", None) => Command::Help,
            ("quit" | "exit" | "q", None) => Command::Quit,
            ("fps", Some(value)) => Command::Fps(
                value
                    .parse()
                    .map_err(|_| anyhow!("fps expects an integer, got '{}'", value))?,
            ),
            ("conf" | "confidence", Some(value)) => Command::Confidence(
                value
                    .parse()
                    .map_err(|_| anyhow!("conf expects a number, got '{}'", value))?,
            ),
            (other, _) => return Err(anyhow!("unknown command '{}'; try 'help'", other)),
        };
        if words.next().is_some() {
            return Err(anyhow!("too many arguments for '{}'", verb));
        }
        Ok(command)
    }
}
