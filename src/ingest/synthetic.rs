//! Synthetic camera (`stub://`).
//!
//! Renders a small animated scene so the whole relay can be exercised without
//! hardware. Query options:
//! - `scene` = `cycle` (default) | `clear` | `smoke` | `fire`
//! - `fps` capture rate the source paces itself to (default 30, 0 = unpaced)
//! - `frames` number of frames before the stream ends (default 0 = endless)
//! - `width`, `height` (default 640x480)

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use rand::Rng;
use std::str::FromStr;
use std::time::Instant;
use url::Url;

use super::{capture_interval, Frame, FrameSource, SourceStats};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
/// Frames spent in each phase of the `cycle` scene.
const PHASE_FRAMES: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    /// clear → smoke → fire → clear ...
    Cycle,
    Clear,
    Smoke,
    Fire,
}

impl FromStr for Scene {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cycle" => Ok(Scene::Cycle),
            "clear" => Ok(Scene::Clear),
            "smoke" => Ok(Scene::Smoke),
            "fire" => Ok(Scene::Fire),
            other => Err(anyhow!(
                "unknown synthetic scene '{}'; expected cycle, clear, smoke or fire",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub scene: Scene,
    pub fps: u32,
    /// Stop after this many frames; 0 runs forever.
    pub max_frames: u64,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            scene: Scene::Cycle,
            fps: DEFAULT_FPS,
            max_frames: 0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    connected: bool,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
            next_due: None,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).with_context(|| format!("parse synthetic source '{}'", uri))?;
        let mut config = SyntheticConfig {
            name: format!(
                "stub://{}",
                url.host_str().filter(|h| !h.is_empty()).unwrap_or("camera")
            ),
            ..SyntheticConfig::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "scene" => config.scene = value.parse()?,
                "fps" => config.fps = parse_option(&key, &value)?,
                "frames" => config.max_frames = parse_option(&key, &value)?,
                "width" => config.width = parse_option(&key, &value)?,
                "height" => config.height = parse_option(&key, &value)?,
                other => log::warn!("SyntheticSource: ignoring unknown option '{}'", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(Self::new(config))
    }

    /// Phase shown for the given frame number.
    fn phase(&self, frame: u64) -> Scene {
        match self.config.scene {
            Scene::Cycle => match (frame / PHASE_FRAMES) % 3 {
                0 => Scene::Clear,
                1 => Scene::Smoke,
                _ => Scene::Fire,
            },
            fixed => fixed,
        }
    }

    fn render(&self, frame: u64) -> RgbImage {
        let (w, h) = (self.config.width, self.config.height);
        let mut rng = rand::thread_rng();
        let mut image = RgbImage::from_fn(w, h, |_x, y| {
            // Blue-green backdrop; channel spread keeps it out of the smoke band.
            let shade = (y * 60 / h) as u8;
            Rgb([10 + shade / 3, 40 + shade, 90 + shade])
        });

        let (pw, ph) = (w / 3, h / 3);
        let sway = (frame % 20) as u32;
        let x0 = ((w - pw) / 2 + sway).min(w - pw);
        let y0 = h - ph - h / 10;
        match self.phase(frame) {
            Scene::Clear | Scene::Cycle => {}
            Scene::Smoke => {
                for y in y0..(y0 + ph).min(h) {
                    for x in x0..(x0 + pw).min(w) {
                        let grey = 170u8.saturating_add(rng.gen_range(0..12));
                        image.put_pixel(x, y, Rgb([grey, grey, grey.saturating_sub(4)]));
                    }
                }
            }
            Scene::Fire => {
                for y in y0..(y0 + ph).min(h) {
                    for x in x0..(x0 + pw).min(w) {
                        let flicker: u8 = rng.gen_range(0..40);
                        image.put_pixel(x, y, Rgb([235, 110 + flicker, 20 + flicker / 2]));
                    }
                }
            }
        }
        image
    }

    fn wait_until_due(&mut self) {
        let interval = capture_interval(self.config.fps);
        if interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Do not accumulate debt when the consumer fell behind.
        self.next_due = Some(due.max(now) + interval);
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.next_due = None;
        log::info!(
            "SyntheticSource: connected to {} ({}x{}, {:?})",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.scene
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self.config.max_frames > 0 && self.frame_count >= self.config.max_frames {
            return Err(anyhow!(
                "synthetic stream ended after {} frames",
                self.frame_count
            ));
        }
        self.wait_until_due();
        let image = self.render(self.frame_count);
        self.frame_count += 1;
        Ok(Frame::new(image, self.frame_count))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.name.clone(),
        }
    }
}

fn parse_option<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid value '{}' for synthetic option '{}'", value, key))
}
