//! Frame ingestion sources.
//!
//! Every source yields decoded RGB [`Frame`]s through the [`FrameSource`]
//! trait. The source is picked from a URI:
//! - `stub://<name>?scene=cycle&fps=30&frames=0` synthetic animated scene
//! - `http(s)://...` MJPEG stream or JPEG snapshot endpoint
//! - `/dev/videoN` or `v4l2:///dev/videoN` local camera (feature: ingest-v4l2)
//! - any other path: an image file, or a directory of images played in a loop
//!
//! Sources own their device or connection; dropping the source releases it.

pub mod file;
pub mod mjpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use image::{ImageResult, RgbImage};
use std::time::{Duration, Instant};

pub use file::FileSource;
pub use mjpeg::MjpegSource;
pub use synthetic::{Scene, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// One captured frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    /// Per-source capture counter, starting at 1.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode for the wire.
    pub fn encode_jpeg(&self, quality: u8) -> ImageResult<Vec<u8>> {
        crate::annotate::encode_jpeg(&self.image, quality)
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A blocking producer of frames.
///
/// `next_frame` blocks until a frame is available. An error means the source
/// can deliver no more frames; callers end the session rather than retry.
pub trait FrameSource: Send {
    /// Open the device or connection.
    fn connect(&mut self) -> Result<()>;

    fn next_frame(&mut self) -> Result<Frame>;

    /// Rate the consumer currently wants frames at. Sources that poll or
    /// replay pace themselves to it; push sources ignore it.
    fn set_capture_fps(&mut self, _fps: u32) {}

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn set_capture_fps(&mut self, fps: u32) {
        (**self).set_capture_fps(fps)
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Build an unconnected source for `uri`.
pub fn open_source(uri: &str) -> Result<Box<dyn FrameSource>> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("empty frame source"));
    }
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::from_uri(uri)?));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Box::new(MjpegSource::new(uri)?));
    }
    if let Some(device) = v4l2_device(uri) {
        return open_v4l2(device);
    }
    if uri.contains("://") {
        return Err(anyhow!("unsupported frame source scheme in '{}'", uri));
    }
    Ok(Box::new(FileSource::new(uri)?))
}

fn v4l2_device(uri: &str) -> Option<&str> {
    if let Some(path) = uri.strip_prefix("v4l2://") {
        return Some(path);
    }
    uri.starts_with("/dev/video").then_some(uri)
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(device: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(v4l2::V4l2Config {
        device: device.to_string(),
        ..v4l2::V4l2Config::default()
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(device: &str) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "camera device {} requires the ingest-v4l2 feature",
        device
    ))
}

/// Minimum spacing between frames for a capture rate; zero disables pacing.
pub(crate) fn capture_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / fps as f64)
    }
}
