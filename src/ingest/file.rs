//! Local image frame source.
//!
//! A single image file is replayed as a still camera. A directory plays its
//! JPEG/PNG files in name order and loops. Playback follows the session's
//! target rate once a session drives the source.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{capture_interval, Frame, FrameSource, SourceStats};

const DEFAULT_FPS: u32 = 10;
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct FileSource {
    path: PathBuf,
    fps: u32,
    playlist: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(anyhow!("file source path is empty"));
        }
        Ok(Self {
            path,
            fps: DEFAULT_FPS,
            playlist: Vec::new(),
            cursor: 0,
            frame_count: 0,
            last_frame_at: None,
        })
    }

    /// Playback rate; 0 plays as fast as frames are pulled.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    fn pace(&self) {
        let interval = capture_interval(self.fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        let meta = std::fs::metadata(&self.path)
            .with_context(|| format!("open frame source {}", self.path.display()))?;
        self.playlist = if meta.is_dir() {
            list_images(&self.path)?
        } else {
            vec![self.path.clone()]
        };
        if self.playlist.is_empty() {
            return Err(anyhow!("no images found in {}", self.path.display()));
        }
        self.cursor = 0;
        log::info!(
            "FileSource: connected to {} ({} image(s))",
            self.path.display(),
            self.playlist.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.playlist.is_empty() {
            return Err(anyhow!("file source not connected; call connect() first"));
        }
        self.pace();
        let path = self.playlist[self.cursor].clone();
        let image = image::open(&path)
            .with_context(|| format!("decode {}", path.display()))?
            .into_rgb8();
        self.cursor = (self.cursor + 1) % self.playlist.len();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Frame::new(image, self.frame_count))
    }

    fn set_capture_fps(&mut self, fps: u32) {
        self.fps = fps;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.display().to_string(),
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}
