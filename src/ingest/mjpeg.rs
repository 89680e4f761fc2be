//! HTTP camera source.
//!
//! Reads an MJPEG `multipart/x-mixed-replace` stream, or polls a URL that
//! returns one JPEG snapshot per request (IP cameras, ESP32-CAM, etc.).
//! Snapshot polling is paced to the capture rate; a push stream is read as
//! fast as the camera sends.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::{capture_interval, Frame, FrameSource, SourceStats};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SNAPSHOT_FPS: u32 = 10;

pub struct MjpegSource {
    url: String,
    agent: ureq::Agent,
    fps: u32,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegReader),
    /// `pending` holds the body of the connect request until it is used.
    Snapshot { pending: Option<Vec<u8>> },
}

impl MjpegSource {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).context("parse camera url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }
        Ok(Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(CONNECT_TIMEOUT)
                .timeout_read(CONNECT_TIMEOUT)
                .build(),
            fps: DEFAULT_SNAPSHOT_FPS,
            stream: None,
            last_frame_at: None,
            frame_count: 0,
        })
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

    fn fetch_snapshot(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        read_snapshot(response)
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        match self.stream.as_mut() {
            Some(HttpStream::Mjpeg(reader)) => return reader.read_next_jpeg(),
            Some(HttpStream::Snapshot { pending }) => {
                if let Some(bytes) = pending.take() {
                    return Ok(bytes);
                }
            }
            None => return Err(anyhow!("http camera not connected; call connect() first")),
        }
        self.pace();
        self.fetch_snapshot()
    }
}

fn read_snapshot(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(anyhow!("jpeg snapshot exceeds {} bytes", MAX_JPEG_BYTES));
    }
    Ok(bytes)
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to http camera {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        self.stream = Some(if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegReader::new(response.into_reader()))
        } else {
            HttpStream::Snapshot {
                pending: Some(read_snapshot(response)?),
            }
        });
        self.last_frame_at = None;
        log::info!(
            "MjpegSource: connected to {} ({})",
            self.url,
            if content_type.contains("multipart") { "mjpeg" } else { "snapshot" }
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let bytes = self.read_jpeg()?;
        let image = image::load_from_memory(&bytes)
            .context("decode camera jpeg")?
            .into_rgb8();
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
            source: self.url.clone(),
        }
    }
}

/// Splits a byte stream into JPEG images by SOI/EOI markers, ignoring the
/// multipart framing around them.
struct MjpegReader {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
