//! Stateless per-frame inference service.
//!
//! One call decodes an image, runs the detector, derives the safety status,
//! draws the detections and re-encodes the result as JPEG. Nothing survives
//! between calls, so a single `InferenceService` can be shared by any number
//! of request threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::ImageError;
use thiserror::Error;

use crate::annotate::{annotate, encode_jpeg};
use crate::detect::{Detection, Detector};
use crate::status::{derive_status, SafetyStatus, StatusPolicy};

/// Server-side confidence threshold used when the request carries none.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;
/// JPEG quality of the single-shot endpoint (encoder default).
pub const DETECT_JPEG_QUALITY: u8 = 75;
/// JPEG quality of the streaming endpoint.
pub const STREAM_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum InferError {
    #[error("image decode failed: {0}")]
    Decode(#[source] ImageError),
    #[error("detector failed: {0:#}")]
    Detector(anyhow::Error),
    #[error("image encode failed: {0}")]
    Encode(#[source] ImageError),
}

impl InferError {
    /// Stable machine-readable kind, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            InferError::Decode(_) => "decode_error",
            InferError::Detector(_) => "detector_error",
            InferError::Encode(_) => "encode_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            InferError::Decode(_) => 400,
            InferError::Detector(_) | InferError::Encode(_) => 500,
        }
    }
}

/// The two HTTP entry points. They run the same pipeline and differ only in
/// log verbosity and output JPEG quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Detect,
    DetectStream,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Detect => "/detect",
            Endpoint::DetectStream => "/detect_stream",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/detect" => Some(Endpoint::Detect),
            "/detect_stream" => Some(Endpoint::DetectStream),
            _ => None,
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        match self {
            Endpoint::Detect => DETECT_JPEG_QUALITY,
            Endpoint::DetectStream => STREAM_JPEG_QUALITY,
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            Endpoint::Detect => log::Level::Info,
            Endpoint::DetectStream => log::Level::Debug,
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let trimmed = s.trim();
        let path = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        Self::from_path(&path)
            .ok_or_else(|| anyhow::anyhow!("unknown endpoint '{}'; expected detect or detect_stream", s))
    }
}

/// Response payload of one inference call.
#[derive(Clone, Debug)]
pub struct InferenceResult {
    /// JPEG bytes of the annotated frame.
    pub annotated_image: Vec<u8>,
    pub status: SafetyStatus,
    pub message: String,
    pub detections: Vec<Detection>,
    pub width: u32,
    pub height: u32,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct InferenceService {
    detector: Arc<dyn Detector>,
    default_threshold: f32,
    policy: StatusPolicy,
}

impl InferenceService {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            default_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            policy: StatusPolicy::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.default_threshold = sanitize_threshold(threshold, DEFAULT_CONFIDENCE_THRESHOLD);
        self
    }

    pub fn with_policy(mut self, policy: StatusPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Run the full pipeline on encoded image bytes.
    pub fn infer(&self, image_bytes: &[u8], threshold: f32) -> Result<InferenceResult, InferError> {
        self.infer_with_quality(image_bytes, threshold, DETECT_JPEG_QUALITY)
    }

    /// Serve one request for `endpoint`. `threshold` overrides the configured
    /// default when present.
    pub fn handle(
        &self,
        endpoint: Endpoint,
        image_bytes: &[u8],
        threshold: Option<f32>,
    ) -> Result<InferenceResult, InferError> {
        let threshold = threshold
            .map(|t| sanitize_threshold(t, self.default_threshold))
            .unwrap_or(self.default_threshold);
        let result = self.infer_with_quality(image_bytes, threshold, endpoint.jpeg_quality());
        match &result {
            Ok(res) => log::log!(
                endpoint.log_level(),
                "{} {}x{} detections={} status={} conf>={:.2} in {}ms",
                endpoint.path(),
                res.width,
                res.height,
                res.detections.len(),
                res.status,
                threshold,
                res.elapsed.as_millis()
            ),
            Err(err) => log::warn!("{} failed: {}", endpoint.path(), err),
        }
        result
    }

    fn infer_with_quality(
        &self,
        image_bytes: &[u8],
        threshold: f32,
        quality: u8,
    ) -> Result<InferenceResult, InferError> {
        let started = Instant::now();
        let image = image::load_from_memory(image_bytes)
            .map_err(InferError::Decode)?
            .into_rgb8();

        let detections = self
            .detector
            .infer(&image, threshold)
            .map_err(InferError::Detector)?;

        let report = derive_status(&detections, self.policy);
        if let Some(idx) = report.trigger {
            log::debug!(
                "status {} triggered by '{}' ({:.2})",
                report.status,
                detections[idx].label,
                detections[idx].confidence
            );
        }

        let annotated = annotate(&image, &detections);
        let annotated_image = encode_jpeg(&annotated, quality).map_err(InferError::Encode)?;

        Ok(InferenceResult {
            annotated_image,
            status: report.status,
            message: report.message,
            detections,
            width: image.width(),
            height: image.height(),
            elapsed: started.elapsed(),
        })
    }
}

fn sanitize_threshold(threshold: f32, fallback: f32) -> f32 {
    if threshold.is_finite() {
        threshold.clamp(0.0, 1.0)
    } else {
        fallback
    }
}
