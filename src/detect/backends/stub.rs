use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::Detector;
use crate::detect::result::Detection;

/// Stub backend for testing. Returns a fixed detection set for every image.
///
/// The scripted detections are filtered by the requested threshold so the
/// threshold path is exercised the same way a real model would.
#[derive(Clone, Debug, Default)]
pub struct StubDetector {
    detections: Vec<Detection>,
    failure: Option<String>,
}

impl StubDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            failure: None,
        }
    }

    /// A detector that finds nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A detector whose every invocation fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            detections: Vec::new(),
            failure: Some(message.into()),
        }
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&self, _image: &RgbImage, threshold: f32) -> Result<Vec<Detection>> {
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self
            .detections
            .iter()
            .filter(|det| det.confidence >= threshold)
            .cloned()
            .collect())
    }
}
