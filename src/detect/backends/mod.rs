pub mod color;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::{DetectorKind, DetectorSettings};
use crate::detect::backend::Detector;

pub use color::ColorDetector;
pub use stub::StubDetector;

#[cfg(feature = "backend-tract")]
pub use tract::YoloDetector;

/// Build the detector selected in the server configuration.
pub fn build_detector(settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    match settings.kind {
        DetectorKind::Color => {
            let (fire, smoke) = class_labels(&settings.labels);
            Ok(Arc::new(ColorDetector::new().with_labels(fire, smoke)))
        }
        DetectorKind::Stub => Ok(Arc::new(StubDetector::empty())),
        DetectorKind::Tract => build_tract(settings),
    }
}

/// Pick the fire and smoke label names from the configured label table,
/// falling back to the plain names.
fn class_labels(labels: &[String]) -> (String, String) {
    let find = |needle: &str| {
        labels
            .iter()
            .find(|label| label.to_lowercase().contains(needle))
            .cloned()
            .unwrap_or_else(|| needle.to_string())
    };
    (find("fire"), find("smoke"))
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires a model path"))?;
    let detector = YoloDetector::new(path, settings.model_input, settings.labels.clone())?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    Err(anyhow!(
        "tract detector requires the backend-tract feature"
    ))
}
