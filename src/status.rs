//! Safety status derivation.
//!
//! The status of a frame is a pure function of that frame's detections. There
//! is no smoothing or memory across frames: one missed detection flips the
//! status immediately.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::detect::Detection;

pub const FIRE_ALERT_MESSAGE: &str = "FIRE DETECTED!";
pub const SMOKE_ALERT_MESSAGE: &str = "Smoke detected";
pub const ALL_CLEAR_MESSAGE: &str = "All clear";

const FIRE_KEYWORD: &str = "fire";
const SMOKE_KEYWORD: &str = "smoke";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyStatus {
    Safe,
    Warning,
    Danger,
}

impl SafetyStatus {
    /// Wire form, as carried in the `X-Detection-Status` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyStatus::Safe => "SAFE",
            SafetyStatus::Warning => "WARNING",
            SafetyStatus::Danger => "DANGER",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            SafetyStatus::Safe => ALL_CLEAR_MESSAGE,
            SafetyStatus::Warning => SMOKE_ALERT_MESSAGE,
            SafetyStatus::Danger => FIRE_ALERT_MESSAGE,
        }
    }

    /// Anything other than SAFE counts as an alert.
    pub fn is_alert(&self) -> bool {
        !matches!(self, SafetyStatus::Safe)
    }
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "SAFE" => Ok(SafetyStatus::Safe),
            "WARNING" => Ok(SafetyStatus::Warning),
            "DANGER" => Ok(SafetyStatus::Danger),
            other => Err(anyhow!("unknown detection status '{}'", other)),
        }
    }
}

/// How competing fire/smoke detections in one frame are resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Scan detections in detector order. The first fire match wins and stops
    /// the scan; otherwise the last smoke match seen is reported.
    #[default]
    SourceOrder,
    /// Report the highest-confidence fire match, else the highest-confidence
    /// smoke match. Fire still outranks smoke.
    HighestConfidence,
}

impl FromStr for StatusPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "source_order" | "source-order" => Ok(StatusPolicy::SourceOrder),
            "highest_confidence" | "highest-confidence" => Ok(StatusPolicy::HighestConfidence),
            other => Err(anyhow!(
                "unknown status policy '{}'; expected source_order or highest_confidence",
                other
            )),
        }
    }
}

/// Derived status for one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub status: SafetyStatus,
    pub message: String,
    /// Index of the detection that decided the status, if any.
    pub trigger: Option<usize>,
}

impl StatusReport {
    fn new(status: SafetyStatus, trigger: Option<usize>) -> Self {
        Self {
            status,
            message: status.default_message().to_string(),
            trigger,
        }
    }

    pub fn safe() -> Self {
        Self::new(SafetyStatus::Safe, None)
    }
}

pub fn derive_status(detections: &[Detection], policy: StatusPolicy) -> StatusReport {
    match policy {
        StatusPolicy::SourceOrder => derive_source_order(detections),
        StatusPolicy::HighestConfidence => derive_highest_confidence(detections),
    }
}

fn derive_source_order(detections: &[Detection]) -> StatusReport {
    let mut report = StatusReport::safe();
    for (idx, det) in detections.iter().enumerate() {
        if det.label_contains(FIRE_KEYWORD) {
            return StatusReport::new(SafetyStatus::Danger, Some(idx));
        } else if det.label_contains(SMOKE_KEYWORD) {
            report = StatusReport::new(SafetyStatus::Warning, Some(idx));
        }
    }
    report
}

fn derive_highest_confidence(detections: &[Detection]) -> StatusReport {
    let best = |keyword: &str| {
        detections
            .iter()
            .enumerate()
            .filter(|(_, det)| det.label_contains(keyword))
            .max_by(|(_, a), (_, b)| a.confidence.total_cmp(&b.confidence))
            .map(|(idx, _)| idx)
    };
    if let Some(idx) = best(FIRE_KEYWORD) {
        return StatusReport::new(SafetyStatus::Danger, Some(idx));
    }
    if let Some(idx) = best(SMOKE_KEYWORD) {
        return StatusReport::new(SafetyStatus::Warning, Some(idx));
    }
    StatusReport::safe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn empty_set_is_safe() {
        let report = derive_status(&[], StatusPolicy::SourceOrder);
        assert_eq!(report.status, SafetyStatus::Safe);
        assert_eq!(report.message, ALL_CLEAR_MESSAGE);
        assert_eq!(report.trigger, None);
    }

    #[test]
    fn any_fire_is_danger_regardless_of_others() {
        for dets in [
            vec![det("fire", 0.9)],
            vec![det("smoke", 0.99), det("FIRE", 0.2)],
            vec![det("person", 0.8), det("smoke", 0.5), det("wildfire", 0.41)],
        ] {
            for policy in [StatusPolicy::SourceOrder, StatusPolicy::HighestConfidence] {
                let report = derive_status(&dets, policy);
                assert_eq!(report.status, SafetyStatus::Danger);
                assert_eq!(report.message, FIRE_ALERT_MESSAGE);
            }
        }
    }

    #[test]
    fn smoke_without_fire_is_warning() {
        let report = derive_status(&[det("smoke_light", 0.5)], StatusPolicy::SourceOrder);
        assert_eq!(report.status, SafetyStatus::Warning);
        assert_eq!(report.message, SMOKE_ALERT_MESSAGE);
    }

    #[test]
    fn unrelated_labels_are_safe() {
        let report = derive_status(&[det("person", 0.9)], StatusPolicy::SourceOrder);
        assert_eq!(report.status, SafetyStatus::Safe);
    }

    #[test]
    fn source_order_stops_at_first_fire() {
        let dets = vec![det("smoke", 0.9), det("fire", 0.5), det("fire", 0.95)];
        let report = derive_status(&dets, StatusPolicy::SourceOrder);
        assert_eq!(report.trigger, Some(1));
    }

    #[test]
    fn source_order_reports_last_smoke_match() {
        let dets = vec![det("smoke", 0.9), det("person", 0.7), det("smoke", 0.45)];
        let report = derive_status(&dets, StatusPolicy::SourceOrder);
        assert_eq!(report.status, SafetyStatus::Warning);
        assert_eq!(report.trigger, Some(2));
    }

    #[test]
    fn highest_confidence_picks_strongest_match() {
        let dets = vec![det("smoke", 0.9), det("person", 0.7), det("smoke", 0.45)];
        let report = derive_status(&dets, StatusPolicy::HighestConfidence);
        assert_eq!(report.trigger, Some(0));

        let dets = vec![det("fire", 0.5), det("fire", 0.95)];
        let report = derive_status(&dets, StatusPolicy::HighestConfidence);
        assert_eq!(report.trigger, Some(1));
    }

    #[test]
    fn wire_form_round_trips() -> Result<()> {
        for status in [SafetyStatus::Safe, SafetyStatus::Warning, SafetyStatus::Danger] {
            assert_eq!(status.as_str().parse::<SafetyStatus>()?, status);
        }
        assert!("danger".parse::<SafetyStatus>().is_err());
        Ok(())
    }

    #[test]
    fn policy_parses_both_spellings() -> Result<()> {
        assert_eq!(
            "highest-confidence".parse::<StatusPolicy>()?,
            StatusPolicy::HighestConfidence
        );
        assert_eq!("SOURCE_ORDER".parse::<StatusPolicy>()?, StatusPolicy::SourceOrder);
        assert!("loudest".parse::<StatusPolicy>().is_err());
        Ok(())
    }
}
