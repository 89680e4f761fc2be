use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::api::{DEFAULT_ADDR, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_WORKERS};
use crate::service::{Endpoint, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::status::StatusPolicy;
use crate::stream::clamp_fps;

const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_SOURCE: &str = "stub://camera";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_JPEG_QUALITY: u8 = 90;

fn default_labels() -> Vec<String> {
    vec!["fire".to_string(), "smoke".to_string()]
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Colour heuristic; runs without a model file.
    #[default]
    Color,
    /// Always reports nothing. Useful for smoke-testing the wire path.
    Stub,
    /// ONNX model through tract (feature `backend-tract`).
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "color" | "colour" => Ok(DetectorKind::Color),
            "stub" => Ok(DetectorKind::Stub),
            "tract" | "onnx" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector '{}'; expected color, stub or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub model_input: u32,
    pub labels: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            kind: DetectorKind::default(),
            model_path: None,
            model_input: DEFAULT_MODEL_INPUT,
            labels: default_labels(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    confidence_threshold: Option<f32>,
    status_policy: Option<StatusPolicy>,
    detector: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    model_input: Option<u32>,
    labels: Option<Vec<String>>,
    max_body_bytes: Option<usize>,
    max_workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub confidence_threshold: f32,
    pub status_policy: StatusPolicy,
    pub detector: DetectorSettings,
    pub max_body_bytes: usize,
    pub max_workers: usize,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("PYRO_SERVER_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => ServerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServerConfigFile) -> Self {
        let detector = DetectorSettings {
            kind: file.detector.unwrap_or_default(),
            model_path: file.model_path,
            model_input: file.model_input.unwrap_or(DEFAULT_MODEL_INPUT),
            labels: file.labels.unwrap_or_else(default_labels),
        };
        Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            status_policy: file.status_policy.unwrap_or_default(),
            detector,
            max_body_bytes: file.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            max_workers: file.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("PYRO_SERVER_ADDR") {
            self.addr = addr;
        }
        if let Some(conf) = non_empty_env("PYRO_CONFIDENCE") {
            self.confidence_threshold = conf
                .parse()
                .map_err(|_| anyhow!("PYRO_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Some(policy) = non_empty_env("PYRO_STATUS_POLICY") {
            self.status_policy = policy.parse()?;
        }
        if let Some(kind) = non_empty_env("PYRO_DETECTOR") {
            self.detector.kind = kind.parse()?;
        }
        if let Some(path) = non_empty_env("PYRO_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.confidence_threshold)?;
        if self.detector.kind == DetectorKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("detector 'tract' requires model_path"));
        }
        if self.detector.model_input == 0 {
            return Err(anyhow!("model_input must be greater than zero"));
        }
        if self.detector.labels.is_empty() {
            return Err(anyhow!("labels must not be empty"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    server_url: Option<String>,
    endpoint: Option<String>,
    confidence_threshold: Option<f32>,
    target_fps: Option<u32>,
    timeout_ms: Option<u64>,
    source: Option<String>,
    jpeg_quality: Option<u8>,
    forward_threshold: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub endpoint: Endpoint,
    pub confidence_threshold: f32,
    pub target_fps: u32,
    pub timeout: Duration,
    pub source: String,
    pub jpeg_quality: u8,
    /// Send the client threshold as a `confidence` form field.
    pub forward_threshold: bool,
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("PYRO_CLIENT_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => ClientConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Result<Self> {
        let endpoint = match file.endpoint.as_deref() {
            Some(raw) => raw.parse()?,
            None => Endpoint::DetectStream,
        };
        Ok(Self {
            server_url: file
                .server_url
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            endpoint,
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            target_fps: clamp_fps(file.target_fps.unwrap_or(DEFAULT_TARGET_FPS)),
            timeout: Duration::from_millis(file.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            forward_threshold: file.forward_threshold.unwrap_or(false),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("PYRO_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(source) = non_empty_env("PYRO_SOURCE") {
            self.source = source;
        }
        if let Some(fps) = non_empty_env("PYRO_TARGET_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("PYRO_TARGET_FPS must be an integer"))?;
            self.target_fps = clamp_fps(fps);
        }
        Ok(())
    }

    /// Checks shared by file/env loading and CLI overrides.
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.confidence_threshold)?;
        let url = url::Url::parse(&self.server_url)
            .map_err(|e| anyhow!("invalid server_url '{}': {}", self.server_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must use http or https"));
        }
        if self.timeout.is_zero() {
            return Err(anyhow!("timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        Ok(())
    }
}

fn validate_threshold(value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!(
            "confidence threshold {} must be within [0, 1]",
            value
        ));
    }
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Read a JSON or TOML config file, chosen by extension.
fn read_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
