//! Client side of the frame relay.
//!
//! [`InferenceClient`] posts one encoded frame per call and reads back the
//! annotated JPEG plus the status headers. The stream loop only sees the
//! [`FrameInference`] trait, so tests can swap the network out.

use std::io::Read;
use std::time::{Duration, Instant};

use image::ImageError;
use thiserror::Error;

use crate::api::{FormBuilder, CONFIDENCE_FIELD, FILE_FIELD, MESSAGE_HEADER, STATUS_HEADER};
use crate::service::Endpoint;
use crate::status::SafetyStatus;

/// Annotated frames larger than this are refused.
const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;
/// Error bodies are cut to this many bytes before reporting.
const ERROR_BODY_LIMIT: u64 = 512;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Network(String),
    #[error("server returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("annotated image is not decodable: {0}")]
    Decode(#[source] ImageError),
    #[error("frame encode failed: {0}")]
    Encode(#[source] ImageError),
}

/// What the server said about one frame.
#[derive(Clone, Debug)]
pub struct RemoteResult {
    pub status: SafetyStatus,
    pub message: String,
    /// JPEG bytes as returned by the server.
    pub annotated_image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub round_trip: Duration,
}

/// One-frame-at-a-time remote inference.
pub trait FrameInference {
    /// Submit an encoded frame. `threshold` is sent only when present.
    fn submit(&self, jpeg: &[u8], threshold: Option<f32>) -> Result<RemoteResult, ClientError>;
}

impl<T: FrameInference + ?Sized> FrameInference for &T {
    fn submit(&self, jpeg: &[u8], threshold: Option<f32>) -> Result<RemoteResult, ClientError> {
        (**self).submit(jpeg, threshold)
    }
}

pub struct InferenceClient {
    agent: ureq::Agent,
    base: url::Url,
    url: url::Url,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(server_url: &str, endpoint: Endpoint, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = url::Url::parse(server_url)
            .map_err(|e| anyhow::anyhow!("invalid server url '{}': {}", server_url, e))?;
        // Endpoints live under the base path, e.g. `http://host/pyro/detect`.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base.join(endpoint.path().trim_start_matches('/'))?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base,
            url,
            timeout,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        self.url.as_str()
    }

    /// `GET` the base url and return the reported status string.
    pub fn health(&self) -> Result<String, ClientError> {
        let response = self
            .agent
            .get(self.base.as_str())
            .call()
            .map_err(|err| self.map_error(err))?;
        let body = response
            .into_string()
            .map_err(|err| self.map_io(err))?;
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ClientError::Protocol(format!("health body is not JSON: {}", e)))?;
        value
            .get("status")
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .ok_or_else(|| ClientError::Protocol("health body has no status field".into()))
    }

    fn map_error(&self, err: ureq::Error) -> ClientError {
        match err {
            ureq::Error::Status(code, response) => {
                let mut body = String::new();
                let _ = response
                    .into_reader()
                    .take(ERROR_BODY_LIMIT)
                    .read_to_string(&mut body);
                ClientError::Status { code, body }
            }
            ureq::Error::Transport(transport) => {
                if is_timeout(&transport) {
                    ClientError::Timeout(self.timeout)
                } else {
                    ClientError::Network(transport.to_string())
                }
            }
        }
    }

    fn map_io(&self, err: std::io::Error) -> ClientError {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                ClientError::Timeout(self.timeout)
            }
            _ => ClientError::Network(err.to_string()),
        }
    }
}

impl FrameInference for InferenceClient {
    fn submit(&self, jpeg: &[u8], threshold: Option<f32>) -> Result<RemoteResult, ClientError> {
        let started = Instant::now();
        let mut form = FormBuilder::new();
        if let Some(threshold) = threshold {
            form = form.text(CONFIDENCE_FIELD, &format!("{:.3}", threshold));
        }
        let (content_type, body) = form
            .file(FILE_FIELD, "frame.jpg", "image/jpeg", jpeg)
            .finish();

        let response = self
            .agent
            .post(self.url.as_str())
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(|err| self.map_error(err))?;

        let status = parse_status(response.header(STATUS_HEADER))?;
        let message = response
            .header(MESSAGE_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| status.default_message().to_string());

        let mut annotated_image = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut annotated_image)
            .map_err(|err| self.map_io(err))?;
        let decoded = image::load_from_memory(&annotated_image).map_err(ClientError::Decode)?;

        Ok(RemoteResult {
            status,
            message,
            width: decoded.width(),
            height: decoded.height(),
            annotated_image,
            round_trip: started.elapsed(),
        })
    }
}

/// A missing status header reads as SAFE; anything unrecognised is an error.
fn parse_status(header: Option<&str>) -> Result<SafetyStatus, ClientError> {
    match header {
        None => Ok(SafetyStatus::Safe),
        Some(raw) => raw
            .parse()
            .map_err(|_| ClientError::Protocol(format!("unknown detection status '{}'", raw))),
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> =
        std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    transport.to_string().contains("timed out")
}
