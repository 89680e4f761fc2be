use anyhow::Result;
use image::{Rgb, RgbImage};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pyrovision::api::{
    ApiConfig, ApiHandle, ApiServer, FormBuilder, FILE_FIELD, MESSAGE_HEADER, STATUS_HEADER,
};
use pyrovision::client::{ClientError, FrameInference, InferenceClient};
use pyrovision::detect::{BoundingBox, Detection, Detector, StubDetector};
use pyrovision::service::{Endpoint, InferenceService};
use pyrovision::status::{SafetyStatus, ALL_CLEAR_MESSAGE, FIRE_ALERT_MESSAGE, SMOKE_ALERT_MESSAGE};

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(detector: impl Detector + 'static) -> Result<Self> {
        Self::with_config(detector, ApiConfig::default())
    }

    fn with_config(detector: impl Detector + 'static, config: ApiConfig) -> Result<Self> {
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..config
        };
        let service = InferenceService::new(Arc::new(detector));
        let api_handle = ApiServer::new(api_config, service).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn url(&self) -> String {
        format!("http://{}", self.handle().addr)
    }

    fn client(&self, endpoint: Endpoint) -> Result<InferenceClient> {
        InferenceClient::new(&self.url(), endpoint, Duration::from_secs(5))
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle.as_ref().expect("api handle")
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

fn frame_jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([40, 90, 60]));
    pyrovision::annotate::encode_jpeg(&image, 90).expect("encode test frame")
}

fn stub_with(label: &str, confidence: f32) -> StubDetector {
    StubDetector::new(vec![Detection::new(
        label,
        confidence,
        BoundingBox::new(10.0, 10.0, 60.0, 50.0),
    )])
}

fn raw_request(addr: std::net::SocketAddr, request: &[u8]) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(request)?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let response = String::from_utf8_lossy(&response).to_string();
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn post_form(url: &str, content_type: &str, body: &[u8]) -> std::result::Result<ureq::Response, ureq::Error> {
    ureq::post(url)
        .set("Content-Type", content_type)
        .send_bytes(body)
}

fn error_kind(err: ureq::Error) -> (u16, String) {
    match err {
        ureq::Error::Status(code, response) => {
            let raw = response.into_string().expect("error body");
            let body: Value = serde_json::from_str(&raw).expect("json error body");
            (code, body["error"].as_str().unwrap_or_default().to_string())
        }
        other => panic!("expected HTTP status error, got {}", other),
    }
}

#[test]
fn fire_detection_reports_danger() -> Result<()> {
    let api = TestApi::new(stub_with("fire", 0.9))?;
    let client = api.client(Endpoint::Detect)?;

    let result = client.submit(&frame_jpeg(128, 96), None)?;
    assert_eq!(result.status, SafetyStatus::Danger);
    assert_eq!(result.message, FIRE_ALERT_MESSAGE);
    assert_eq!((result.width, result.height), (128, 96));
    assert!(image::load_from_memory(&result.annotated_image).is_ok());
    Ok(())
}

#[test]
fn smoke_variant_label_reports_warning() -> Result<()> {
    let api = TestApi::new(stub_with("smoke_light", 0.5))?;
    let client = api.client(Endpoint::DetectStream)?;

    let result = client.submit(&frame_jpeg(64, 64), None)?;
    assert_eq!(result.status, SafetyStatus::Warning);
    assert_eq!(result.message, SMOKE_ALERT_MESSAGE);
    Ok(())
}

#[test]
fn empty_frame_is_safe_and_keeps_dimensions() -> Result<()> {
    let api = TestApi::new(StubDetector::empty())?;
    let client = api.client(Endpoint::Detect)?;

    let result = client.submit(&frame_jpeg(320, 240), None)?;
    assert_eq!(result.status, SafetyStatus::Safe);
    assert_eq!(result.message, ALL_CLEAR_MESSAGE);
    assert_eq!((result.width, result.height), (320, 240));
    Ok(())
}

#[test]
fn undecodable_upload_is_rejected() -> Result<()> {
    let api = TestApi::new(stub_with("fire", 0.9))?;
    let client = api.client(Endpoint::Detect)?;

    match client.submit(b"definitely not an image", None) {
        Err(ClientError::Status { code, body }) => {
            assert_eq!(code, 400);
            assert!(body.contains("decode_error"), "unexpected body: {}", body);
        }
        other => panic!("expected 400, got {:?}", other.map(|r| r.status)),
    }
    Ok(())
}

#[test]
fn status_headers_are_on_the_wire() -> Result<()> {
    let api = TestApi::new(stub_with("fire", 0.9))?;
    let (content_type, body) = FormBuilder::new()
        .file(FILE_FIELD, "frame.jpg", "image/jpeg", &frame_jpeg(32, 32))
        .finish();

    let response = post_form(&format!("{}/detect", api.url()), &content_type, &body)?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_type(), "image/jpeg");
    assert_eq!(response.header(STATUS_HEADER), Some("DANGER"));
    assert_eq!(response.header(MESSAGE_HEADER), Some(FIRE_ALERT_MESSAGE));
    Ok(())
}

#[test]
fn forwarded_confidence_overrides_server_default() -> Result<()> {
    let api = TestApi::new(stub_with("fire", 0.5))?;
    let client = api.client(Endpoint::DetectStream)?;
    let frame = frame_jpeg(48, 48);

    assert_eq!(client.submit(&frame, None)?.status, SafetyStatus::Danger);
    assert_eq!(client.submit(&frame, Some(0.8))?.status, SafetyStatus::Safe);
    assert_eq!(client.submit(&frame, Some(0.2))?.status, SafetyStatus::Danger);
    Ok(())
}

#[test]
fn out_of_range_confidence_field_is_rejected() -> Result<()> {
    let api = TestApi::new(StubDetector::empty())?;
    let (content_type, body) = FormBuilder::new()
        .text("confidence", "1.5")
        .file(FILE_FIELD, "frame.jpg", "image/jpeg", &frame_jpeg(16, 16))
        .finish();

    let err = post_form(&format!("{}/detect", api.url()), &content_type, &body)
        .expect_err("should be rejected");
    assert_eq!(error_kind(err), (400, "bad_request".to_string()));
    Ok(())
}

#[test]
fn missing_file_field_is_rejected() -> Result<()> {
    let api = TestApi::new(StubDetector::empty())?;
    let (content_type, body) = FormBuilder::new()
        .text("note", "no image here")
        .finish();

    let err = post_form(&format!("{}/detect_stream", api.url()), &content_type, &body)
        .expect_err("should be rejected");
    assert_eq!(error_kind(err), (400, "bad_request".to_string()));
    Ok(())
}

#[test]
fn detector_failure_is_a_server_error() -> Result<()> {
    let api = TestApi::new(StubDetector::failing("model exploded"))?;
    let client = api.client(Endpoint::Detect)?;

    match client.submit(&frame_jpeg(16, 16), None) {
        Err(ClientError::Status { code, body }) => {
            assert_eq!(code, 500);
            assert!(body.contains("detector_error"));
        }
        other => panic!("expected 500, got {:?}", other.map(|r| r.status)),
    }
    Ok(())
}

#[test]
fn root_reports_ready() -> Result<()> {
    let api = TestApi::new(StubDetector::empty())?;
    let client = api.client(Endpoint::Detect)?;
    assert_eq!(client.health()?, "AI System Ready");

    let (headers, _) = raw_request(
        api.handle().addr,
        b"DELETE / HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    Ok(())
}

#[test]
fn unknown_paths_and_wrong_methods() -> Result<()> {
    let api = TestApi::new(StubDetector::empty())?;
    let addr = api.handle().addr;

    let (headers, body) = raw_request(addr, b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let body: Value = serde_json::from_str(&body)?;
    assert_eq!(body["error"], "not_found");

    let (headers, _) = raw_request(addr, b"GET /detect HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    Ok(())
}

#[test]
fn oversized_body_is_refused_before_reading() -> Result<()> {
    let config = ApiConfig {
        max_body_bytes: 1024,
        ..ApiConfig::default()
    };
    let api = TestApi::with_config(StubDetector::empty(), config)?;

    let (headers, _) = raw_request(
        api.handle().addr,
        b"POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary=x\r\nContent-Length: 4096\r\n\r\n",
    )?;
    assert!(headers.starts_with("HTTP/1.1 413"), "got {}", headers);
    assert!(headers.contains("Connection: close"));
    Ok(())
}

#[test]
fn connections_beyond_worker_cap_wait_for_a_free_slot() -> Result<()> {
    let config = ApiConfig {
        max_workers: 1,
        read_timeout: Duration::from_millis(400),
        ..ApiConfig::default()
    };
    let api = TestApi::with_config(StubDetector::empty(), config)?;
    let addr = api.handle().addr;

    // Occupies the only worker until its read times out.
    let idle = TcpStream::connect(addr)?;
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let (headers, body) = raw_request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let waited = started.elapsed();
    assert!(headers.starts_with("HTTP/1.1 200"), "got {}", headers);
    assert!(body.contains("AI System Ready"));
    assert!(waited >= Duration::from_millis(250), "served after {:?}", waited);

    // The slot is released once the worker finishes.
    let started = Instant::now();
    let (headers, _) = raw_request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(started.elapsed() < Duration::from_millis(250));
    drop(idle);
    Ok(())
}
