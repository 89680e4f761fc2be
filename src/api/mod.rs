//! HTTP surface of the inference server.
//!
//! Routes:
//! - `GET /` health check, `{"status":"AI System Ready"}`
//! - `POST /detect` and `POST /detect_stream`, multipart upload with a `file`
//!   part; reply is the annotated JPEG with the status in response headers.

mod multipart;
mod request;

pub use multipart::{
    boundary_from_content_type, parse_form, FormBuilder, FormPart, CONFIDENCE_FIELD, FILE_FIELD,
};

use anyhow::{anyhow, Result};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::service::{Endpoint, InferenceService};
use request::{read_request, HttpRequest, RequestError};

pub const STATUS_HEADER: &str = "X-Detection-Status";
pub const MESSAGE_HEADER: &str = "X-Detection-Message";
pub const READY_STATUS: &str = "AI System Ready";

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_WORKERS: usize = 8;

const ACCEPT_POLL: Duration = Duration::from_millis(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    pub read_timeout: Duration,
    /// Connections handled at once; further peers wait in the listen backlog.
    pub max_workers: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            read_timeout: Duration::from_secs(10),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: InferenceService,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: InferenceService) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if !addr.ip().is_loopback() {
            log::warn!(
                "inference api listening on non-loopback address {}; frames are accepted from any peer",
                addr
            );
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, service, shutdown_thread) {
                log::error!("inference api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    service: InferenceService,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let max_workers = cfg.max_workers.max(1);
    let active = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if active.load(Ordering::SeqCst) >= max_workers {
            std::thread::sleep(ACCEPT_POLL);
            continue;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let service = service.clone();
                let slot = WorkerSlot::claim(&active);
                std::thread::spawn(move || {
                    let _slot = slot;
                    if let Err(err) = handle_connection(stream, &cfg, &service) {
                        log::warn!("request from {} failed: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Counts a connection against `max_workers` until dropped.
struct WorkerSlot(Arc<AtomicUsize>);

impl WorkerSlot {
    fn claim(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, service: &InferenceService) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(cfg.read_timeout))?;

    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge(len)) => {
            write_error(&mut stream, 413, "payload_too_large", &format!("{} bytes", len))?;
            return Ok(());
        }
        Err(RequestError::Malformed(detail)) => {
            write_error(&mut stream, 400, "bad_request", &detail)?;
            return Ok(());
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            let body = serde_json::json!({ "status": READY_STATUS });
            write_response(&mut stream, 200, "application/json", &[], body.to_string().as_bytes())
        }
        (_, "/") => write_error(&mut stream, 405, "method_not_allowed", "use GET"),
        (method, path) => match Endpoint::from_path(path) {
            Some(endpoint) if method == "POST" => {
                handle_detect(&mut stream, service, endpoint, &request)
            }
            Some(_) => write_error(&mut stream, 405, "method_not_allowed", "use POST"),
            None => write_error(&mut stream, 404, "not_found", path),
        },
    }
}

fn handle_detect(
    stream: &mut TcpStream,
    service: &InferenceService,
    endpoint: Endpoint,
    request: &HttpRequest,
) -> Result<()> {
    let upload = match extract_upload(request) {
        Ok(upload) => upload,
        Err(err) => return write_error(stream, 400, "bad_request", &format!("{:#}", err)),
    };

    match service.handle(endpoint, &upload.image, upload.threshold) {
        Ok(result) => {
            let message = header_safe(&result.message);
            write_response(
                stream,
                200,
                "image/jpeg",
                &[(STATUS_HEADER, result.status.as_str()), (MESSAGE_HEADER, message.as_str())],
                &result.annotated_image,
            )
        }
        Err(err) => write_error(stream, err.http_status(), err.kind(), &err.to_string()),
    }
}

struct Upload {
    image: Vec<u8>,
    threshold: Option<f32>,
}

fn extract_upload(request: &HttpRequest) -> Result<Upload> {
    let content_type = request
        .header("content-type")
        .ok_or_else(|| anyhow!("missing content-type header"))?;
    let boundary = boundary_from_content_type(content_type)?;
    let parts = parse_form(&request.body, &boundary)?;

    let threshold = match parts.iter().find(|p| p.name == CONFIDENCE_FIELD) {
        Some(part) => {
            let raw = part
                .text()
                .ok_or_else(|| anyhow!("confidence field is not text"))?
                .trim();
            let value: f32 = raw
                .parse()
                .map_err(|_| anyhow!("invalid confidence value '{}'", raw))?;
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("confidence {} outside [0, 1]", value));
            }
            Some(value)
        }
        None => None,
    };

    let image = parts
        .into_iter()
        .find(|p| p.name == FILE_FIELD)
        .map(|p| p.data)
        .ok_or_else(|| anyhow!("missing '{}' form field", FILE_FIELD))?;

    Ok(Upload { image, threshold })
}

/// Header values must not carry line breaks.
fn header_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

fn write_error(stream: &mut TcpStream, status: u16, kind: &str, detail: &str) -> Result<()> {
    let body = serde_json::json!({ "error": kind, "detail": detail });
    write_response(stream, status, "application/json", &[], body.to_string().as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(&format!("{}: {}\r\n", name, value));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
