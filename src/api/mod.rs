//! HTTP surface over std TCP.
//!
//! - `GET /health`: liveness check.
//! - `POST /predict`: frame upload (multipart `file` part, or a raw image body),
//!   optional `x`, `y`, `displayWidth`, `displayHeight` as form parts or query
//!   parameters. Without a point every detection is returned.
//!
//! Each accepted connection is served on its own thread, up to
//! `max_connections` at once; beyond that the server answers 503. The pipeline
//! is shared read-only; the detector backend serialises inference behind its
//! mutex. Every response carries CORS headers for the configured origin and
//! `OPTIONS` on either route is answered with 204.
//! `disposalInfoHTML` is passed through verbatim; the client renders it as
//! markup.

mod multipart;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::config::ServiceConfig;
use crate::error::{Error, FailureKind};
use crate::frame::Frame;
use crate::geometry::{DisplayGeometry, Point};
use crate::pipeline::{DetectionPipeline, PointQuery, PredictResponse};

const MAX_HEADER_BYTES: usize = 16 * 1024;
const SERVICE_NAME: &str = "wastelens";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    pub read_timeout: Duration,
    pub max_connections: usize,
    pub cors_origin: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let service = ServiceConfig::default();
        Self::from_service(&service)
    }
}

impl ApiConfig {
    pub fn from_service(cfg: &ServiceConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            max_body_bytes: cfg.max_body_bytes,
            read_timeout: Duration::from_secs(cfg.read_timeout_secs),
            max_connections: cfg.max_connections,
            cors_origin: cfg.cors_origin.clone(),
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

#[derive(Clone)]
pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<DetectionPipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: DetectionPipeline) -> Self {
        Self {
            cfg,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, self.cfg, self.pipeline, shutdown_thread) {
                log::error!("api stopped: {}", err);
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
    pipeline: Arc<DetectionPipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    let active = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let slot = match ConnectionSlot::acquire(&active, cfg.max_connections) {
                    Some(slot) => slot,
                    None => {
                        log::warn!(
                            "rejecting {}: {} connections already in flight",
                            peer,
                            cfg.max_connections
                        );
                        if let Err(err) = reject_busy(stream, &cfg) {
                            log::debug!("busy response to {} failed: {}", peer, err);
                        }
                        continue;
                    }
                };
                let cfg = cfg.clone();
                let pipeline = pipeline.clone();
                std::thread::spawn(move || {
                    let _slot = slot;
                    if let Err(err) = handle_connection(stream, &pipeline, &cfg) {
                        log::warn!("request from {} failed: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// One in-flight connection; released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        if active.fetch_add(1, Ordering::SeqCst) >= max {
            active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answer 503 on the accept thread. The request is read once, briefly, so the
/// close does not reset the peer before it sees the response.
fn reject_busy(mut stream: TcpStream, cfg: &ApiConfig) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(200)))?;
    let mut buf = [0u8; 8192];
    let _ = stream.read(&mut buf);
    write_error(
        &mut stream,
        &cfg.cors_origin,
        503,
        "busy",
        "too many concurrent requests",
    )?;
    stream.shutdown(std::net::Shutdown::Write)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("{0}")]
    Malformed(String),
    #[error("request body of {0} bytes exceeds limit of {1}")]
    TooLarge(usize, usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn handle_connection(
    mut stream: TcpStream,
    pipeline: &DetectionPipeline,
    cfg: &ApiConfig,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(cfg.read_timeout))?;

    let origin = cfg.cors_origin.as_str();
    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::Malformed(msg)) => {
            return write_error(&mut stream, origin, 400, "bad_request", &msg);
        }
        Err(err @ RequestError::TooLarge(..)) => {
            return write_error(&mut stream, origin, 413, "payload_too_large", &err.to_string());
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", "/health") | ("OPTIONS", "/predict") => {
            write_response(&mut stream, origin, 204, "text/plain", b"")
        }
        ("GET", "/health") => {
            let body = serde_json::json!({
                "status": "healthy",
                "service": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            });
            let body = serde_json::to_vec(&body)?;
            write_response(&mut stream, origin, 200, "application/json", &body)
        }
        ("POST", "/predict") => {
            let (status, body) = predict(pipeline, &request);
            write_response(&mut stream, origin, status, "application/json", &body)
        }
        (_, "/health") | (_, "/predict") => {
            write_error(&mut stream, origin, 405, "method_not_allowed", "method not allowed")
        }
        _ => write_error(&mut stream, origin, 404, "not_found", "not found"),
    }
}

fn predict(pipeline: &DetectionPipeline, request: &HttpRequest) -> (u16, Vec<u8>) {
    let form = match PredictForm::from_request(request) {
        Ok(form) => form,
        Err(err) => return error_body(400, "bad_request", &format!("{:#}", err)),
    };

    let result = Frame::decode(&form.image)
        .map_err(Error::from)
        .and_then(|frame| run_query(pipeline, &frame, &form));

    match result {
        Ok(response) => {
            log::info!(
                "predict: {} result(s){}",
                response.count,
                response.reason.map(|r| format!(" ({})", r)).unwrap_or_default()
            );
            match serde_json::to_vec(&response) {
                Ok(body) => (200, body),
                Err(err) => error_body(500, "internal", &err.to_string()),
            }
        }
        Err(err) => {
            let status = status_for(&err);
            if status >= 500 {
                log::error!("predict failed: {}", err);
            } else {
                log::warn!("predict rejected: {}", err);
            }
            error_body(status, err.code(), &err.to_string())
        }
    }
}

fn run_query(
    pipeline: &DetectionPipeline,
    frame: &Frame,
    form: &PredictForm,
) -> crate::error::Result<PredictResponse> {
    let point = match form.point {
        Some(point) => point,
        None => {
            let detections = pipeline.detect_all(frame)?;
            return Ok(PredictResponse::whole_image(&detections));
        }
    };
    let query = match form.display_size()? {
        Some((display_width, display_height)) => PointQuery::display(
            point,
            DisplayGeometry::new(
                display_width,
                display_height,
                f64::from(frame.width()),
                f64::from(frame.height()),
            ),
        ),
        None => PointQuery::native(point),
    };
    pipeline.query_point(frame, query)?.to_response()
}

fn status_for(err: &Error) -> u16 {
    match err {
        Error::Detection(failure) => match failure.kind {
            FailureKind::InvalidImage => 422,
            FailureKind::Model => 500,
        },
        Error::InvalidGeometry(_) => 400,
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    message: &'a str,
}

fn error_body(status: u16, error: &str, message: &str) -> (u16, Vec<u8>) {
    let body = ErrorBody {
        success: false,
        error,
        message,
    };
    let bytes = serde_json::to_vec(&body)
        .unwrap_or_else(|_| br#"{"success":false,"error":"internal"}"#.to_vec());
    (status, bytes)
}

fn write_error(
    stream: &mut TcpStream,
    origin: &str,
    status: u16,
    error: &str,
    message: &str,
) -> Result<()> {
    let (status, body) = error_body(status, error, message);
    write_response(stream, origin, status, "application/json", &body)
}

/// Fields of one `/predict` call, from multipart parts or query parameters.
#[derive(Debug)]
struct PredictForm {
    image: Vec<u8>,
    point: Option<Point>,
    display_width: Option<f64>,
    display_height: Option<f64>,
}

impl PredictForm {
    fn from_request(request: &HttpRequest) -> Result<Self> {
        let mut fields: HashMap<String, String> = request.query.clone();
        let content_type = request.header("content-type").unwrap_or("");

        let image = match multipart::boundary(content_type) {
            Some(boundary) => {
                let mut image = None;
                for part in multipart::parse(&request.body, &boundary)? {
                    if part.name == "file" {
                        log::debug!(
                            "upload {} ({}, {} bytes)",
                            part.filename.as_deref().unwrap_or("<unnamed>"),
                            part.content_type.as_deref().unwrap_or("no content type"),
                            part.data.len()
                        );
                        image = Some(part.data);
                    } else {
                        let value = String::from_utf8(part.data)
                            .map_err(|_| anyhow!("form field '{}' is not UTF-8", part.name))?;
                        fields.insert(part.name, value);
                    }
                }
                image.ok_or_else(|| anyhow!("no file provided"))?
            }
            None if content_type.starts_with("multipart/") => {
                return Err(anyhow!("multipart request without a boundary"));
            }
            None => request.body.clone(),
        };
        if image.is_empty() {
            return Err(anyhow!("no file provided"));
        }

        let x = number_field(&fields, "x")?;
        let y = number_field(&fields, "y")?;
        let point = match (x, y) {
            (Some(x), Some(y)) => Some(Point::new(x, y)),
            (None, None) => None,
            _ => return Err(anyhow!("x and y must be given together")),
        };
        let display_width = number_field(&fields, "displayWidth")?;
        let display_height = number_field(&fields, "displayHeight")?;
        if point.is_none() && (display_width.is_some() || display_height.is_some()) {
            return Err(anyhow!("displayWidth and displayHeight need a point (x and y)"));
        }
        Ok(Self {
            image,
            point,
            display_width,
            display_height,
        })
    }

    fn display_size(&self) -> crate::error::Result<Option<(f64, f64)>> {
        match (self.display_width, self.display_height) {
            (Some(w), Some(h)) => Ok(Some((w, h))),
            (None, None) => Ok(None),
            _ => Err(Error::InvalidGeometry(
                "displayWidth and displayHeight must be given together".to_string(),
            )),
        }
    }
}

fn number_field(fields: &HashMap<String, String>, key: &str) -> Result<Option<f64>> {
    match fields.get(key).map(|value| value.trim()) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| anyhow!("field '{}' must be a number, got '{}'", key, value)),
    }
}

fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> Result<HttpRequest, RequestError> {
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed before headers".into()));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(idx) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break idx;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("request headers too large".into()));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".into()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".into()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid content-length".into()))?,
        None if headers.contains_key("transfer-encoding") => {
            return Err(RequestError::Malformed(
                "chunked bodies are not supported; send content-length".into(),
            ));
        }
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(RequestError::TooLarge(content_length, max_body_bytes));
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let expects_continue = headers
            .get("expect")
            .map_or(false, |value| value.eq_ignore_ascii_case("100-continue"));
        if expects_continue && body.is_empty() {
            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            stream.flush()?;
        }
        let already = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[already..])?;
    }

    let (path, query_string) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    let query = url::form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect();

    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        headers,
        query,
        body,
    })
}

fn write_response(
    stream: &mut TcpStream,
    origin: &str,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let vary = if origin == "*" { "" } else { "Vary: Origin\r\n" };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: {origin}\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\n{vary}Connection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len(),
        origin = origin,
        vary = vary
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
