//! In-process HTTP/1.1 server that serves one resource with HEAD and ranged GET,
//! with per-offset fault injection and request counters.

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE, USER_AGENT};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Misbehaviour for the range starting at a given offset.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Answer with this status and an empty body.
    Status(StatusCode),
    /// Answer 206 but with one byte less than requested.
    ShortBody,
    /// Ignore the Range header and send the whole resource with 200.
    IgnoreRange,
    /// Serve the range correctly after sleeping.
    Delay(Duration),
    /// Sleep, then answer with this status.
    DelayThenStatus(Duration, StatusCode),
    /// Send the right number of bytes but label them as the next range.
    ShiftedRange,
}

struct State {
    body: Bytes,
    head_status: StatusCode,
    advertised_size: Option<u64>,
    user_agent: Mutex<Option<String>>,
    faults: HashMap<u64, Fault>,
    heads: AtomicUsize,
    gets: AtomicUsize,
}

pub struct RangeServerBuilder {
    body: Bytes,
    head_status: StatusCode,
    advertised_size: Option<u64>,
    faults: HashMap<u64, Fault>,
}

impl RangeServerBuilder {
    pub fn fault(mut self, offset: u64, fault: Fault) -> Self {
        self.faults.insert(offset, fault);
        self
    }

    pub fn head_status(mut self, status: StatusCode) -> Self {
        self.head_status = status;
        self
    }

    /// Size reported by HEAD, when it should differ from the served body.
    pub fn advertised_size(mut self, size: u64) -> Self {
        self.advertised_size = Some(size);
        self
    }

    pub async fn start(self) -> RangeServer {
        let state = Arc::new(State {
            body: self.body,
            head_status: self.head_status,
            advertised_size: self.advertised_size,
            user_agent: Mutex::new(None),
            faults: self.faults,
            heads: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(Arc::clone(&state), req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        RangeServer { addr, state, task }
    }
}

pub struct RangeServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl RangeServer {
    pub fn builder(body: impl Into<Bytes>) -> RangeServerBuilder {
        RangeServerBuilder {
            body: body.into(),
            head_status: StatusCode::OK,
            advertised_size: None,
            faults: HashMap::new(),
        }
    }

    pub async fn serving(body: impl Into<Bytes>) -> Self {
        Self::builder(body).start().await
    }

    pub fn url(&self) -> String {
        format!("http://{}/resource.bin", self.addr)
    }

    pub fn heads(&self) -> usize {
        self.state.heads.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }

    /// User-Agent of the most recent request.
    pub fn user_agent(&self) -> Option<String> {
        self.state.user_agent.lock().unwrap().clone()
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

/// A URL nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/resource.bin", addr)
}

fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body))
        .unwrap()
}

fn parse_range(req: &Request<Incoming>) -> Option<(u64, u64)> {
    let value = req.headers().get(RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn handle(
    state: Arc<State>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let total = state.body.len() as u64;
    *state.user_agent.lock().unwrap() = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if req.method() == Method::HEAD {
        state.heads.fetch_add(1, Ordering::SeqCst);
        let mut builder = Response::builder().status(state.head_status);
        if state.head_status.is_success() {
            builder = builder.header(CONTENT_LENGTH, state.advertised_size.unwrap_or(total));
        }
        return Ok(builder.body(Full::new(Bytes::new())).unwrap());
    }

    state.gets.fetch_add(1, Ordering::SeqCst);
    let Some((start, end)) = parse_range(&req) else {
        return Ok(respond(StatusCode::OK, state.body.clone()));
    };
    if start > end || end >= total {
        return Ok(respond(StatusCode::RANGE_NOT_SATISFIABLE, Bytes::new()));
    }

    match state.faults.get(&start).copied() {
        Some(Fault::Status(status)) => return Ok(respond(status, Bytes::new())),
        Some(Fault::IgnoreRange) => return Ok(respond(StatusCode::OK, state.body.clone())),
        Some(Fault::ShortBody) => {
            let body = state.body.slice(start as usize..end as usize);
            return Ok(respond(StatusCode::PARTIAL_CONTENT, body));
        }
        Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
        Some(Fault::DelayThenStatus(delay, status)) => {
            tokio::time::sleep(delay).await;
            return Ok(respond(status, Bytes::new()));
        }
        Some(Fault::ShiftedRange) => {
            let body = state.body.slice(start as usize..=end as usize);
            return Ok(Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start + 1, end + 1, total),
                )
                .body(Full::new(body))
                .unwrap());
        }
        None => {}
    }

    let body = state.body.slice(start as usize..=end as usize);
    Ok(Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, total))
        .body(Full::new(body))
        .unwrap())
}

/// What a [`RawServer`] gets wrong on purpose.
#[derive(Debug, Clone, Copy)]
pub enum RawBehavior {
    /// HEAD answers 200 without any Content-Length.
    NoLength,
    /// Ranged GETs declare the full range length, send `sent` bytes of it and
    /// close the connection.
    Truncate { sent: usize },
}

/// Minimal HTTP/1.1 server speaking directly over TCP, for responses a
/// well-behaved server library refuses to produce.
pub struct RawServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RawServer {
    pub async fn start(body: impl Into<Bytes>, behavior: RawBehavior) -> Self {
        let body: Bytes = body.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let _ = serve_raw(stream, body, behavior).await;
                });
            }
        });
        RawServer { addr, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}/resource.bin", self.addr)
    }
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_raw(
    mut stream: TcpStream,
    body: Bytes,
    behavior: RawBehavior,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut scratch).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&scratch[..n]);
    }
    let request = String::from_utf8_lossy(&buf).to_string();
    let total = body.len();

    if request.starts_with("HEAD") {
        let head = match behavior {
            RawBehavior::NoLength => "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string(),
            RawBehavior::Truncate { .. } => format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                total
            ),
        };
        stream.write_all(head.as_bytes()).await?;
        return stream.shutdown().await;
    }

    let range = request
        .lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("range: bytes=").map(str::to_string))
        .and_then(|r| {
            let (start, end) = r.trim().split_once('-')?;
            Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?))
        });
    let Some((start, end)) = range else {
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
        return stream.shutdown().await;
    };

    let len = end - start + 1;
    let sent = match behavior {
        RawBehavior::Truncate { sent } => sent.min(len),
        RawBehavior::NoLength => len,
    };
    let head = format!(
        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
        len, start, end, total
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body[start..start + sent]).await?;
    stream.shutdown().await
}
