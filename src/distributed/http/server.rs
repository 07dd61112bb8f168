use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, ConfigError, DistributedError};
use crate::shutdown::ShutdownReceiver;

const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
}

impl HttpRequest {
    pub(crate) fn json<T>(&self) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
            .map_err(|err| HttpError::new(400, format!("Invalid JSON: {}", err)))
    }

    pub(crate) fn text(&self) -> Result<String, HttpError> {
        String::from_utf8(self.body.clone())
            .map_err(|err| HttpError::new(400, format!("Invalid request encoding: {}", err)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpError {
    pub(crate) status: u16,
    pub(crate) message: String,
}

impl HttpError {
    pub(crate) fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn not_found() -> Self {
        Self::new(404, "Not found")
    }
}

impl From<AppError> for HttpError {
    fn from(err: AppError) -> Self {
        let status = match &err {
            AppError::Distributed(inner) => distributed_status(inner),
            AppError::Config(inner) if matches!(inner, ConfigError::ReadConfig { .. }) => 500,
            AppError::Config(_)
            | AppError::Validation(_)
            | AppError::Json { .. }
            | AppError::Toml { .. }
            | AppError::Clap { .. } => 400,
            AppError::Reqwest { .. } => 502,
            AppError::Io { .. }
            | AppError::Join { .. }
            | AppError::Metrics(_)
            | AppError::RunMode(_) => 500,
        };
        Self::new(status, err.to_string())
    }
}

impl From<DistributedError> for HttpError {
    fn from(err: DistributedError) -> Self {
        Self::new(distributed_status(&err), err.to_string())
    }
}

fn distributed_status(err: &DistributedError) -> u16 {
    if matches!(
        err,
        DistributedError::NotMaster { .. }
            | DistributedError::ExecutionInProgress
            | DistributedError::NoTask
            | DistributedError::NoActivePhase
    ) {
        409
    } else if matches!(err, DistributedError::NoMaster) {
        503
    } else if matches!(
        err,
        DistributedError::Unreachable { .. }
            | DistributedError::Rejected { .. }
            | DistributedError::NoDriverReachable { .. }
    ) {
        502
    } else if matches!(
        err,
        DistributedError::Deserialize { .. }
            | DistributedError::MissingOption { .. }
            | DistributedError::NoAgents
            | DistributedError::CandidateOutOfRange { .. }
    ) {
        400
    } else {
        500
    }
}

pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) body: Vec<u8>,
}

impl HttpResponse {
    pub(crate) fn json<T>(status: u16, value: &T) -> Result<Self, HttpError>
    where
        T: Serialize,
    {
        let body = serde_json::to_vec(value)
            .map_err(|err| HttpError::new(500, format!("Failed to encode response: {}", err)))?;
        Ok(Self { status, body })
    }

    pub(crate) fn ok<T>(value: &T) -> Result<Self, HttpError>
    where
        T: Serialize,
    {
        Self::json(200, value)
    }
}

/// One handler per node; each accepted connection carries exactly one request.
#[async_trait]
pub(crate) trait RouteHandler: Send + Sync + 'static {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

pub(crate) async fn bind_listener(addr: &str) -> AppResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|err| {
        AppError::distributed(DistributedError::Bind {
            addr: addr.to_owned(),
            source: err,
        })
    })
}

/// Accept connections until shutdown, handling each on its own task.
pub(crate) async fn serve(
    listener: TcpListener,
    handler: Arc<dyn RouteHandler>,
    mut shutdown_rx: ShutdownReceiver,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accept = listener.accept() => {
                let (socket, peer) = match accept {
                    Ok(value) => value,
                    Err(err) => {
                        warn!("Failed to accept connection: {}", err);
                        continue;
                    }
                };
                debug!("Accepted connection from {}", peer);
                let handler = handler.clone();
                tokio::spawn(async move {
                    handle_connection(socket, handler.as_ref()).await;
                });
            }
        }
    }
}

async fn handle_connection(mut socket: TcpStream, handler: &dyn RouteHandler) {
    let request = match read_http_request(&mut socket).await {
        Ok(request) => request,
        Err(err) => {
            if write_error_response(&mut socket, err.status, &err.message)
                .await
                .is_err()
            {
                // Socket closed while writing error response.
            }
            return;
        }
    };

    let outcome = match handler.handle(request).await {
        Ok(response) => write_response(&mut socket, response.status, &response.body).await,
        Err(err) => write_error_response(&mut socket, err.status, &err.message).await,
    };
    if outcome.is_err() {
        // Socket closed while writing response.
    }
}

pub(crate) async fn read_http_request(socket: &mut TcpStream) -> Result<HttpRequest, HttpError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let header_end;

    loop {
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| HttpError::new(400, format!("Failed to read request: {}", err)))?;
        if bytes == 0 {
            return Err(HttpError::new(400, "Empty request"));
        }
        let read_slice = chunk
            .get(..bytes)
            .ok_or_else(|| HttpError::new(400, "Invalid read length"))?;
        buffer.extend_from_slice(read_slice);
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(HttpError::new(413, "Request too large"));
        }
        if let Some(pos) = find_header_end(&buffer) {
            header_end = pos;
            break;
        }
    }

    let header_bytes = buffer
        .get(..header_end)
        .ok_or_else(|| HttpError::new(400, "Malformed request headers"))?;
    let header_text = std::str::from_utf8(header_bytes)
        .map_err(|err| HttpError::new(400, format!("Invalid request encoding: {}", err)))?;
    let mut lines = header_text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing request line"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing HTTP method"))?;
    let target = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing request path"))?;
    let path = target.split('?').next().unwrap_or(target);

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(HttpError::new(400, "Malformed header"));
        };
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(HttpError::new(413, "Request body too large"));
    }
    let body_start = header_end
        .checked_add(4)
        .ok_or_else(|| HttpError::new(400, "Malformed request headers"))?;
    let mut body = buffer.get(body_start..).unwrap_or_default().to_vec();
    while body.len() < content_length {
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| HttpError::new(400, format!("Failed to read body: {}", err)))?;
        if bytes == 0 {
            break;
        }
        let read_slice = chunk
            .get(..bytes)
            .ok_or_else(|| HttpError::new(400, "Invalid read length"))?;
        body.extend_from_slice(read_slice);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method: method.to_owned(),
        path: path.to_owned(),
        headers,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

const fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

async fn write_error_response(socket: &mut TcpStream, status: u16, message: &str) -> AppResult<()> {
    #[derive(Serialize)]
    struct ErrorResponse<'msg> {
        error: &'msg str,
    }
    let body = serde_json::to_vec(&ErrorResponse { error: message }).map_err(|err| {
        AppError::distributed(DistributedError::Serialize {
            context: "error response",
            source: err,
        })
    })?;
    write_response(socket, status, &body).await
}

async fn write_response(socket: &mut TcpStream, status: u16, body: &[u8]) -> AppResult<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len()
    );
    socket.write_all(response.as_bytes()).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "write response",
            source: err,
        })
    })?;
    socket.write_all(body).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "write response body",
            source: err,
        })
    })?;
    Ok(())
}
