//! HTTP server module
//!
//! A hyper HTTP/1.1 accept loop serving the upload endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/health` | `200 ok` |
//! | `POST` | `server.upload_path` (default `/upload`) | upload outcome, see below |
//!
//! | Outcome | Status |
//! |---------|--------|
//! | every file stored | `201` |
//! | multi-file upload, some files failed | `207` |
//! | unsupported shape, empty upload, bad multipart | `400` |
//! | missing or invalid bearer token | `401` |
//! | single file: collision bound reached | `409` |
//! | file or request too large | `413` |
//! | single file: storage unavailable | `503` |
//! | single file: storage quota exceeded | `507` |
//!
//! # Example
//!
//! ```no_run
//! use media_uploadr::config::Config;
//! use media_uploadr::server::UploadServer;
//! use media_uploadr::storage::build_backend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let backend = build_backend(&config.storage)?;
//! let server = UploadServer::bind(&config, backend).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

mod response;

use crate::auth::{build_authenticator, AuthError, AuthRequest, Authenticator};
use crate::config::{Config, UploadConfig};
use crate::metrics;
use crate::storage::StorageBackend;
use crate::upload::intake::read_multipart;
use crate::upload::{UploadError, Uploader};
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use response::Body;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Instrument};

/// Extra room for multipart framing and text fields on top of the file limits
const REQUEST_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Metric shape label for requests that never got classified
const UNCLASSIFIED: &str = "unclassified";

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Authentication setup failed: {0}")]
    Auth(#[from] AuthError),
}

/// Per-server state shared by every connection
struct AppState {
    uploader: Uploader,
    authenticator: Option<Arc<dyn Authenticator>>,
    upload: UploadConfig,
    upload_path: String,
}

/// Upload HTTP server
pub struct UploadServer {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl UploadServer {
    /// Bind to `config.server.address` and prepare the upload pipeline.
    /// Port 0 lets the OS pick a port; see [`local_addr`](Self::local_addr).
    pub async fn bind(
        config: &Config,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        let state = AppState {
            uploader: Uploader::new(backend, &config.upload),
            authenticator: build_authenticator(&config.auth)?,
            upload: config.upload.clone(),
            upload_path: config.server.upload_path.clone(),
        };

        info!(address = %local_addr, upload_path = %state.upload_path, "Server bound");

        Ok(Self {
            state: Arc::new(state),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the future is dropped. Each connection is
    /// served on its own task; connection errors are logged and skipped.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "Starting upload server");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(route(req, state).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(peer = %peer_addr, error = %e, "Error serving connection");
                }
            });
        }
    }
}

async fn route(req: Request<Incoming>, state: Arc<AppState>) -> Response<Body> {
    let span = tracing::info_span!(
        "http.request",
        http.method = %req.method(),
        http.target = %req.uri().path(),
        http.status_code = tracing::field::Empty
    );

    async move {
        let start = Instant::now();
        let path = req.uri().path().to_string();

        let response = if path == "/health" && req.method() == Method::GET {
            response::text(StatusCode::OK, "ok")
        } else if path == state.upload_path {
            if req.method() == Method::POST {
                handle_upload(req, &state).await
            } else {
                let mut response =
                    response::error(StatusCode::METHOD_NOT_ALLOWED, "Use POST to upload");
                response
                    .headers_mut()
                    .insert(ALLOW, HeaderValue::from_static("POST"));
                response
            }
        } else {
            response::error(StatusCode::NOT_FOUND, format!("Cannot {} {}", req.method(), path))
        };

        let status = response.status().as_u16();
        tracing::Span::current().record("http.status_code", status);
        info!(
            status = status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await
}

async fn handle_upload(req: Request<Incoming>, state: &AppState) -> Response<Body> {
    let actor = match &state.authenticator {
        Some(authenticator) => {
            match authenticator
                .authenticate(&AuthRequest::from_headers(req.headers()))
                .await
            {
                Ok(identity) => Some(identity.subject),
                Err(e) => return unauthorized(&e),
            }
        }
        None => None,
    };

    let boundary = match req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(multer::parse_boundary)
    {
        Some(Ok(boundary)) => boundary,
        _ => {
            return upload_error(
                UNCLASSIFIED,
                &UploadError::InvalidMultipart("expected a multipart/form-data body".into()),
            )
        }
    };

    let limit = request_size_limit(&state.upload);
    let declared_length = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared_length.is_some_and(|length| length > limit) {
        return upload_error(
            UNCLASSIFIED,
            &UploadError::PayloadTooLarge(format!("request body exceeds {} bytes", limit)),
        );
    }

    let stream = req.into_body().into_data_stream();
    let mut request = match read_multipart(stream, &boundary, &state.upload).await {
        Ok(request) => request,
        Err(e) => {
            metrics::record_request_rejected(crate::upload::orchestrator::error_label(&e));
            return upload_error(UNCLASSIFIED, &e);
        }
    };
    request.actor = actor;

    match state.uploader.handle(request).await {
        Ok(outcome) => {
            let status = outcome.status_code();
            metrics::record_request(outcome.shape_label(), status);
            if !outcome.is_complete() {
                warn!(
                    failed = outcome.errors().len(),
                    "Upload partially failed"
                );
            }
            response::json(
                StatusCode::from_u16(status).unwrap_or(StatusCode::CREATED),
                &outcome.to_json(),
            )
        }
        // Anything but a 400 comes from the one file of a single upload
        Err(e) if e.status_code() == 400 => upload_error(UNCLASSIFIED, &e),
        Err(e) => upload_error("single", &e),
    }
}

/// Largest body accepted before reading it
fn request_size_limit(config: &UploadConfig) -> u64 {
    config
        .max_file_size
        .saturating_mul(config.max_files as u64)
        .saturating_add(REQUEST_OVERHEAD_BYTES)
}

fn upload_error(shape: &str, err: &UploadError) -> Response<Body> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    metrics::record_request(shape, status.as_u16());

    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "Upload failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "Upload rejected");
    }

    response::error(status, err.client_message())
}

fn unauthorized(err: &AuthError) -> Response<Body> {
    let challenge = match err {
        AuthError::MissingAuth => "Bearer",
        AuthError::TokenExpired => {
            "Bearer error=\"invalid_token\", error_description=\"Token expired\""
        }
        _ => "Bearer error=\"invalid_token\"",
    };

    let mut response = response::error(StatusCode::UNAUTHORIZED, err.to_string());
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    response
}
