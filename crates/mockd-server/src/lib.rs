//! mockd server wiring: mock loading, request dispatch, and the accept
//! loops for the mock listener and the recording proxy.

pub mod router;

use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Either, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use mockd_core::http::HttpResponse;
use mockd_core::Mock;
use mockd_proxy::MitmProxy;
use mockd_stream::handler::{StreamBody, StreamHandler};
use router::Router;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state: the routing table plus the streaming engine.
pub struct AppState {
    pub router: Router,
    pub handler: StreamHandler,
}

/// Load a mock file (YAML or JSON list of envelopes) and validate every
/// entry.
pub fn load_mocks(path: &Path) -> anyhow::Result<Vec<Mock>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    // YAML is a superset of JSON, so one decoder covers both formats.
    let mocks: Vec<Mock> = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    for mock in &mocks {
        mock.validate()
            .with_context(|| format!("invalid mock {:?}", mock.id))?;
    }
    info!(count = mocks.len(), file = %path.display(), "loaded mocks");
    Ok(mocks)
}

/// Dispatch one request against the routing table.
pub async fn handle_request<B>(
    state: Arc<AppState>,
    req: Request<B>,
    client_addr: String,
) -> Response<StreamBody>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            return json_error(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };
    let body_str = String::from_utf8_lossy(&body_bytes).into_owned();

    let matched = state.router.match_request(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query(),
        &parts.headers,
        &body_str,
    );
    let Some(mock) = matched else {
        return json_error(StatusCode::NOT_FOUND, "no mock matched the request");
    };
    let Some(spec) = mock.http.as_ref() else {
        return json_error(StatusCode::NOT_FOUND, "no mock matched the request");
    };

    // Exactly one of the three payloads survives validation.
    if let Some(sse) = spec.sse.clone() {
        let head = Request::from_parts(parts, ());
        return state.handler.handle_sse(&mock.id, sse, &head, &client_addr);
    }
    if let Some(chunked) = spec.chunked.clone() {
        let head = Request::from_parts(parts, ());
        return state.handler.handle_chunked(chunked, &head);
    }
    match spec.response.as_ref() {
        Some(response) => plain_response(response).await,
        None => json_error(StatusCode::NOT_FOUND, "no mock matched the request"),
    }
}

async fn plain_response(response: &HttpResponse) -> Response<StreamBody> {
    if response.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(response.delay_ms as u64)).await;
    }

    let body = if let Some(ref body) = response.body {
        Bytes::from(body.clone())
    } else if let Some(ref path) = response.body_file {
        match tokio::fs::read(path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                error!(path = %path, error = %err, "failed to read body file");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to read body file",
                );
            }
        }
    } else {
        Bytes::new()
    };

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK));
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Either::Left(Full::new(body)))
        .unwrap_or_else(|_| json_error(StatusCode::INTERNAL_SERVER_ERROR, "invalid response"))
}

fn json_error(status: StatusCode, message: &str) -> Response<StreamBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Either::Left(Full::new(Bytes::from(body))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Accept loop for mock traffic; one task per connection.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, state).await
}

/// Accept loop over an already-bound listener (lets tests pick ephemeral
/// ports).
pub async fn serve_with_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "mock server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                let peer = peer.to_string();
                async move { Ok::<_, Infallible>(handle_request(state, req, peer).await) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %err, "connection error");
            }
        });
    }
}

/// Accept loop for the recording proxy. Upgrades stay enabled so CONNECT
/// tunnels can hijack the connection.
pub async fn serve_proxy(addr: SocketAddr, proxy: Arc<MitmProxy>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_proxy_with_listener(listener, proxy).await
}

/// Proxy accept loop over an already-bound listener.
pub async fn serve_proxy_with_listener(
    listener: TcpListener,
    proxy: Arc<MitmProxy>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "recording proxy listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let proxy = Arc::clone(&proxy);
                let peer = peer.to_string();
                async move { Ok::<_, Infallible>(proxy.handle(req, peer).await) }
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                error!(error = %err, "proxy connection error");
            }
        });
    }
}
