//! MITM proxy core: mode and filter state, plain-HTTP forwarding, and
//! recording.

use crate::ca::CaManager;
use crate::error::ProxyError;
use crate::filter::FilterConfig;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use mockd_core::ids;
use mockd_core::recording::{
    write_recording_to_disk, HttpExchange, Recording, RecordingStore,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on buffered request and response bodies.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that must not be forwarded hop to hop.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Whether intercepted traffic is captured or just forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Record,
    Passthrough,
}

struct ProxyState {
    mode: ProxyMode,
    filter: FilterConfig,
}

/// The recording proxy. Mode and filter mutate under one read-write lock;
/// traffic paths take shared reads.
pub struct MitmProxy {
    state: RwLock<ProxyState>,
    store: Arc<RecordingStore>,
    disk_dir: Option<PathBuf>,
    ca: Option<Arc<CaManager>>,
    client: reqwest::Client,
}

impl MitmProxy {
    pub fn new(
        mode: ProxyMode,
        filter: FilterConfig,
        store: Arc<RecordingStore>,
        disk_dir: Option<PathBuf>,
        ca: Option<Arc<CaManager>>,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(MitmProxy {
            state: RwLock::new(ProxyState { mode, filter }),
            store,
            disk_dir,
            ca,
            client,
        })
    }

    pub fn mode(&self) -> ProxyMode {
        self.state.read().mode
    }

    pub fn set_mode(&self, mode: ProxyMode) {
        self.state.write().mode = mode;
        info!(?mode, "proxy mode changed");
    }

    pub fn filter(&self) -> FilterConfig {
        self.state.read().filter.clone()
    }

    pub fn set_filter(&self, filter: FilterConfig) {
        self.state.write().filter = filter;
    }

    pub fn store(&self) -> Arc<RecordingStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn ca(&self) -> Option<Arc<CaManager>> {
        self.ca.clone()
    }

    /// Record-mode check plus filter evaluation, under one shared read.
    pub fn should_record(&self, host: &str, path: &str) -> bool {
        let state = self.state.read();
        state.mode == ProxyMode::Record && state.filter.should_record(host, path)
    }

    /// Store a captured exchange, spilling to disk when configured. Disk
    /// failures are logged, never fatal to the proxied request.
    pub(crate) fn record_exchange(&self, host: &str, exchange: HttpExchange) {
        let recording = Recording::new_http(ids::new_short_id(), host, exchange);
        if let Some(ref dir) = self.disk_dir {
            if let Err(err) = write_recording_to_disk(dir, &recording) {
                warn!(error = %err, "failed to persist recording");
            }
        }
        self.store.add(recording);
    }

    /// Entry point for one proxied request.
    pub async fn handle(
        self: Arc<Self>,
        req: Request<Incoming>,
        client_addr: String,
    ) -> Response<Full<Bytes>> {
        if req.method() == Method::CONNECT {
            return crate::tunnel::handle_connect(self, req).await;
        }
        match self.forward_http(req, &client_addr).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "upstream request failed");
                status_response(StatusCode::BAD_GATEWAY, "upstream request failed")
            }
        }
    }

    /// Plain (non-CONNECT) proxying: buffer, forward via the shared
    /// client, record, relay.
    async fn forward_http(
        &self,
        req: Request<Incoming>,
        client_addr: &str,
    ) -> Result<Response<Full<Bytes>>, ProxyError> {
        let method = req.method().clone();
        let uri = req.uri().clone();

        let host = uri
            .host()
            .map(str::to_string)
            .or_else(|| header_value(&req, "host"))
            .unwrap_or_default();
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let url = if uri.scheme().is_some() {
            uri.to_string()
        } else {
            format!("http://{host}{path}")
        };

        let (parts, body) = req.into_parts();
        let request_body = read_limited(body).await?;

        let mut builder = self
            .client
            .request(
                reqwest::Method::from_bytes(method.as_str().as_bytes())
                    .unwrap_or(reqwest::Method::GET),
                &url,
            )
            .header("X-Forwarded-For", client_ip(client_addr))
            .header("X-Forwarded-Host", &host);
        let mut request_headers = HashMap::new();
        for (name, value) in &parts.headers {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let Ok(value_str) = value.to_str() {
                request_headers.insert(name.as_str().to_string(), value_str.to_string());
                builder = builder.header(name.as_str(), value_str);
            }
        }

        let started = Instant::now();
        let mut upstream = builder.body(request_body.clone()).send().await?;
        let status = upstream.status().as_u16();
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut response_headers = HashMap::new();
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let Ok(value_str) = value.to_str() {
                response_headers.insert(name.as_str().to_string(), value_str.to_string());
            }
        }
        let response_body = read_reqwest_limited(&mut upstream).await?;

        let record_path = uri.path().to_string();
        if self.should_record(&host, &record_path) {
            debug!(host = %host, path = %record_path, "recording exchange");
            self.record_exchange(
                &host,
                HttpExchange {
                    method: method.to_string(),
                    path: record_path,
                    request_headers,
                    request_body: body_to_string(&request_body),
                    status,
                    response_headers: response_headers.clone(),
                    response_body: body_to_string(&response_body),
                    duration_ms,
                },
            );
        }

        let mut builder = Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
        for (name, value) in &response_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder
            .body(Full::new(response_body))
            .unwrap_or_else(|_| status_response(StatusCode::BAD_GATEWAY, "invalid upstream response")))
    }
}

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

pub(crate) fn status_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

/// Buffer a hyper body, bounded at [`MAX_BODY_BYTES`].
pub(crate) async fn read_limited<B>(body: B) -> Result<Bytes, ProxyError>
where
    B: hyper::body::Body,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|err| ProxyError::BodyRead(err.to_string()))
}

async fn read_reqwest_limited(response: &mut reqwest::Response) -> Result<Bytes, ProxyError> {
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(ProxyError::BodyRead(format!(
                "response body exceeds {MAX_BODY_BYTES} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

pub(crate) fn body_to_string(body: &Bytes) -> Option<String> {
    if body.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(body).into_owned())
    }
}

fn header_value<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn client_ip(addr: &str) -> String {
    addr.rsplit_once(':')
        .map(|(ip, _)| ip.to_string())
        .unwrap_or_else(|| addr.to_string())
}
