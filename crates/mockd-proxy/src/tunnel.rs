//! CONNECT handling: raw byte tunnels without a CA, TLS interception with
//! one.
//!
//! The client socket is hijacked through hyper's upgrade machinery after
//! the `200 Connection Established` reply. With a CA configured the proxy
//! terminates TLS using a per-host leaf, reads plaintext requests in a
//! loop, and forwards each over its own verification-disabled TLS
//! connection to the real upstream.

use crate::error::ProxyError;
use crate::proxy::{
    body_to_string, is_hop_by_hop, read_limited, status_response, MitmProxy,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use mockd_core::recording::HttpExchange;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

/// Handle a CONNECT request. The response is sent before the hijack; any
/// failure preparing the tunnel surfaces as a 4xx/5xx instead.
pub(crate) async fn handle_connect(
    proxy: Arc<MitmProxy>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let target = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let (host, port) = match normalize_target(&target) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(target = %target, error = %err, "bad CONNECT target");
            return status_response(StatusCode::BAD_REQUEST, "invalid CONNECT target");
        }
    };

    match proxy.ca() {
        None => {
            // Transparent tunnel. Dial first so connection failures still
            // reach the client as a status.
            let upstream = match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(host = %host, port, error = %err, "CONNECT dial failed");
                    return status_response(StatusCode::BAD_GATEWAY, "upstream unreachable");
                }
            };
            tokio::spawn(async move {
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        let mut client = TokioIo::new(upgraded);
                        let mut upstream = upstream;
                        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                            Ok((up, down)) => {
                                debug!(host = %host, up, down, "tunnel closed")
                            }
                            Err(err) => debug!(host = %host, error = %err, "tunnel error"),
                        }
                    }
                    Err(err) => warn!(error = %err, "CONNECT upgrade failed"),
                }
            });
            connect_established()
        }
        Some(ca) => {
            let tls_config = match ca.server_config(&host) {
                Ok(config) => config,
                Err(err) => {
                    warn!(host = %host, error = %err, "leaf issuance failed");
                    return status_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "certificate issuance failed",
                    );
                }
            };
            tokio::spawn(async move {
                let upgraded = match hyper::upgrade::on(req).await {
                    Ok(upgraded) => upgraded,
                    Err(err) => {
                        warn!(error = %err, "CONNECT upgrade failed");
                        return;
                    }
                };
                let acceptor = TlsAcceptor::from(tls_config);
                let tls_stream = match acceptor.accept(TokioIo::new(upgraded)).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        debug!(host = %host, error = %err, "client TLS handshake failed");
                        return;
                    }
                };

                let service = service_fn(move |inner: Request<Incoming>| {
                    intercept(Arc::clone(&proxy), host.clone(), port, inner)
                });
                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(tls_stream), service)
                    .await
                {
                    debug!(error = %err, "intercepted connection ended");
                }
            });
            connect_established()
        }
    }
}

fn connect_established() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::OK;
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    response
}

/// One plaintext request inside the intercepted tunnel.
async fn intercept(
    proxy: Arc<MitmProxy>,
    host: String,
    port: u16,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match forward_intercepted(&proxy, &host, port, req).await {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(host = %host, error = %err, "intercepted forward failed");
            Ok(status_response(
                StatusCode::BAD_GATEWAY,
                "upstream request failed",
            ))
        }
    }
}

async fn forward_intercepted(
    proxy: &MitmProxy,
    host: &str,
    port: u16,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, ProxyError> {
    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let (parts, body) = req.into_parts();
    let request_body = read_limited(body).await?;

    // The proxy is transparent: the upstream's real certificate is not
    // verified.
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|err| ProxyError::UpstreamConnect(err.to_string()))?;
    let connector = TlsConnector::from(insecure_client_config());
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| ProxyError::InvalidTarget(host.to_string()))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|err| ProxyError::UpstreamConnect(err.to_string()))?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
        .await
        .map_err(|err| ProxyError::UpstreamConnect(err.to_string()))?;
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(path.as_str());
    let mut request_headers = HashMap::new();
    let mut saw_host = false;
    for (name, value) in &parts.headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if name.as_str().eq_ignore_ascii_case("host") {
            saw_host = true;
        }
        if let Ok(value_str) = value.to_str() {
            request_headers.insert(name.as_str().to_string(), value_str.to_string());
        }
        builder = builder.header(name, value);
    }
    if !saw_host {
        builder = builder.header("host", host);
    }
    let upstream_req = builder
        .body(Full::new(request_body.clone()))
        .map_err(|err| ProxyError::UpstreamConnect(err.to_string()))?;

    let started = Instant::now();
    let upstream_resp = sender
        .send_request(upstream_req)
        .await
        .map_err(|err| ProxyError::UpstreamConnect(err.to_string()))?;
    let status = upstream_resp.status();
    let duration_ms = started.elapsed().as_millis() as u64;

    let mut response_headers = HashMap::new();
    for (name, value) in upstream_resp.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            response_headers.insert(name.as_str().to_string(), value_str.to_string());
        }
    }
    let response_body = read_limited(upstream_resp.into_body()).await?;

    let record_path = path
        .split('?')
        .next()
        .unwrap_or(&path)
        .to_string();
    if proxy.should_record(host, &record_path) {
        proxy.record_exchange(
            host,
            HttpExchange {
                method: method.to_string(),
                path: record_path,
                request_headers,
                request_body: body_to_string(&request_body),
                status: status.as_u16(),
                response_headers: response_headers.clone(),
                response_body: body_to_string(&response_body),
                duration_ms,
            },
        );
    }

    let mut builder = Response::builder().status(status);
    for (name, value) in &response_headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    Ok(builder
        .body(Full::new(response_body))
        .unwrap_or_else(|_| status_response(StatusCode::BAD_GATEWAY, "invalid upstream response")))
}

/// Split `host:port`, defaulting to 443.
pub(crate) fn normalize_target(target: &str) -> Result<(String, u16), ProxyError> {
    if target.is_empty() {
        return Err(ProxyError::InvalidTarget(target.to_string()));
    }
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| ProxyError::InvalidTarget(target.to_string()))?;
            if host.is_empty() {
                return Err(ProxyError::InvalidTarget(target.to_string()));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((target.to_string(), 443)),
    }
}

fn insecure_client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth();
    Arc::new(config)
}

/// Accepts any upstream certificate; the proxy is a transparent observer,
/// not a trust anchor.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
