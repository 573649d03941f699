use thiserror::Error;

/// Errors from the recording proxy, its CA, and the TLS interception path.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("certificate generation failed: {0}")]
    CertGeneration(#[from] rcgen::Error),

    #[error("RSA key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    #[error("key encoding failed: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    #[error("key encoding failed: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CA material missing; call ensure_ca first")]
    CaNotLoaded,

    #[error("malformed PEM in {path}")]
    MalformedPem { path: String },

    #[error("invalid CONNECT target {0:?}")]
    InvalidTarget(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),

    #[error("failed to read body: {0}")]
    BodyRead(String),
}
