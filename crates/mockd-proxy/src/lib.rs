//! mockd recording proxy: a MITM proxy that captures live upstream traffic
//! for later replay.
//!
//! Plain HTTP requests are buffered, forwarded through a shared pooled
//! client, and recorded when the mode/filter pair allows. HTTPS traffic
//! arrives as CONNECT: without a CA the proxy is a byte tunnel; with one it
//! terminates TLS using per-host leaf certificates signed by the local
//! [`ca::CaManager`] and records each decrypted exchange.

pub mod ca;
pub mod cert_cache;
pub mod error;
pub mod filter;
pub mod proxy;
mod tunnel;

pub use ca::{CaManager, HostCert};
pub use cert_cache::CertCache;
pub use error::ProxyError;
pub use filter::FilterConfig;
pub use proxy::{MitmProxy, ProxyMode, MAX_BODY_BYTES};
