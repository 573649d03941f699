use clap::Parser;
use mockd_proxy::{CaManager, FilterConfig, MitmProxy, ProxyMode};
use mockd_server::router::Router;
use mockd_server::AppState;
use mockd_stream::buffer::EventBufferPool;
use mockd_stream::{ConnectionManager, StreamHandler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mockd")]
#[command(about = "Multi-protocol mock server with a recording proxy")]
struct Args {
    /// Port for mock traffic.
    #[arg(short, long, default_value = "8080", env = "MOCKD_PORT")]
    port: u16,

    /// Mock definition file (YAML or JSON list of mocks).
    #[arg(short, long, env = "MOCKD_MOCKS")]
    mocks: Option<PathBuf>,

    /// Maximum concurrent SSE connections (0 = unlimited).
    #[arg(long, default_value = "0")]
    max_connections: usize,

    /// Enable the recording proxy on this port.
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Proxy mode at startup.
    #[arg(long, default_value = "record")]
    proxy_mode: String,

    /// Directory for the interception CA; omitting it disables TLS
    /// interception (CONNECT becomes a byte tunnel).
    #[arg(long)]
    ca_dir: Option<PathBuf>,

    /// Persist recordings under this directory.
    #[arg(long)]
    record_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mocks = match args.mocks {
        Some(ref path) => mockd_server::load_mocks(path)?,
        None => Vec::new(),
    };
    let router = Router::new(mocks)?;

    let manager = Arc::new(ConnectionManager::new(args.max_connections));
    let buffers = Arc::new(EventBufferPool::new());
    let state = Arc::new(AppState {
        router,
        handler: StreamHandler::new(manager, buffers),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    if let Some(proxy_port) = args.proxy_port {
        let ca = match args.ca_dir {
            Some(ref dir) => {
                let ca = Arc::new(CaManager::new(dir, 0));
                ca.ensure_ca()?;
                Some(ca)
            }
            None => None,
        };
        let mode = match args.proxy_mode.as_str() {
            "passthrough" => ProxyMode::Passthrough,
            _ => ProxyMode::Record,
        };
        let proxy = Arc::new(MitmProxy::new(
            mode,
            FilterConfig::default(),
            Arc::new(mockd_core::recording::RecordingStore::new()),
            args.record_dir,
            ca,
        )?);
        let proxy_addr = SocketAddr::from(([0, 0, 0, 0], proxy_port));

        tokio::select! {
            result = mockd_server::serve(addr, state) => result,
            result = mockd_server::serve_proxy(proxy_addr, proxy) => result,
        }
    } else {
        mockd_server::serve(addr, state).await
    }
}
