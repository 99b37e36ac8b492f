//! Album Catalog gRPC Server
//!
//! Loads the catalog from a JSON file and serves it over gRPC.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use album_catalog_grpc::{AlbumServer, ServerConfig};

/// Album Catalog gRPC Server - unary and streaming access to an album catalog
#[derive(Parser, Debug)]
#[command(name = "album-catalog-grpc")]
#[command(about = "gRPC server exposing an album catalog")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "[::1]:50051")]
    addr: SocketAddr,

    /// JSON file holding the catalog
    #[arg(long, default_value = "db/album.json")]
    data_file: PathBuf,

    /// Pause between streamed ListAlbums responses, in milliseconds
    #[arg(long, default_value_t = 1000)]
    stream_delay_ms: u64,

    /// Server-side cap on call duration in milliseconds (0 disables)
    #[arg(long, default_value_t = 0)]
    request_timeout_ms: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            addr: args.addr,
            data_file: args.data_file,
            stream_delay: Duration::from_millis(args.stream_delay_ms),
            request_timeout: (args.request_timeout_ms > 0)
                .then(|| Duration::from_millis(args.request_timeout_ms)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let server = AlbumServer::new(args.into());
    server.run().await?;

    Ok(())
}
