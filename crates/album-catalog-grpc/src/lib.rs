//! Album Catalog gRPC Server
//!
//! Exposes the album catalog through the four gRPC interaction patterns:
//!
//! | Method            | Request           | Response            |
//! |-------------------|-------------------|---------------------|
//! | `GetAlbum`        | title             | album (+ found)     |
//! | `ListAlbums`      | artist            | stream of albums    |
//! | `GetTotalAmount`  | stream of titles  | count, total, message |
//! | `UploadAndNotify` | stream of albums  | stream of messages  |
//!
//! # Architecture
//!
//! ```text
//! tonic ──> AlbumGrpcService ──> CallInterceptor ──> AlbumEngine ──> CatalogStore ──> Repository
//!              (adapter)          (observation)       (handlers)     (shared state)    (JSON file)
//! ```
//!
//! The [`AlbumEngine`] never sees transport types beyond decoded messages,
//! inbound streams and [`Outbound`] senders. The [`CallInterceptor`] wraps
//! every call, unary or streaming, with the same before/after hooks and
//! reports each streamed message in either direction.

pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("album.v1");
}

mod engine;
mod interceptor;
mod server;

pub use engine::{AlbumEngine, DEFAULT_STREAM_DELAY, TOTAL_AMOUNT_MESSAGE, catalog_status};
pub use interceptor::{Call, CallInterceptor, CallObserver, Inbound, LoggingObserver, Outbound};
pub use server::{AlbumGrpcService, AlbumServer, ServerConfig, methods};

// Re-export proto types for convenience
pub use proto::{
    Album, album_service_client::AlbumServiceClient,
    album_service_server::AlbumServiceServer as AlbumGrpcServer,
};
