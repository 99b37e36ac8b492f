//! gRPC server implementation for the album service.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use album_catalog::{CatalogError, CatalogStore, JsonFileRepository, Repository};
use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

use crate::engine::{AlbumEngine, DEFAULT_STREAM_DELAY};
use crate::interceptor::CallInterceptor;
use crate::proto::{
    self, GetAlbumRequest, GetAlbumResponse, GetTotalAmountRequest, GetTotalAmountResponse,
    ListAlbumsRequest, ListAlbumsResponse, UploadAndNotifyRequest, UploadAndNotifyResponse,
    album_service_server::AlbumServiceServer,
};

/// Full method paths, as reported to the call interceptor.
pub mod methods {
    /// Unary lookup.
    pub const GET_ALBUM: &str = "/album.v1.AlbumService/GetAlbum";
    /// Server-streaming listing.
    pub const LIST_ALBUMS: &str = "/album.v1.AlbumService/ListAlbums";
    /// Client-streaming total.
    pub const GET_TOTAL_AMOUNT: &str = "/album.v1.AlbumService/GetTotalAmount";
    /// Bidirectional upload.
    pub const UPLOAD_AND_NOTIFY: &str = "/album.v1.AlbumService/UploadAndNotify";
}

/// Buffered responses per streaming call before the handler waits on the caller.
const STREAM_BUFFER: usize = 32;

/// Metadata key carrying the caller's deadline.
const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Parse a `grpc-timeout` value: up to eight digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u` or `n`).
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

/// Run `handler` until it finishes or `deadline` passes, whichever is first.
///
/// Dropping the handler at the deadline aborts any pending delay or receive.
async fn until_deadline<T, F>(deadline: Option<Instant>, handler: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, handler)
            .await
            .unwrap_or_else(|_| Err(Status::deadline_exceeded("call deadline exceeded"))),
        None => handler.await,
    }
}

/// The AlbumService gRPC implementation.
///
/// Every method is opened through the [`CallInterceptor`] before the engine
/// sees it. Streaming handlers run on their own task and feed a channel that
/// tonic drains independently, so receiving and sending never wait on each
/// other.
#[derive(Debug, Clone)]
pub struct AlbumGrpcService {
    engine: AlbumEngine,
    interceptor: CallInterceptor,
    request_timeout: Option<Duration>,
}

impl AlbumGrpcService {
    /// Create a service over `engine` that logs every call.
    pub fn new(engine: AlbumEngine) -> Self {
        Self::with_interceptor(engine, CallInterceptor::default())
    }

    /// Create a service reporting to a custom interceptor.
    pub fn with_interceptor(engine: AlbumEngine, interceptor: CallInterceptor) -> Self {
        Self {
            engine,
            interceptor,
            request_timeout: None,
        }
    }

    /// Cap every streaming call at `timeout`, even when the caller sets a
    /// longer deadline or none at all.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Deadline for a call: the earlier of the caller's `grpc-timeout` and
    /// the configured cap.
    fn deadline(&self, metadata: &MetadataMap) -> Option<Instant> {
        let caller = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout);
        let timeout = match (caller, self.request_timeout) {
            (Some(caller), Some(cap)) => Some(caller.min(cap)),
            (caller, cap) => caller.or(cap),
        };
        timeout.map(|t| Instant::now() + t)
    }

    /// Wrap this service in the generated tonic server.
    pub fn into_server(self) -> AlbumServiceServer<Self> {
        AlbumServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::album_service_server::AlbumService for AlbumGrpcService {
    type ListAlbumsStream = ReceiverStream<Result<ListAlbumsResponse, Status>>;
    type UploadAndNotifyStream = ReceiverStream<Result<UploadAndNotifyResponse, Status>>;

    async fn get_album(
        &self,
        request: Request<GetAlbumRequest>,
    ) -> Result<Response<GetAlbumResponse>, Status> {
        let title = request.into_inner().title;
        self.interceptor
            .unary(methods::GET_ALBUM, async {
                Ok(Response::new(self.engine.get_album(&title).await))
            })
            .await
    }

    async fn list_albums(
        &self,
        request: Request<ListAlbumsRequest>,
    ) -> Result<Response<Self::ListAlbumsStream>, Status> {
        let call = self.interceptor.begin(methods::LIST_ALBUMS);
        let deadline = self.deadline(request.metadata());
        let artist = request.into_inner().artist;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let outbound = call.outbound(tx.clone());
        let engine = self.engine.clone();

        tokio::spawn(async move {
            let result = until_deadline(deadline, engine.list_albums(&artist, &outbound)).await;
            if let Err(status) = call.finish(result) {
                let _ = tx.send(Err(status)).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_total_amount(
        &self,
        request: Request<Streaming<GetTotalAmountRequest>>,
    ) -> Result<Response<GetTotalAmountResponse>, Status> {
        let call = self.interceptor.begin(methods::GET_TOTAL_AMOUNT);
        let deadline = self.deadline(request.metadata());
        let inbound = call.inbound(request.into_inner());

        let result = until_deadline(deadline, self.engine.get_total_amount(inbound)).await;
        if result.is_ok() {
            call.message_sent::<GetTotalAmountResponse>();
        }
        call.finish(result).map(Response::new)
    }

    async fn upload_and_notify(
        &self,
        request: Request<Streaming<UploadAndNotifyRequest>>,
    ) -> Result<Response<Self::UploadAndNotifyStream>, Status> {
        let call = self.interceptor.begin(methods::UPLOAD_AND_NOTIFY);
        let deadline = self.deadline(request.metadata());
        let inbound = call.inbound(request.into_inner());

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let outbound = call.outbound(tx.clone());
        let engine = self.engine.clone();

        tokio::spawn(async move {
            let result =
                until_deadline(deadline, engine.upload_and_notify(inbound, &outbound)).await;
            if let Err(status) = call.finish(result) {
                let _ = tx.send(Err(status)).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub addr: SocketAddr,
    /// JSON file holding the catalog.
    pub data_file: PathBuf,
    /// Pause between consecutive `ListAlbums` responses.
    pub stream_delay: Duration,
    /// Upper bound on any single call, streaming bodies included. The
    /// caller's own `grpc-timeout` applies too; the earlier deadline wins.
    pub request_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], 50051)),
            data_file: PathBuf::from("db/album.json"),
            stream_delay: DEFAULT_STREAM_DELAY,
            request_timeout: None,
        }
    }
}

/// Server configuration and runner.
#[derive(Debug)]
pub struct AlbumServer {
    config: ServerConfig,
}

impl AlbumServer {
    /// Create a new server from `config`.
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Load the catalog through `repository` and build the service.
    ///
    /// Fails if the initial record set cannot be loaded.
    pub async fn service(
        &self,
        repository: Arc<dyn Repository>,
    ) -> Result<AlbumGrpcService, CatalogError> {
        let store = Arc::new(CatalogStore::open(repository).await?);
        let engine = AlbumEngine::new(store).with_stream_delay(self.config.stream_delay);
        Ok(AlbumGrpcService::new(engine).with_request_timeout(self.config.request_timeout))
    }

    /// Load the catalog from the configured JSON file and serve until a
    /// shutdown signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        let repository = Arc::new(JsonFileRepository::new(&self.config.data_file));
        let service = self.service(repository).await.with_context(|| {
            format!(
                "failed to load albums from {}",
                self.config.data_file.display()
            )
        })?;

        tracing::info!("Starting gRPC server on {}", self.config.addr);

        let mut builder = tonic::transport::Server::builder();
        if let Some(timeout) = self.config.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .add_service(service.into_server())
            .serve_with_shutdown(self.config.addr, shutdown_signal())
            .await?;

        tracing::info!("gRPC server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
