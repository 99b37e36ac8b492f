//! Call handlers for the four interaction patterns.
//!
//! The engine is transport agnostic: it takes decoded requests, inbound
//! message streams and [`Outbound`] senders, and never touches sockets. The
//! only state it carries between calls is its handle on the shared
//! [`CatalogStore`].

use std::sync::Arc;
use std::time::Duration;

use album_catalog::{AppendOutcome, CatalogError, CatalogStore, Record};
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

use crate::interceptor::Outbound;
use crate::proto::{
    Album, GetAlbumResponse, GetTotalAmountRequest, GetTotalAmountResponse, ListAlbumsResponse,
    UploadAndNotifyRequest, UploadAndNotifyResponse,
};

/// Message returned by a completed `GetTotalAmount` call.
pub const TOTAL_AMOUNT_MESSAGE: &str = "success to get total amount";

/// Default pause between consecutive `ListAlbums` responses.
pub const DEFAULT_STREAM_DELAY: Duration = Duration::from_secs(1);

impl From<Record> for Album {
    fn from(record: Record) -> Self {
        Self {
            title: record.title,
            artist: record.artist,
            price: record.price,
        }
    }
}

impl From<Album> for Record {
    fn from(album: Album) -> Self {
        Record::new(album.title, album.artist, album.price)
    }
}

/// Map a store failure onto the RPC status reported to the caller.
pub fn catalog_status(err: CatalogError) -> Status {
    Status::internal(err.to_string())
}

/// Service engine shared by every in-flight call.
#[derive(Debug, Clone)]
pub struct AlbumEngine {
    store: Arc<CatalogStore>,
    stream_delay: Duration,
}

impl AlbumEngine {
    /// Create an engine over `store` with the default stream delay.
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self {
            store,
            stream_delay: DEFAULT_STREAM_DELAY,
        }
    }

    /// Set the pause between consecutive `ListAlbums` responses.
    pub fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = delay;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    /// Look up an album by exact title.
    pub async fn find_album(&self, title: &str) -> Option<Record> {
        self.store.find_by_title(title).await
    }

    /// `GetAlbum`: a miss is still a success, carrying an empty album with
    /// `found` unset.
    pub async fn get_album(&self, title: &str) -> GetAlbumResponse {
        match self.find_album(title).await {
            Some(record) => {
                tracing::debug!(title = %title, "album found");
                GetAlbumResponse {
                    album: Some(record.into()),
                    found: true,
                }
            }
            None => {
                tracing::debug!(title = %title, "album not found");
                GetAlbumResponse {
                    album: Some(Album::default()),
                    found: false,
                }
            }
        }
    }

    /// `ListAlbums`: one response per album by `artist`, in store order,
    /// pausing between sends.
    ///
    /// The pause ends early with `Cancelled` if the caller goes away.
    pub async fn list_albums(
        &self,
        artist: &str,
        out: &Outbound<ListAlbumsResponse>,
    ) -> Result<(), Status> {
        let albums = self.store.find_all_by_artist(artist).await;
        tracing::debug!(artist = %artist, count = albums.len(), "listing albums");

        for (i, record) in albums.into_iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.stream_delay) => {}
                    _ = out.closed() => {
                        return Err(Status::cancelled("response stream closed by caller"));
                    }
                }
            }
            out.send(ListAlbumsResponse {
                album: Some(record.into()),
            })
            .await?;
        }
        Ok(())
    }

    /// `GetTotalAmount`: count every received title and sum the prices of
    /// those that exist. Unknown titles are counted but add nothing.
    pub async fn get_total_amount<S>(&self, mut inbound: S) -> Result<GetTotalAmountResponse, Status>
    where
        S: Stream<Item = Result<GetTotalAmountRequest, Status>> + Unpin,
    {
        let mut album_count: i32 = 0;
        let mut total_amount: f32 = 0.0;

        while let Some(req) = inbound.next().await {
            let req = req?;
            album_count += 1;
            if let Some(record) = self.store.find_by_title(&req.title).await {
                total_amount += record.price;
            } else {
                tracing::debug!(title = %req.title, "title not in catalog");
            }
        }

        Ok(GetTotalAmountResponse {
            album_count,
            total_amount,
            message: TOTAL_AMOUNT_MESSAGE.to_string(),
        })
    }

    /// `UploadAndNotify`: append each uploaded album unless its title is
    /// taken, answering every request with exactly one notification in
    /// arrival order.
    pub async fn upload_and_notify<S>(
        &self,
        mut inbound: S,
        out: &Outbound<UploadAndNotifyResponse>,
    ) -> Result<(), Status>
    where
        S: Stream<Item = Result<UploadAndNotifyRequest, Status>> + Unpin,
    {
        while let Some(req) = inbound.next().await {
            let album = req?
                .album
                .ok_or_else(|| Status::invalid_argument("upload request has no album"))?;
            let title = album.title.clone();

            let message = match self
                .store
                .append_if_absent(album.into())
                .await
                .map_err(catalog_status)?
            {
                AppendOutcome::Appended => {
                    tracing::info!(title = %title, "album uploaded");
                    format!("{} is uploaded", title)
                }
                AppendOutcome::AlreadyExists => format!("{} is already exists", title),
            };

            out.send(UploadAndNotifyResponse { message }).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::interceptor::CallInterceptor;
    use crate::interceptor::tests::{Event, RecordingObserver};
    use album_catalog::InMemoryRepository;
    use tokio::sync::mpsc;

    fn seed() -> Vec<Record> {
        vec![
            Record::new("Blue Train", "John Coltrane", 56.99),
            Record::new("Kind of Blue", "Miles Davis", 42.99),
            Record::new("Giant Steps", "John Coltrane", 63.99),
            Record::new("Bitches Brew", "Miles Davis", 38.5),
        ]
    }

    fn setup() -> (Arc<InMemoryRepository>, AlbumEngine) {
        let repo = Arc::new(InMemoryRepository::new(seed()));
        let store = Arc::new(CatalogStore::with_records(seed(), repo.clone()));
        let engine = AlbumEngine::new(store).with_stream_delay(Duration::from_millis(5));
        (repo, engine)
    }

    fn uploads(albums: &[(&str, &str, f32)]) -> Vec<Result<UploadAndNotifyRequest, Status>> {
        albums
            .iter()
            .map(|(title, artist, price)| {
                Ok(UploadAndNotifyRequest {
                    album: Some(Record::new(*title, *artist, *price).into()),
                })
            })
            .collect()
    }

    fn drain<T>(rx: &mut mpsc::Receiver<Result<T, Status>>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_get_album_hit_is_idempotent() {
        let (_repo, engine) = setup();
        let first = engine.get_album("Kind of Blue").await;
        let second = engine.get_album("Kind of Blue").await;

        assert!(first.found);
        assert_eq!(first, second);
        assert_eq!(
            Record::from(first.album.unwrap()),
            Record::new("Kind of Blue", "Miles Davis", 42.99)
        );
    }

    #[tokio::test]
    async fn test_get_album_miss_returns_empty_album() {
        let (_repo, engine) = setup();
        let resp = engine.get_album("Not Exist Title").await;

        assert!(!resp.found);
        assert_eq!(resp.album, Some(Album::default()));
        assert!(engine.find_album("Not Exist Title").await.is_none());
    }

    #[tokio::test]
    async fn test_list_albums_in_store_order() {
        let (_repo, engine) = setup();
        let call = CallInterceptor::default().begin("/test/ListAlbums");
        let (tx, mut rx) = mpsc::channel(8);

        engine
            .list_albums("Miles Davis", &call.outbound(tx))
            .await
            .unwrap();

        let titles: Vec<String> = drain(&mut rx)
            .into_iter()
            .map(|r| r.album.unwrap().title)
            .collect();
        assert_eq!(titles, vec!["Kind of Blue", "Bitches Brew"]);
    }

    #[tokio::test]
    async fn test_list_albums_no_match_sends_nothing() {
        let (_repo, engine) = setup();
        let call = CallInterceptor::default().begin("/test/ListAlbums");
        let (tx, mut rx) = mpsc::channel(8);

        engine
            .list_albums("Nobody", &call.outbound(tx))
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_list_albums_stops_when_caller_leaves() {
        let (repo, _) = setup();
        let store = Arc::new(CatalogStore::with_records(seed(), repo));
        let engine = AlbumEngine::new(store).with_stream_delay(Duration::from_secs(3600));
        let call = CallInterceptor::default().begin("/test/ListAlbums");
        let (tx, mut rx) = mpsc::channel(8);
        let out = call.outbound(tx);

        let handle = tokio::spawn(async move { engine.list_albums("John Coltrane", &out).await });

        // First album goes out immediately, then the engine sleeps.
        assert!(rx.recv().await.unwrap().is_ok());
        drop(rx);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err().code(), tonic::Code::Cancelled);
    }

    #[tokio::test]
    async fn test_total_amount_counts_unmatched_titles() {
        let (_repo, engine) = setup();
        let inbound = tokio_stream::iter(vec![
            Ok(GetTotalAmountRequest {
                title: "Blue Train".to_string(),
            }),
            Ok(GetTotalAmountRequest {
                title: "Unknown".to_string(),
            }),
        ]);

        let resp = engine.get_total_amount(inbound).await.unwrap();
        assert_eq!(resp.album_count, 2);
        assert_eq!(resp.total_amount, 56.99);
        assert_eq!(resp.message, TOTAL_AMOUNT_MESSAGE);
    }

    #[tokio::test]
    async fn test_total_amount_empty_input() {
        let (_repo, engine) = setup();
        let resp = engine
            .get_total_amount(tokio_stream::iter(Vec::<
                Result<GetTotalAmountRequest, Status>,
            >::new()))
            .await
            .unwrap();
        assert_eq!(resp.album_count, 0);
        assert_eq!(resp.total_amount, 0.0);
    }

    #[tokio::test]
    async fn test_total_amount_fails_on_receive_error() {
        let (_repo, engine) = setup();
        let inbound = tokio_stream::iter(vec![
            Ok(GetTotalAmountRequest {
                title: "Blue Train".to_string(),
            }),
            Err(Status::unavailable("connection reset")),
        ]);

        let err = engine.get_total_amount(inbound).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_upload_then_duplicate() {
        let (repo, engine) = setup();
        let call = CallInterceptor::default().begin("/test/UploadAndNotify");
        let (tx, mut rx) = mpsc::channel(8);
        let inbound = tokio_stream::iter(uploads(&[
            ("New Album", "New Artist", 10.99),
            ("New Album", "New Artist", 10.99),
            ("Blue Train", "John Coltrane", 56.99),
        ]));

        engine
            .upload_and_notify(inbound, &call.outbound(tx))
            .await
            .unwrap();

        let messages: Vec<String> = drain(&mut rx).into_iter().map(|r| r.message).collect();
        assert_eq!(
            messages,
            vec![
                "New Album is uploaded",
                "New Album is already exists",
                "Blue Train is already exists",
            ]
        );
        assert_eq!(engine.store().len().await, 5);
        assert_eq!(repo.persist_count(), 1);
        assert!(engine.get_album("New Album").await.found);
    }

    #[tokio::test]
    async fn test_upload_persist_failure_ends_call() {
        let (repo, engine) = setup();
        repo.fail_persists(true);
        let call = CallInterceptor::default().begin("/test/UploadAndNotify");
        let (tx, mut rx) = mpsc::channel(8);
        let inbound = tokio_stream::iter(uploads(&[
            ("New Album", "New Artist", 10.99),
            ("New Album 2", "New Artist 2", 20.99),
        ]));

        let err = engine
            .upload_and_notify(inbound, &call.outbound(tx))
            .await
            .unwrap_err();

        assert_eq!(err.code(), tonic::Code::Internal);
        assert!(drain(&mut rx).is_empty());
        // The in-memory append is kept; the second request is never read.
        assert!(engine.store().contains_title("New Album").await);
        assert!(!engine.store().contains_title("New Album 2").await);
    }

    #[tokio::test]
    async fn test_upload_without_album_is_rejected() {
        let (_repo, engine) = setup();
        let call = CallInterceptor::default().begin("/test/UploadAndNotify");
        let (tx, _rx) = mpsc::channel(8);
        let inbound = tokio_stream::iter(vec![Ok(UploadAndNotifyRequest { album: None })]);

        let err = engine
            .upload_and_notify(inbound, &call.outbound(tx))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_stream_messages_are_observed() {
        let (_repo, engine) = setup();
        let observer = Arc::new(RecordingObserver::default());
        let interceptor = CallInterceptor::new(observer.clone());
        let call = interceptor.begin("/test/UploadAndNotify");
        let (tx, _rx) = mpsc::channel(8);
        let inbound = call.inbound(tokio_stream::iter(uploads(&[
            ("Solar", "Miles Davis", 9.99),
            ("Solar", "Miles Davis", 9.99),
        ])));

        let result = engine.upload_and_notify(inbound, &call.outbound(tx)).await;
        let _ = call.finish(result);

        let events = observer.events();
        assert_eq!(events.first(), Some(&Event::Before("/test/UploadAndNotify".to_string())));
        assert_eq!(events.last(), Some(&Event::Success("/test/UploadAndNotify".to_string())));
        let received = events
            .iter()
            .filter(|e| **e == Event::Received("UploadAndNotifyRequest".to_string()))
            .count();
        let sent = events
            .iter()
            .filter(|e| **e == Event::Sent("UploadAndNotifyResponse".to_string()))
            .count();
        assert_eq!((received, sent), (2, 2));
    }
}
