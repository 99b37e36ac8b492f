//! Album Catalog CLI - demo client for the album gRPC service
//!
//! Usage:
//!   album-catalog get "Blue Train"          Unary lookup
//!   album-catalog list "Miles Davis"        Server-streaming listing
//!   album-catalog total "Blue Train" Jeru   Client-streaming total
//!   album-catalog upload "Solar" "Miles Davis" 9.99
//!                                           Bidirectional upload
//!   album-catalog demo                      All four patterns in sequence

use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::transport::Channel;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use album_catalog_grpc::AlbumServiceClient;
use album_catalog_grpc::proto::{
    Album, GetAlbumRequest, GetTotalAmountRequest, ListAlbumsRequest, UploadAndNotifyRequest,
};

const DEMO_TITLES: &[&str] = &[
    "Blue Train",
    "Giant Steps",
    "Speak to Evil",
    "Weather Report",
    "A Portrait in Jazz",
    "Chet Baker Sings",
];

const DEMO_UPLOADS: &[(&str, &str, f32)] = &[
    ("New Album", "New Artist", 10.99),
    ("New Album 2", "New Artist 2", 20.99),
    ("Blue Train", "John Coltrane", 56.99),
    ("Jeru", "Gerry Mulligan", 17.99),
];

/// Album Catalog CLI - exercise each gRPC call pattern against a running server
#[derive(Parser, Debug)]
#[command(name = "album-catalog")]
struct Args {
    /// Server endpoint
    #[arg(long, default_value = "http://[::1]:50051")]
    addr: String,

    /// Deadline for each call, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Pause between streamed sends, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pause_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up one album by title
    Get {
        /// Album title
        title: String,
    },
    /// Stream every album by an artist
    List {
        /// Artist name
        artist: String,
    },
    /// Send titles and print the count and summed price
    Total {
        /// Album titles
        #[arg(required = true)]
        titles: Vec<String>,
    },
    /// Upload albums given as TITLE ARTIST PRICE triples
    Upload {
        /// Flattened TITLE ARTIST PRICE triples
        #[arg(required = true, num_args = 3..)]
        fields: Vec<String>,
    },
    /// Run every call pattern with sample data
    Demo,
}

struct Driver {
    client: AlbumServiceClient<Channel>,
    timeout: Duration,
    pause: Duration,
}

impl Driver {
    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request.set_timeout(self.timeout);
        request
    }

    async fn get_album(&mut self, title: &str) -> anyhow::Result<()> {
        let request = self.request(GetAlbumRequest {
            title: title.to_string(),
        });
        let resp = self
            .client
            .get_album(request)
            .await
            .context("GetAlbum failed")?
            .into_inner();

        if resp.found {
            tracing::info!(album = ?resp.album, "response");
        } else {
            tracing::info!(title = %title, "album not found");
        }
        Ok(())
    }

    async fn list_albums(&mut self, artist: &str) -> anyhow::Result<()> {
        let request = self.request(ListAlbumsRequest {
            artist: artist.to_string(),
        });
        let mut stream = self
            .client
            .list_albums(request)
            .await
            .context("ListAlbums failed")?
            .into_inner();

        while let Some(resp) = stream.next().await {
            let resp = resp.context("ListAlbums stream failed")?;
            tracing::info!(album = ?resp.album, "response");
        }
        Ok(())
    }

    async fn get_total_amount(&mut self, titles: Vec<String>) -> anyhow::Result<()> {
        let outbound = tokio_stream::iter(titles)
            .map(|title| GetTotalAmountRequest { title })
            .throttle(self.pause);

        let request = self.request(outbound);
        let resp = self
            .client
            .get_total_amount(request)
            .await
            .context("GetTotalAmount failed")?
            .into_inner();

        tracing::info!(
            album_count = resp.album_count,
            total_amount = resp.total_amount,
            message = %resp.message,
            "response"
        );
        Ok(())
    }

    async fn upload_and_notify(&mut self, albums: Vec<Album>) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel::<UploadAndNotifyRequest>(8);
        let request = self.request(ReceiverStream::new(rx));
        let mut stream = self
            .client
            .upload_and_notify(request)
            .await
            .context("UploadAndNotify failed")?
            .into_inner();

        // Receive on its own task so sends never wait on responses.
        let receiver = tokio::spawn(async move {
            while let Some(resp) = stream.next().await {
                let resp = resp.context("UploadAndNotify stream failed")?;
                tracing::info!(message = %resp.message, "response");
            }
            anyhow::Ok(())
        });

        for album in albums {
            let title = album.title.clone();
            tx.send(UploadAndNotifyRequest { album: Some(album) })
                .await
                .with_context(|| format!("failed to send {}", title))?;
            tokio::time::sleep(self.pause).await;
        }
        drop(tx);

        receiver.await.context("receive task panicked")?
    }

    async fn demo(&mut self) -> anyhow::Result<()> {
        self.get_album("Blue Train").await?;
        self.get_album("Not Exist Title").await?;
        self.list_albums("Miles Davis").await?;
        self.get_total_amount(DEMO_TITLES.iter().map(|t| t.to_string()).collect())
            .await?;
        let albums = DEMO_UPLOADS
            .iter()
            .map(|(title, artist, price)| Album {
                title: title.to_string(),
                artist: artist.to_string(),
                price: *price,
            })
            .collect();
        self.upload_and_notify(albums).await
    }
}

fn parse_uploads(fields: &[String]) -> anyhow::Result<Vec<Album>> {
    if fields.len() % 3 != 0 {
        bail!("expected TITLE ARTIST PRICE triples, got {} values", fields.len());
    }
    fields
        .chunks(3)
        .map(|chunk| {
            let price: f32 = chunk[2]
                .parse()
                .with_context(|| format!("invalid price {:?}", chunk[2]))?;
            if price < 0.0 {
                bail!("price must not be negative: {}", price);
            }
            Ok(Album {
                title: chunk[0].clone(),
                artist: chunk[1].clone(),
                price,
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let client = AlbumServiceClient::connect(args.addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    let mut driver = Driver {
        client,
        timeout: Duration::from_secs(args.timeout_secs),
        pause: Duration::from_millis(args.pause_ms),
    };

    match args.command {
        Command::Get { title } => driver.get_album(&title).await,
        Command::List { artist } => driver.list_albums(&artist).await,
        Command::Total { titles } => driver.get_total_amount(titles).await,
        Command::Upload { fields } => {
            let albums = parse_uploads(&fields)?;
            driver.upload_and_notify(albums).await
        }
        Command::Demo => driver.demo().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_uploads() {
        let albums = parse_uploads(&strings(&["Solar", "Miles Davis", "9.99"])).unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].title, "Solar");
        assert_eq!(albums[0].price, 9.99);
    }

    #[test]
    fn test_parse_uploads_rejects_partial_triple() {
        assert!(parse_uploads(&strings(&["Solar", "Miles Davis", "9.99", "Jeru"])).is_err());
    }

    #[test]
    fn test_parse_uploads_rejects_bad_price() {
        assert!(parse_uploads(&strings(&["Solar", "Miles Davis", "cheap"])).is_err());
        assert!(parse_uploads(&strings(&["Solar", "Miles Davis", "-1"])).is_err());
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from(["album-catalog", "total", "Blue Train", "Jeru"]).unwrap();
        match args.command {
            Command::Total { titles } => assert_eq!(titles, vec!["Blue Train", "Jeru"]),
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(args.timeout_secs, 10);
    }
}
