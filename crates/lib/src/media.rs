//! Image fetcher: resolve an inbound image reference to bytes and land them on disk.
//!
//! Images are always written to `{images_dir}/{YYYYMMDD}/{sender_id}/{uuid}.{format}` before they
//! are re-uploaded; nothing is streamed straight from the platform to the aggregator. Stored files
//! are never deleted by the relay.

use crate::channels::{ChannelError, ImageRef, WhatsAppChannel};
use chrono::NaiveDate;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Business-messaging media is always stored as jpg.
pub const WHATSAPP_IMAGE_FORMAT: &str = "jpg";
/// Used when a messenger URL has no extension in its last path segment.
pub const FALLBACK_IMAGE_FORMAT: &str = "jpg";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("image download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("image download returned {status}")]
    Status { status: reqwest::StatusCode },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("media {0} has no download url")]
    NoMediaUrl(String),
    #[error("sender id not usable as a directory name: {0:?}")]
    InvalidSender(String),
    #[error("writing image to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An image written to the store, ready for re-upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub id: Uuid,
    pub format: String,
}

impl StoredImage {
    /// `{uuid}.{format}`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.format)
    }

    /// `image/{format}`
    pub fn content_type(&self) -> String {
        format!("image/{}", self.format)
    }
}

/// Extension of the last path segment of `url`, ignoring query and fragment.
pub fn image_format_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_string()
        }
        _ => FALLBACK_IMAGE_FORMAT.to_string(),
    }
}

/// Sender ids become a directory name: only ASCII alphanumerics, `_` and `-` are accepted.
fn validate_sender(sender_id: &str) -> Result<(), FetchError> {
    let usable = !sender_id.is_empty()
        && sender_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !usable {
        return Err(FetchError::InvalidSender(sender_id.to_string()));
    }
    Ok(())
}

/// Date/sender-scoped directory tree under a root.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{root}/{YYYYMMDD}/{sender_id}`
    pub fn dir_for(&self, date: NaiveDate, sender_id: &str) -> PathBuf {
        self.root
            .join(date.format("%Y%m%d").to_string())
            .join(sender_id)
    }

    /// Create `dir` recursively. Failures are logged only; the following write reports its own error.
    pub async fn ensure_dir(&self, dir: &Path) {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                log::warn!("creating image directory {}: {}", dir.display(), e);
            }
        }
    }

    /// Reserve a fresh path for today's images from `sender_id`, creating the directory.
    pub async fn allocate(&self, sender_id: &str, format: &str) -> Result<StoredImage, FetchError> {
        validate_sender(sender_id)?;
        let dir = self.dir_for(chrono::Local::now().date_naive(), sender_id);
        self.ensure_dir(&dir).await;
        let id = Uuid::new_v4();
        Ok(StoredImage {
            path: dir.join(format!("{}.{}", id, format)),
            id,
            format: format.to_string(),
        })
    }

    /// Stream a download response into `image.path`. The file is removed again on any failure
    /// after it was created.
    pub async fn write_response(
        &self,
        image: &StoredImage,
        res: reqwest::Response,
    ) -> Result<u64, FetchError> {
        let file = tokio::fs::File::create(&image.path)
            .await
            .map_err(|source| FetchError::Write {
                path: image.path.clone(),
                source,
            })?;
        match stream_to_file(file, res, &image.path).await {
            Ok(written) => Ok(written),
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&image.path).await {
                    log::warn!("removing partial image {}: {}", image.path.display(), rm);
                }
                Err(e)
            }
        }
    }
}

async fn stream_to_file(
    mut file: tokio::fs::File,
    res: reqwest::Response,
    path: &Path,
) -> Result<u64, FetchError> {
    let write_err = |source| FetchError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut written = 0u64;
    let mut stream = res.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    Ok(written)
}

/// Downloads inbound images from either platform into an [`ImageStore`].
#[derive(Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    store: ImageStore,
    whatsapp: WhatsAppChannel,
}

impl ImageFetcher {
    pub fn new(client: reqwest::Client, store: ImageStore, whatsapp: WhatsAppChannel) -> Self {
        Self {
            client,
            store,
            whatsapp,
        }
    }

    /// Resolve `image` to bytes and persist them. Messenger URLs are fetched directly; WhatsApp
    /// media ids go through a Graph API lookup first, both requests with the bearer token.
    pub async fn fetch(&self, sender_id: &str, image: &ImageRef) -> Result<StoredImage, FetchError> {
        match image {
            ImageRef::Messenger { url } => {
                let stored = self
                    .store
                    .allocate(sender_id, &image_format_from_url(url))
                    .await?;
                self.download(url, None, &stored).await?;
                Ok(stored)
            }
            ImageRef::WhatsApp { media_id } => {
                let stored = self.store.allocate(sender_id, WHATSAPP_IMAGE_FORMAT).await?;
                let url = self
                    .whatsapp
                    .media_url(media_id)
                    .await?
                    .ok_or_else(|| FetchError::NoMediaUrl(media_id.clone()))?;
                self.download(&url, self.whatsapp.access_token(), &stored)
                    .await?;
                Ok(stored)
            }
        }
    }

    async fn download(
        &self,
        url: &str,
        bearer: Option<&str>,
        stored: &StoredImage,
    ) -> Result<(), FetchError> {
        let mut req = self.client.get(url);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            return Err(FetchError::Status {
                status: res.status(),
            });
        }
        let bytes = self.store.write_response(stored, res).await?;
        log::info!("stored image {} ({} bytes)", stored.path.display(), bytes);
        Ok(())
    }
}
