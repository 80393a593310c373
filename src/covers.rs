//! Cover art: fetch or read an image, validate it, resize it and store it
//! under the data directory. The resulting path is written back onto the
//! game record by the library service.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use image::{imageops::FilterType, ImageFormat};
use reqwest::{Client, Url};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CommandError, CommandResult, ErrorCode};

pub const COVER_WIDTH: u32 = 600;
pub const COVER_HEIGHT: u32 = 900;
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const COVERS_DIR_NAME: &str = "covers";

#[derive(Debug, Clone)]
pub struct CoverManager {
    dir: PathBuf,
    client: Client,
    max_bytes: usize,
}

impl CoverManager {
    pub fn new(data_dir: &Path, timeout: Duration) -> anyhow::Result<Self> {
        let dir = data_dir.join(COVERS_DIR_NAME);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for artwork")?;
        Ok(Self {
            dir,
            client,
            max_bytes: MAX_IMAGE_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub async fn from_file(&self, game_id: u64, source: &Path) -> CommandResult<PathBuf> {
        let invalid = |details: String| {
            CommandError::new(ErrorCode::ImageInvalid)
                .with_context("cover file")
                .with_details(details)
        };
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|err| invalid(format!("{}: {err}", source.display())))?;
        if !metadata.is_file() {
            return Err(invalid(format!("{} is not a file", source.display())));
        }
        if metadata.len() > self.max_bytes as u64 {
            return Err(invalid(format!("{} bytes exceeds the size limit", metadata.len())));
        }
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|err| invalid(format!("{}: {err}", source.display())))?;
        self.store(game_id, bytes).await
    }

    pub async fn from_url(&self, game_id: u64, url: &str) -> CommandResult<PathBuf> {
        let download_failed = |details: String| {
            CommandError::new(ErrorCode::ImageDownloadFail)
                .with_context("cover url")
                .with_details(details)
        };
        let url = Url::parse(url.trim()).map_err(|err| download_failed(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(download_failed(format!("unsupported scheme {}", url.scheme())));
        }

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    download_failed(format!("timed out fetching {url}"))
                } else {
                    download_failed(err.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(download_failed(format!("{url} returned {}", response.status())));
        }
        let too_large = || {
            CommandError::new(ErrorCode::ImageInvalid)
                .with_context("cover url")
                .with_details("image exceeds the size limit")
        };
        if response.content_length().unwrap_or(0) > self.max_bytes as u64 {
            return Err(too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| download_failed(err.to_string()))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        self.store(game_id, bytes).await
    }

    async fn store(&self, game_id: u64, bytes: Vec<u8>) -> CommandResult<PathBuf> {
        let target = self
            .dir
            .join(format!("game-{game_id}-{}.png", Uuid::new_v4().simple()));
        let output = target.clone();
        tokio::task::spawn_blocking(move || render_cover(&bytes, &output))
            .await
            .map_err(|err| CommandError::new(ErrorCode::Unknown).with_details(err))??;
        debug!(game_id, path = %target.display(), "Stored cover art");
        Ok(target)
    }

    /// Deletes a cover file, but only one this manager created.
    pub fn remove(&self, path: &str) {
        let path = Path::new(path);
        if !self.owns(path) {
            return;
        }
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove cover {}: {err}", path.display());
            }
        }
    }

    pub fn owns(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path())
    }
}

/// Decodes, resizes to the fixed cover size and writes a PNG.
pub fn render_cover(bytes: &[u8], target: &Path) -> CommandResult<()> {
    let image = image::load_from_memory(bytes).map_err(|err| {
        CommandError::new(ErrorCode::ImageInvalid)
            .with_context("decode")
            .with_details(err)
    })?;
    let resized = image.resize_to_fill(COVER_WIDTH, COVER_HEIGHT, FilterType::Lanczos3);
    let mut encoded = Cursor::new(Vec::new());
    resized
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|err| CommandError::new(ErrorCode::Unknown).with_context("encode").with_details(err))?;
    std::fs::write(target, encoded.into_inner())
        .map_err(|err| CommandError::new(ErrorCode::Unknown).with_context("write").with_details(err))
}
