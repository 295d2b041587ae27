use std::{io::Cursor, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use image::{ImageFormat, ImageReader};
use reqwest::{header::CONTENT_TYPE, Client};
use tracing::info;

use crate::{
    error::FittingError,
    models::{ImageSource, NormalizedImage},
    pipeline::Stage,
    providers::{ProviderError, ProviderResult},
};

const ACCEPTED_FORMATS: [ImageFormat; 4] =
    [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP, ImageFormat::Gif];

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Network read of a remote subject photo.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> ProviderResult<FetchedImage>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, uri: &str) -> ProviderResult<FetchedImage> {
        let response = self.client.get(uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status: status.as_u16(), body });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok(FetchedImage { bytes, content_type })
    }
}

/// Converts any accepted [`ImageSource`] into a validated [`NormalizedImage`].
pub struct ImageNormalizer {
    fetcher: Arc<dyn ImageFetcher>,
}

impl ImageNormalizer {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn normalize(
        &self,
        source: &ImageSource,
        deadline: Duration,
    ) -> Result<NormalizedImage, FittingError> {
        match source {
            ImageSource::Inline(data_uri) => normalize_inline(data_uri),
            ImageSource::Uri(uri) => {
                info!("📥 Fetching subject image: {}", uri);
                let fetched = tokio::time::timeout(deadline, self.fetcher.fetch(uri))
                    .await
                    .map_err(|_| FittingError::Timeout { stage: Stage::Normalizing, after: deadline })?
                    .map_err(|e| match e {
                        ProviderError::TimedOut(_) => {
                            FittingError::Timeout { stage: Stage::Normalizing, after: deadline }
                        }
                        other => FittingError::ImageUnreadable(format!("fetch {uri} failed: {other}")),
                    })?;
                let declared = fetched
                    .content_type
                    .as_deref()
                    .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());
                finish(fetched.bytes, declared)
            }
        }
    }
}

/// Decode a `data:<media>;base64,<payload>` URI without touching the network.
pub fn normalize_inline(data_uri: &str) -> Result<NormalizedImage, FittingError> {
    let (meta, payload) = data_uri
        .trim()
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| FittingError::ImageUnreadable("malformed data URI".into()))?;
    let mut params = meta.split(';');
    let declared = params
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return Err(FittingError::ImageUnreadable("data URI is not base64-encoded".into()));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim().as_bytes())
        .map_err(|e| FittingError::ImageUnreadable(format!("invalid base64 payload: {e}")))?;
    finish(Bytes::from(bytes), declared)
}

fn finish(bytes: Bytes, declared: Option<String>) -> Result<NormalizedImage, FittingError> {
    let format = validate(&bytes)?;
    // Non-image declarations (octet-stream, text/plain) give way to the sniffed type.
    let media_type = declared
        .filter(|m| m.starts_with("image/"))
        .unwrap_or_else(|| format.to_mime_type().to_string());
    info!("🖼️ Normalized subject image: {} bytes, {}", bytes.len(), media_type);
    Ok(NormalizedImage::new(bytes, media_type))
}

/// The payload must carry a supported signature and a parsable header.
fn validate(bytes: &[u8]) -> Result<ImageFormat, FittingError> {
    if bytes.is_empty() {
        return Err(FittingError::ImageUnreadable("empty image payload".into()));
    }
    let format = image::guess_format(bytes)
        .map_err(|_| FittingError::ImageUnreadable("unrecognised image format".into()))?;
    if !ACCEPTED_FORMATS.contains(&format) {
        return Err(FittingError::ImageUnreadable(format!("unsupported image format {format:?}")));
    }
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| FittingError::ImageUnreadable(format!("corrupt image stream: {e}")))?;
    if width == 0 || height == 0 {
        return Err(FittingError::ImageUnreadable("image has no pixels".into()));
    }
    Ok(format)
}
