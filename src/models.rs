use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::{
    error::FittingError,
    pipeline::Stage,
    router::{Engine, StrategyKind},
};

pub const DEFAULT_STYLE_HINT: &str = "plain neutral studio backdrop";

/// Where the pet photo comes from: a fetchable URI or an inline `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageSource {
    Uri(String),
    Inline(String),
}

impl ImageSource {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("data:") {
            ImageSource::Inline(trimmed.to_string())
        } else {
            ImageSource::Uri(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageSource::Uri(s) | ImageSource::Inline(s) => s,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ImageSource::Inline(_))
    }
}

impl From<String> for ImageSource {
    fn from(raw: String) -> Self {
        ImageSource::parse(&raw)
    }
}

impl From<ImageSource> for String {
    fn from(source: ImageSource) -> Self {
        match source {
            ImageSource::Uri(s) | ImageSource::Inline(s) => s,
        }
    }
}

/// Immutable input to one pipeline run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    engine: Engine,
    subject_image: ImageSource,
    garment_description: String,
    style_hint: String,
}

impl GenerationRequest {
    pub fn new(
        engine: Engine,
        subject_image: ImageSource,
        garment_description: &str,
        style_hint: Option<&str>,
    ) -> Result<Self, FittingError> {
        let garment_description = garment_description.trim();
        if garment_description.is_empty() {
            return Err(FittingError::InvalidRequest("garment description is empty".into()));
        }
        if subject_image.as_str().is_empty() {
            return Err(FittingError::InvalidRequest("no subject image supplied".into()));
        }
        let style_hint = style_hint
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STYLE_HINT);
        Ok(Self {
            engine,
            subject_image,
            garment_description: garment_description.to_string(),
            style_hint: style_hint.to_string(),
        })
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn subject_image(&self) -> &ImageSource {
        &self.subject_image
    }

    pub fn garment_description(&self) -> &str {
        &self.garment_description
    }

    pub fn style_hint(&self) -> &str {
        &self.style_hint
    }
}

/// Canonical in-memory image payload shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    bytes: Bytes,
    media_type: String,
}

impl NormalizedImage {
    pub fn new(bytes: Bytes, media_type: impl Into<String>) -> Self {
        Self { bytes, media_type: media_type.into() }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.to_base64())
    }
}

/// Mask marking the editable (body/garment) region of the subject.
///
/// Only the segmentation stage can build one, so a mask always comes from a
/// successful segmentation call in the same run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMask {
    mask_ref: String,
    provider: String,
}

impl SubjectMask {
    pub(crate) fn new(mask_ref: String, provider: &str) -> Self {
        Self { mask_ref, provider: provider.to_string() }
    }

    pub fn mask_ref(&self) -> &str {
        &self.mask_ref
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPrompt(String);

impl RenderPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub label: &'static str,
    pub elapsed_ms: u64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub request_id: Uuid,
    pub image_ref: String,
    pub engine: Engine,
    pub strategy: StrategyKind,
    /// `false` when the image was generated without a mask, so the pet's
    /// identity is not guaranteed to be preserved.
    pub masked: bool,
    pub mask_ref: Option<String>,
    pub prompt: String,
    pub stages: Vec<StageTiming>,
    pub completed_at: DateTime<Utc>,
}

// --- HTTP payloads ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FittingRequest {
    pub engine: String,
    pub subject_image: String,
    pub garment_description: String,
    #[serde(default)]
    pub style_hint: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FittingResponse {
    #[serde(flatten)]
    pub result: GenerationResult,
    pub progress: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub engine: Engine,
    pub strategy: StrategyKind,
    pub preserves_identity: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    pub guidance: String,
    pub retryable: bool,
}
