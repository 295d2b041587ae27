//! Outbound provider roles and their HTTP bindings.
//!
//! Each role is an async trait so the pipeline can be driven by any backend:
//! [`Segmenter`] finds the editable body region, [`VisionReasoner`] turns a
//! photo plus instructions into text, and [`ImageGenerator`] renders the final
//! composite. The concrete clients live in the submodules.

pub mod doubao;
pub mod fal;
pub mod gemini;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{NormalizedImage, SubjectMask};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    TimedOut(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs may carry credentials.
        let err = err.without_url();
        if err.is_timeout() {
            ProviderError::TimedOut(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth_or_quota(&self) -> bool {
        match self {
            ProviderError::Status { status, body } => {
                if matches!(status, 401 | 402 | 403 | 429) {
                    return true;
                }
                let body = body.to_ascii_lowercase();
                ["quota", "billing", "insufficient", "exhausted balance", "api key not valid"]
                    .iter()
                    .any(|needle| body.contains(needle))
            }
            _ => false,
        }
    }

    pub fn is_payload_too_large(&self) -> bool {
        self.status() == Some(413)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::TimedOut(_)) || matches!(self.status(), Some(408 | 504))
    }
}

/// Finds the editable region of a subject photo from a natural-language selector.
#[async_trait]
pub trait Segmenter: Send + Sync {
    fn name(&self) -> &str;

    /// Returns zero or more mask references (URLs or data URIs).
    async fn segment(&self, image: &NormalizedImage, selector: &str) -> ProviderResult<Vec<String>>;
}

#[async_trait]
pub trait VisionReasoner: Send + Sync {
    fn name(&self) -> &str;

    async fn reason(&self, image: &NormalizedImage, instruction: &str) -> ProviderResult<String>;
}

/// Tunables for the generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub strength: f64,
    pub guidance_scale: f64,
    pub num_inference_steps: u32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self { strength: 0.85, guidance_scale: 7.5, num_inference_steps: 28 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub image: Option<&'a NormalizedImage>,
    pub mask: Option<&'a SubjectMask>,
    pub prompt: &'a str,
    pub params: RenderParams,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the provider restricts edits to a supplied mask.
    fn applies_mask(&self) -> bool {
        true
    }

    /// Returns one or more generated image references (URLs or data URIs).
    async fn generate(&self, request: RenderRequest<'_>) -> ProviderResult<Vec<String>>;
}

// --- Logging helpers ---

/// Truncate base64 payloads and data URIs in JSON for cleaner logging.
pub(crate) fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if let serde_json::Value::String(s) = val {
                    let looks_inline = s.starts_with("data:")
                        || (key == "data"
                            && s.chars().all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '='));
                    if s.len() > 100 && looks_inline {
                        *val = serde_json::Value::String(preview(s));
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

/// Short form of a long string (image refs, prompts) for log lines.
pub(crate) fn preview(s: &str) -> String {
    match s.char_indices().nth(50) {
        Some((cut, _)) => format!("{}...[{} chars total]", &s[..cut], s.len()),
        None => s.to_string(),
    }
}

pub(crate) fn loggable(body: &serde_json::Value) -> String {
    let mut body = body.clone();
    truncate_base64_in_json(&mut body);
    serde_json::to_string(&body).unwrap_or_default()
}

/// Collect image references from the common response shapes
/// (`images[]`, `image`, `url`, `masks[]`, `mask`, `output`).
pub(crate) fn extract_image_refs(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            let is_ref = trimmed.starts_with("http") || trimmed.starts_with("data:image/");
            if is_ref && !out.iter().any(|existing| existing == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        serde_json::Value::Array(rows) => {
            for row in rows {
                extract_image_refs(row, out);
            }
        }
        serde_json::Value::Object(obj) => {
            for key in ["images", "image", "url", "masks", "mask", "output"] {
                if let Some(v) = obj.get(key) {
                    extract_image_refs(v, out);
                }
            }
        }
        _ => {}
    }
}
