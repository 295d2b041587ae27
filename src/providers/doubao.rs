use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::{loggable, preview, ImageGenerator, ProviderError, ProviderResult, RenderRequest};
use crate::config::ArkConfig;

/// Volcengine Ark (Doubao Seedream) text-to-image client.
///
/// Prompt-only: the subject image and mask are never sent, so the result
/// carries no identity-preservation guarantee.
pub struct ArkClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ArkClient {
    pub fn new(config: &ArkConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArkResponse {
    #[serde(default)]
    data: Vec<ArkImage>,
    #[serde(default)]
    error: Option<ArkError>,
}

#[derive(Debug, Deserialize)]
struct ArkImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArkError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

fn image_refs(resp: ArkResponse) -> ProviderResult<Vec<String>> {
    if let Some(err) = resp.error {
        return Err(ProviderError::Malformed(format!(
            "{}: {}",
            err.code.unwrap_or_else(|| "error".into()),
            err.message
        )));
    }
    Ok(resp
        .data
        .into_iter()
        .filter_map(|img| match (img.url, img.b64_json) {
            (Some(url), _) if !url.is_empty() => Some(url),
            (_, Some(b64)) if !b64.is_empty() => Some(format!("data:image/jpeg;base64,{b64}")),
            _ => None,
        })
        .collect())
}

#[async_trait]
impl ImageGenerator for ArkClient {
    fn name(&self) -> &str {
        "doubao-seedream"
    }

    async fn generate(&self, request: RenderRequest<'_>) -> ProviderResult<Vec<String>> {
        if request.mask.is_some() {
            warn!("⚠️ Seedream text-to-image ignores the subject mask");
        }
        let url = format!("{}/images/generations", self.base_url);
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "response_format": "url",
            "size": "1024x1024",
            "guidance_scale": request.params.guidance_scale,
            "watermark": false
        });
        info!("🔗 Making request to: {}", url);
        info!("📤 Request body: {}", loggable(&payload));

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response.text().await?;
        if !status.is_success() {
            error!("❌ Ark error response: {}", response_text);
            return Err(ProviderError::Status { status: status.as_u16(), body: response_text });
        }

        let parsed: ArkResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::Malformed(format!("parse error: {e}")))?;
        let refs = image_refs(parsed)?;
        if let Some(first) = refs.first() {
            info!("🖼️ Seedream produced: {}", preview(first));
        }
        Ok(refs)
    }
}
