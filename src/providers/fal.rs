use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::{
    extract_image_refs, loggable, preview, ImageGenerator, ProviderError, ProviderResult,
    RenderRequest, Segmenter,
};
use crate::models::NormalizedImage;

/// Thin client for fal.ai's synchronous `https://fal.run/<endpoint>` API.
pub struct FalClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FalClient {
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn run(&self, endpoint: &str, payload: &Value) -> ProviderResult<Value> {
        let url = self.endpoint_url(endpoint);
        info!("🔗 Making request to: {}", url);
        info!("📤 Request body: {}", loggable(payload));

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Key {}", self.api_key))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response.text().await?;
        if !status.is_success() {
            error!("❌ fal error response ({}): {}", endpoint, response_text);
            return Err(ProviderError::Status { status: status.as_u16(), body: response_text });
        }
        serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::Malformed(format!("parse error: {e}")))
    }
}

/// Text-prompted segmentation endpoint (e.g. `fal-ai/evf-sam`).
pub struct FalSegmenter {
    fal: Arc<FalClient>,
    endpoint: String,
    selector_field: String,
    options: Map<String, Value>,
}

impl FalSegmenter {
    pub fn new(fal: Arc<FalClient>, endpoint: impl Into<String>, selector_field: impl Into<String>) -> Self {
        Self { fal, endpoint: endpoint.into(), selector_field: selector_field.into(), options: Map::new() }
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    fn payload(&self, image: &NormalizedImage, selector: &str) -> Value {
        let mut payload = Map::new();
        payload.insert("image_url".into(), Value::String(image.to_data_uri()));
        payload.insert(self.selector_field.clone(), Value::String(selector.to_string()));
        for (key, value) in &self.options {
            payload.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(payload)
    }
}

#[async_trait]
impl Segmenter for FalSegmenter {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn segment(&self, image: &NormalizedImage, selector: &str) -> ProviderResult<Vec<String>> {
        let response = self.fal.run(&self.endpoint, &self.payload(image, selector)).await?;
        let mut masks = Vec::new();
        extract_image_refs(&response, &mut masks);
        info!("🎭 {} returned {} mask(s)", self.endpoint, masks.len());
        Ok(masks)
    }
}

/// Masked inpainting endpoint (e.g. `fal-ai/flux-lora/inpainting`).
pub struct FalInpainter {
    fal: Arc<FalClient>,
    endpoint: String,
}

impl FalInpainter {
    pub fn new(fal: Arc<FalClient>, endpoint: impl Into<String>) -> Self {
        Self { fal, endpoint: endpoint.into() }
    }

    fn payload(request: &RenderRequest<'_>) -> ProviderResult<Value> {
        let image = request
            .image
            .ok_or_else(|| ProviderError::Malformed("fal inpainting requires a subject image".into()))?;
        let mut payload = json!({
            "prompt": request.prompt,
            "image_url": image.to_data_uri(),
            "strength": request.params.strength,
            "guidance_scale": request.params.guidance_scale,
            "num_inference_steps": request.params.num_inference_steps,
            "num_images": 1,
            "enable_safety_checker": true,
            "output_format": "png"
        });
        if let (Some(mask), Value::Object(map)) = (request.mask, &mut payload) {
            map.insert("mask_url".into(), Value::String(mask.mask_ref().to_string()));
        }
        Ok(payload)
    }
}

#[async_trait]
impl ImageGenerator for FalInpainter {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn generate(&self, request: RenderRequest<'_>) -> ProviderResult<Vec<String>> {
        let payload = Self::payload(&request)?;
        let response = self.fal.run(&self.endpoint, &payload).await?;
        let mut images = Vec::new();
        if let Some(rows) = response.get("images") {
            extract_image_refs(rows, &mut images);
        }
        if images.is_empty() {
            extract_image_refs(&response, &mut images);
        }
        if let Some(first) = images.first() {
            info!("🖼️ {} produced: {}", self.endpoint, preview(first));
        }
        Ok(images)
    }
}
