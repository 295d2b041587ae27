use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use super::{
    loggable, preview, ImageGenerator, ProviderError, ProviderResult, RenderRequest, VisionReasoner,
};
use crate::{config::GeminiConfig, models::NormalizedImage};

/// Gemini `generateContent` client; serves as the vision reasoner and,
/// optionally, as an image-conditioned generator.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    reasoning_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            reasoning_model: config.reasoning_model.clone(),
            image_model: config.image_model.clone(),
        }
    }

    fn inline_part(image: &NormalizedImage) -> Value {
        json!({ "inlineData": { "mimeType": image.media_type(), "data": image.to_base64() } })
    }

    async fn perform_api_call(&self, model: &str, request_body: &Value) -> ProviderResult<GeminiResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        info!("🔗 Making request to: {}", url);
        info!("📤 Request body: {}", loggable(request_body));

        // The key travels in a header so it never shows up in URLs or error text.
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request_body)
            .send()
            .await?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await?;
        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(ProviderError::Status { status: status.as_u16(), body: response_text });
        }

        serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::Malformed(format!("parse error: {e}")))
    }
}

#[async_trait]
impl VisionReasoner for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn reason(&self, image: &NormalizedImage, instruction: &str) -> ProviderResult<String> {
        info!("🧠 Asking {} to analyze subject ({} bytes, {})", self.reasoning_model, image.len(), image.media_type());

        let request_body = json!({
            "contents": [{
                "parts": [Self::inline_part(image), {"text": instruction}]
            }],
            "generationConfig": {
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 40,
                "maxOutputTokens": 400
            }
        });

        let parsed = self.perform_api_call(&self.reasoning_model, &request_body).await?;
        let text = extract_text(&parsed);
        if text.is_empty() {
            return Err(ProviderError::Malformed("no text content found in response".into()));
        }
        info!("✅ Synthesized prompt ({} chars): {}", text.len(), preview(&text));
        Ok(text)
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    fn name(&self) -> &str {
        "gemini-image"
    }

    fn applies_mask(&self) -> bool {
        false
    }

    async fn generate(&self, request: RenderRequest<'_>) -> ProviderResult<Vec<String>> {
        let mut parts = Vec::new();
        if let Some(image) = request.image {
            parts.push(Self::inline_part(image));
        }
        parts.push(json!({ "text": request.prompt }));

        let request_body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 64,
                "candidateCount": 1
            }
        });

        let parsed = self.perform_api_call(&self.image_model, &request_body).await?;
        match extract_first_image(&parsed) {
            Some(data_uri) => {
                info!("🖼️ Extracted image from API response: {}", preview(&data_uri));
                Ok(vec![data_uri])
            }
            None => {
                info!("⚠️ No image data found in API response");
                Ok(Vec::new())
            }
        }
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
    #[allow(dead_code)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

fn extract_text(resp: &GeminiResponse) -> String {
    let texts: Vec<&str> = resp
        .candidates
        .iter()
        .take(1)
        .flat_map(|c| c.content.parts.iter())
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.trim()),
            _ => None,
        })
        .filter(|t| !t.is_empty())
        .collect();
    texts.join("\n").trim().to_string()
}

fn extract_first_image(resp: &GeminiResponse) -> Option<String> {
    resp.candidates
        .iter()
        .flat_map(|c| c.content.parts.iter())
        .find_map(|p| match p {
            Part::Inline { inline_data } if !inline_data.data.is_empty() => {
                Some(format!("data:{};base64,{}", inline_data.mime_type, inline_data.data))
            }
            _ => None,
        })
}
