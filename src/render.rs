use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    error::{FittingError, RenderCause},
    models::{NormalizedImage, RenderPrompt, SubjectMask},
    pipeline::Stage,
    providers::{ImageGenerator, RenderParams, RenderRequest},
};

/// What the render stage hands back to the controller.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub image_ref: String,
    pub mask_ref: Option<String>,
    pub prompt: String,
}

pub struct RenderStage {
    generator: Arc<dyn ImageGenerator>,
    params: RenderParams,
}

impl RenderStage {
    pub fn new(generator: Arc<dyn ImageGenerator>, params: RenderParams) -> Self {
        Self { generator, params }
    }

    pub fn provider(&self) -> &str {
        self.generator.name()
    }

    /// With a mask only the masked pixels may change. Without one the provider
    /// generates freely and the pet's identity is not preserved.
    pub async fn render(
        &self,
        image: Option<&NormalizedImage>,
        mask: Option<&SubjectMask>,
        prompt: &RenderPrompt,
        deadline: Duration,
    ) -> Result<Rendered, FittingError> {
        if mask.is_some() && !self.generator.applies_mask() {
            warn!("⚠️ {} cannot apply the subject mask; rendering from the photo alone", self.generator.name());
        }
        let mask = mask.filter(|_| self.generator.applies_mask());
        if mask.is_none() {
            warn!("⚠️ Rendering without a mask via {}; identity is not preserved", self.generator.name());
        }
        let request = RenderRequest { image, mask, prompt: prompt.as_str(), params: self.params };
        info!("🎨 Rendering with {} (masked: {})", self.generator.name(), mask.is_some());

        let refs = tokio::time::timeout(deadline, self.generator.generate(request))
            .await
            .map_err(|_| FittingError::Timeout { stage: Stage::Rendering, after: deadline })?
            .map_err(|e| FittingError::render(e, deadline))?;

        let image_ref = refs
            .into_iter()
            .map(|r| r.trim().to_string())
            .find(|r| !r.is_empty())
            .ok_or_else(|| FittingError::RenderFailed {
                cause: RenderCause::Malformed,
                detail: format!("{} returned no image", self.generator.name()),
            })?;

        Ok(Rendered {
            image_ref,
            mask_ref: mask.map(|m| m.mask_ref().to_string()),
            prompt: prompt.as_str().to_string(),
        })
    }
}
