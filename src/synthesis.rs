use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    error::{FittingError, SynthesisCause},
    models::{NormalizedImage, RenderPrompt},
    pipeline::Stage,
    providers::VisionReasoner,
};

pub fn synthesis_instruction(garment_description: &str, style_hint: &str) -> String {
    format!(
        "You are preparing an inpainting prompt for a pet fashion photo.\n\
         1. Look at the pet in the image and identify its breed, fur color, fur length and texture.\n\
         2. Write ONE concise rendering instruction (max 80 words) describing this exact pet wearing: {garment_description}. \
         Describe how the garment fits the pet's body and how the fur meets the fabric.\n\
         3. State explicitly that the pet's head, face, eyes, ears and identity must remain unchanged; only the body area may change.\n\
         4. Ask for a {style_hint}, realistic lighting and high-end product photography.\n\
         Reply with the rendering instruction only, no preamble, no lists."
    )
}

/// Vision-reasoning step used by the vision-guided strategy only.
pub struct SynthesisStage {
    reasoner: Arc<dyn VisionReasoner>,
}

impl SynthesisStage {
    pub fn new(reasoner: Arc<dyn VisionReasoner>) -> Self {
        Self { reasoner }
    }

    pub async fn synthesize(
        &self,
        image: &NormalizedImage,
        garment_description: &str,
        style_hint: &str,
        deadline: Duration,
    ) -> Result<RenderPrompt, FittingError> {
        let instruction = synthesis_instruction(garment_description, style_hint);
        info!("🎯 Synthesizing render prompt with {} for: {}", self.reasoner.name(), garment_description);

        let text = tokio::time::timeout(deadline, self.reasoner.reason(image, &instruction))
            .await
            .map_err(|_| FittingError::Timeout { stage: Stage::Synthesizing, after: deadline })?
            .map_err(|e| FittingError::synthesis(e, deadline))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(FittingError::PromptSynthesisFailed {
                cause: SynthesisCause::Transient,
                detail: format!("{} returned an empty response", self.reasoner.name()),
            });
        }
        Ok(RenderPrompt::new(text))
    }
}
