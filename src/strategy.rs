use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::FittingError,
    models::{GenerationRequest, RenderPrompt},
    normalizer::ImageNormalizer,
    pipeline::{PipelineRun, Stage},
    render::{RenderStage, Rendered},
    router::StrategyKind,
    segmentation::SegmentationStage,
    synthesis::SynthesisStage,
};

/// A fixed sequence of stages bound to one engine.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(
        &self,
        run: &mut PipelineRun<'_>,
        request: &GenerationRequest,
    ) -> Result<Rendered, FittingError>;
}

/// Prompt for providers that cannot edit the photo.
pub fn caption_prompt(garment_description: &str, style_hint: &str) -> String {
    format!(
        "Pet fashion, a cute pet wearing {garment_description}, {style_hint}, studio lighting, \
         high-end photography, realistic texture, perfect fit, 8k"
    )
}

/// Prompt for masked inpainting without the reasoning step.
pub fn fast_inpaint_prompt(garment_description: &str, style_hint: &str) -> String {
    format!(
        "The pet wearing {garment_description}, perfect fit, realistic fabric and fur texture, \
         {style_hint}, studio lighting"
    )
}

pub struct DirectCaption {
    normalizer: Arc<ImageNormalizer>,
    render: Arc<RenderStage>,
}

impl DirectCaption {
    pub fn new(normalizer: Arc<ImageNormalizer>, render: Arc<RenderStage>) -> Self {
        Self { normalizer, render }
    }
}

#[async_trait]
impl Strategy for DirectCaption {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectCaption
    }

    async fn execute(
        &self,
        run: &mut PipelineRun<'_>,
        request: &GenerationRequest,
    ) -> Result<Rendered, FittingError> {
        // The photo is only validated here; text-to-image never sees it.
        run.enter(Stage::Normalizing);
        self.normalizer.normalize(request.subject_image(), run.deadline()).await?;

        run.enter(Stage::Rendering);
        let prompt = RenderPrompt::new(caption_prompt(request.garment_description(), request.style_hint()));
        self.render.render(None, None, &prompt, run.deadline()).await
    }
}

pub struct VisionGuidedInpaint {
    normalizer: Arc<ImageNormalizer>,
    segmentation: Arc<SegmentationStage>,
    synthesis: SynthesisStage,
    render: Arc<RenderStage>,
}

impl VisionGuidedInpaint {
    pub fn new(
        normalizer: Arc<ImageNormalizer>,
        segmentation: Arc<SegmentationStage>,
        synthesis: SynthesisStage,
        render: Arc<RenderStage>,
    ) -> Self {
        Self { normalizer, segmentation, synthesis, render }
    }
}

#[async_trait]
impl Strategy for VisionGuidedInpaint {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VisionGuidedInpaint
    }

    async fn execute(
        &self,
        run: &mut PipelineRun<'_>,
        request: &GenerationRequest,
    ) -> Result<Rendered, FittingError> {
        run.enter(Stage::Normalizing);
        let image = self.normalizer.normalize(request.subject_image(), run.deadline()).await?;

        run.enter(Stage::Segmenting);
        let mask = self.segmentation.segment(&image, run.deadline()).await?;

        run.enter(Stage::Synthesizing);
        let prompt = self
            .synthesis
            .synthesize(&image, request.garment_description(), request.style_hint(), run.deadline())
            .await?;

        run.enter(Stage::Rendering);
        self.render.render(Some(&image), Some(&mask), &prompt, run.deadline()).await
    }
}

pub struct FastInpaint {
    normalizer: Arc<ImageNormalizer>,
    segmentation: Arc<SegmentationStage>,
    render: Arc<RenderStage>,
}

impl FastInpaint {
    pub fn new(
        normalizer: Arc<ImageNormalizer>,
        segmentation: Arc<SegmentationStage>,
        render: Arc<RenderStage>,
    ) -> Self {
        Self { normalizer, segmentation, render }
    }
}

#[async_trait]
impl Strategy for FastInpaint {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FastInpaint
    }

    async fn execute(
        &self,
        run: &mut PipelineRun<'_>,
        request: &GenerationRequest,
    ) -> Result<Rendered, FittingError> {
        run.enter(Stage::Normalizing);
        let image = self.normalizer.normalize(request.subject_image(), run.deadline()).await?;

        run.enter(Stage::Segmenting);
        let mask = self.segmentation.segment(&image, run.deadline()).await?;

        run.enter(Stage::Rendering);
        let prompt =
            RenderPrompt::new(fast_inpaint_prompt(request.garment_description(), request.style_hint()));
        self.render.render(Some(&image), Some(&mask), &prompt, run.deadline()).await
    }
}
