//! Pipeline controller: owns the per-request state machine, emits progress
//! at every real stage transition and turns a strategy's outcome into one
//! [`GenerationResult`] or one [`FittingError`].

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    config::{Config, VisionRenderer},
    error::{ErrorKind, FittingError},
    models::{EngineInfo, GenerationRequest, GenerationResult, ImageSource, StageTiming},
    normalizer::{HttpFetcher, ImageNormalizer},
    providers::{
        doubao::ArkClient,
        fal::{FalClient, FalInpainter, FalSegmenter},
        gemini::GeminiClient,
        preview, RenderParams, VisionReasoner,
    },
    render::RenderStage,
    router::{Engine, EngineRouter},
    segmentation::SegmentationStage,
    strategy::{DirectCaption, FastInpaint, Strategy, VisionGuidedInpaint},
    synthesis::SynthesisStage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalizing,
    Segmenting,
    Synthesizing,
    Rendering,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Normalizing => "preparing photo",
            Stage::Segmenting => "isolating body region",
            Stage::Synthesizing => "analyzing subject",
            Stage::Rendering => "rendering",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Normalizing => "normalizing",
            Stage::Segmenting => "segmenting",
            Stage::Synthesizing => "synthesizing",
            Stage::Rendering => "rendering",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Normalizing,
    Segmenting,
    Synthesizing,
    Rendering,
    Succeeded,
    Failed(ErrorKind),
}

impl PipelineState {
    fn rank(&self) -> u8 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Normalizing => 1,
            PipelineState::Segmenting => 2,
            PipelineState::Synthesizing => 3,
            PipelineState::Rendering => 4,
            PipelineState::Succeeded | PipelineState::Failed(_) => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed(_))
    }

    /// Forward-only; `Failed` is reachable from any non-terminal state.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PipelineState::Failed(_) => true,
            PipelineState::Idle => false,
            PipelineState::Succeeded => *self == PipelineState::Rendering,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "waiting",
            PipelineState::Normalizing => Stage::Normalizing.label(),
            PipelineState::Segmenting => Stage::Segmenting.label(),
            PipelineState::Synthesizing => Stage::Synthesizing.label(),
            PipelineState::Rendering => Stage::Rendering.label(),
            PipelineState::Succeeded => "done",
            PipelineState::Failed(_) => "failed",
        }
    }
}

impl From<Stage> for PipelineState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Normalizing => PipelineState::Normalizing,
            Stage::Segmenting => PipelineState::Segmenting,
            Stage::Synthesizing => PipelineState::Synthesizing,
            Stage::Rendering => PipelineState::Rendering,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub request_id: Uuid,
    pub state: PipelineState,
    pub label: &'static str,
    pub elapsed_ms: u64,
}

/// Receives progress synchronously at each state transition. Labels are advisory.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Collects events for replay, e.g. into an HTTP response.
#[derive(Default)]
pub struct ProgressLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressLog {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.label.to_string()).collect()
    }

    pub fn states(&self) -> Vec<PipelineState> {
        self.events.lock().iter().map(|e| e.state).collect()
    }
}

impl ProgressObserver for ProgressLog {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}

/// State of one generation request. Never shared between requests.
pub struct PipelineRun<'a> {
    request_id: Uuid,
    state: PipelineState,
    started: Instant,
    current: Option<(Stage, Instant)>,
    timings: Vec<StageTiming>,
    stage_timeout: Duration,
    observer: &'a dyn ProgressObserver,
}

impl<'a> PipelineRun<'a> {
    pub fn new(observer: &'a dyn ProgressObserver, stage_timeout: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            state: PipelineState::Idle,
            started: Instant::now(),
            current: None,
            timings: Vec::new(),
            stage_timeout,
            observer,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Bounded wait applied to every provider call in this run.
    pub fn deadline(&self) -> Duration {
        self.stage_timeout
    }

    pub fn enter(&mut self, stage: Stage) {
        self.close_stage();
        self.current = Some((stage, Instant::now()));
        self.transition(stage.into());
    }

    pub(crate) fn succeed(&mut self) -> Vec<StageTiming> {
        self.close_stage();
        self.transition(PipelineState::Succeeded);
        std::mem::take(&mut self.timings)
    }

    pub(crate) fn fail(&mut self, kind: ErrorKind) {
        self.close_stage();
        self.transition(PipelineState::Failed(kind));
    }

    fn close_stage(&mut self) {
        if let Some((stage, since)) = self.current.take() {
            self.timings.push(StageTiming {
                stage,
                label: stage.label(),
                elapsed_ms: since.elapsed().as_millis() as u64,
            });
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        if !self.state.can_advance_to(next) {
            error!("❌ [{}] ignoring illegal transition {:?} -> {:?}", self.request_id, self.state, next);
            return;
        }
        self.state = next;
        let event = ProgressEvent {
            request_id: self.request_id,
            state: next,
            label: next.label(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        info!("⏳ [{}] {}", self.request_id, event.label);
        self.observer.on_progress(&event);
    }
}

/// Render stage for the vision-guided engine: fal inpainting unless Gemini is selected.
fn vision_render_stage(
    renderer: VisionRenderer,
    gemini: Arc<GeminiClient>,
    inpaint: &Arc<RenderStage>,
    params: RenderParams,
) -> Arc<RenderStage> {
    match renderer {
        VisionRenderer::FalInpaint => Arc::clone(inpaint),
        VisionRenderer::Gemini => {
            info!("🎨 Vision-guided engine renders with Gemini");
            Arc::new(RenderStage::new(gemini, params))
        }
    }
}

/// Entry point for the UI: routes the engine and runs its strategy.
pub struct FittingService {
    router: EngineRouter,
    stage_timeout: Duration,
}

impl FittingService {
    pub fn new(router: EngineRouter, stage_timeout: Duration) -> Self {
        Self { router, stage_timeout }
    }

    /// Wire the HTTP provider clients for every engine whose credentials are present.
    pub fn from_config(config: &Config) -> Self {
        let normalizer = Arc::new(ImageNormalizer::new(Arc::new(HttpFetcher::new())));
        let mut router = EngineRouter::new();

        let fal_stages = config.fal.as_ref().map(|fal_cfg| {
            let fal = Arc::new(FalClient::new(fal_cfg.api_key.clone(), &fal_cfg.base_url));
            let segmentation = Arc::new(SegmentationStage::new(
                Arc::new(
                    FalSegmenter::new(Arc::clone(&fal), fal_cfg.primary_segmenter.clone(), "prompt")
                        .with_option("mask_only", serde_json::Value::Bool(true)),
                ),
                Arc::new(FalSegmenter::new(
                    Arc::clone(&fal),
                    fal_cfg.fallback_segmenter.clone(),
                    "text_input",
                )),
            ));
            let inpaint = Arc::new(RenderStage::new(
                Arc::new(FalInpainter::new(fal, fal_cfg.inpaint_endpoint.clone())),
                config.render,
            ));
            (segmentation, inpaint)
        });

        for engine in Engine::ALL {
            if let Some(variable) = config.missing_for(engine) {
                router.mark_unconfigured(engine, variable);
                continue;
            }
            let strategy: Option<Arc<dyn Strategy>> = match (engine, &fal_stages) {
                (Engine::Gemini, Some((segmentation, inpaint))) => config.gemini.as_ref().map(|g| {
                    let gemini = Arc::new(GeminiClient::new(g));
                    Arc::new(VisionGuidedInpaint::new(
                        Arc::clone(&normalizer),
                        Arc::clone(segmentation),
                        SynthesisStage::new(Arc::clone(&gemini) as Arc<dyn VisionReasoner>),
                        vision_render_stage(g.renderer, gemini, inpaint, config.render),
                    )) as Arc<dyn Strategy>
                }),
                (Engine::Fal, Some((segmentation, inpaint))) => Some(Arc::new(FastInpaint::new(
                    Arc::clone(&normalizer),
                    Arc::clone(segmentation),
                    Arc::clone(inpaint),
                )) as Arc<dyn Strategy>),
                (Engine::Doubao, _) => config.ark.as_ref().map(|ark| {
                    Arc::new(DirectCaption::new(
                        Arc::clone(&normalizer),
                        Arc::new(RenderStage::new(Arc::new(ArkClient::new(ark)), config.render)),
                    )) as Arc<dyn Strategy>
                }),
                _ => None,
            };
            match strategy {
                Some(strategy) => router.register(engine, strategy),
                None => router.mark_unconfigured(engine, "provider credentials"),
            }
        }

        Self::new(router, config.stage_timeout)
    }

    pub fn offered_engines(&self) -> Vec<EngineInfo> {
        self.router
            .offered()
            .into_iter()
            .map(|engine| EngineInfo {
                engine,
                strategy: engine.strategy(),
                preserves_identity: engine.strategy().preserves_identity(),
            })
            .collect()
    }

    pub async fn generate(
        &self,
        engine_id: &str,
        subject_image: &str,
        garment_description: &str,
        style_hint: Option<&str>,
        observer: &dyn ProgressObserver,
    ) -> Result<GenerationResult, FittingError> {
        // Nothing below may run for an unknown or unconfigured engine.
        let (engine, strategy) = self.router.resolve(engine_id).map_err(|e| {
            error!("❌ Rejected engine '{}': {}", engine_id, e);
            e
        })?;
        let request = GenerationRequest::new(
            engine,
            ImageSource::parse(subject_image),
            garment_description,
            style_hint,
        )?;
        self.run(request, strategy.as_ref(), observer).await
    }

    pub async fn run(
        &self,
        request: GenerationRequest,
        strategy: &dyn Strategy,
        observer: &dyn ProgressObserver,
    ) -> Result<GenerationResult, FittingError> {
        let mut run = PipelineRun::new(observer, self.stage_timeout);
        let request_id = run.request_id();
        info!(
            "🚀 [{}] Generating fitting via {} ({}) for garment: {}",
            request_id,
            request.engine(),
            strategy.kind().as_str(),
            request.garment_description()
        );

        match strategy.execute(&mut run, &request).await {
            Ok(rendered) => {
                let stages = run.succeed();
                info!("✅ [{}] Fitting ready: {}", request_id, preview(&rendered.image_ref));
                Ok(GenerationResult {
                    request_id,
                    image_ref: rendered.image_ref,
                    engine: request.engine(),
                    strategy: strategy.kind(),
                    masked: rendered.mask_ref.is_some(),
                    mask_ref: rendered.mask_ref,
                    prompt: rendered.prompt,
                    stages,
                    completed_at: Utc::now(),
                })
            }
            Err(e) => {
                error!("❌ [{}] Fitting failed during {:?}: {}", request_id, run.state(), e);
                run.fail(e.kind());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn transitions_only_move_forward() {
        use PipelineState::*;
        assert!(Idle.can_advance_to(Normalizing));
        assert!(Normalizing.can_advance_to(Rendering));
        assert!(!Rendering.can_advance_to(Segmenting));
        assert!(!Segmenting.can_advance_to(Succeeded));
        assert!(Segmenting.can_advance_to(Failed(ErrorKind::SegmentationFailed)));
        assert!(!Succeeded.can_advance_to(Failed(ErrorKind::Timeout)));
        assert!(!Failed(ErrorKind::Timeout).can_advance_to(Rendering));
    }

    #[test]
    fn run_emits_one_event_per_transition() {
        let log = ProgressLog::default();
        let mut run = PipelineRun::new(&log, Duration::from_secs(5));
        run.enter(Stage::Normalizing);
        run.enter(Stage::Segmenting);
        run.enter(Stage::Rendering);
        let timings = run.succeed();

        assert_eq!(
            log.labels(),
            vec!["preparing photo", "isolating body region", "rendering", "done"]
        );
        assert_eq!(
            timings.iter().map(|t| t.stage).collect::<Vec<_>>(),
            vec![Stage::Normalizing, Stage::Segmenting, Stage::Rendering]
        );
        assert!(log.events().iter().all(|e| e.request_id == run.request_id()));
    }

    #[test]
    fn failure_is_terminal() {
        let log = ProgressLog::default();
        let mut run = PipelineRun::new(&log, Duration::from_secs(5));
        run.enter(Stage::Normalizing);
        run.fail(ErrorKind::ImageUnreadable);
        assert_eq!(run.state(), PipelineState::Failed(ErrorKind::ImageUnreadable));
        assert_eq!(log.labels(), vec!["preparing photo", "failed"]);
    }

    #[test]
    fn service_without_credentials_offers_nothing() {
        let config = Config::from_lookup(|_| None);
        let service = FittingService::from_config(&config);
        assert!(service.offered_engines().is_empty());
    }

    #[test]
    fn service_offers_only_configured_engines() {
        let config = Config::from_lookup(|k| (k == "FAL_KEY").then(|| "f".to_string()));
        let service = FittingService::from_config(&config);
        let offered: Vec<Engine> = service.offered_engines().into_iter().map(|e| e.engine).collect();
        assert_eq!(offered, vec![Engine::Fal]);
    }

    #[test]
    fn vision_renderer_selects_the_render_stage() {
        let config = Config::from_lookup(|k| match k {
            "GEMINI_API_KEY" => Some("g".to_string()),
            "FAL_KEY" => Some("f".to_string()),
            "VISION_RENDERER" => Some("gemini".to_string()),
            _ => None,
        });
        let gemini_cfg = config.gemini.clone().unwrap();
        assert_eq!(gemini_cfg.renderer, VisionRenderer::Gemini);

        let fal = Arc::new(FalClient::new("f", "https://fal.run"));
        let inpaint = Arc::new(RenderStage::new(
            Arc::new(FalInpainter::new(fal, "fal-ai/flux-lora/inpainting")),
            config.render,
        ));
        let gemini = Arc::new(GeminiClient::new(&gemini_cfg));

        let fal_stage =
            vision_render_stage(VisionRenderer::FalInpaint, Arc::clone(&gemini), &inpaint, config.render);
        assert!(Arc::ptr_eq(&fal_stage, &inpaint));

        let gemini_stage = vision_render_stage(gemini_cfg.renderer, gemini, &inpaint, config.render);
        assert_eq!(gemini_stage.provider(), "gemini-image");

        let offered: Vec<Engine> =
            FittingService::from_config(&config).offered_engines().into_iter().map(|e| e.engine).collect();
        assert_eq!(offered, vec![Engine::Gemini, Engine::Fal]);
    }
}
