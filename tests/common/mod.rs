#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use pet_fitting::{
    normalizer::{FetchedImage, ImageFetcher, ImageNormalizer},
    providers::{
        ImageGenerator, ProviderError, ProviderResult, RenderParams, RenderRequest, Segmenter,
        VisionReasoner,
    },
    render::RenderStage,
    segmentation::SegmentationStage,
    strategy::{DirectCaption, FastInpaint, VisionGuidedInpaint},
    synthesis::SynthesisStage,
    Engine, EngineRouter, FittingService, NormalizedImage,
};

pub const PET_URI: &str = "https://www.diqpet.com/products/corgi.jpg";

pub fn png_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    image::RgbImage::from_pixel(8, 6, image::Rgb([200, 180, 140]))
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub fn jpeg_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    image::RgbImage::from_pixel(8, 6, image::Rgb([90, 60, 30]))
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

pub fn png_data_uri() -> String {
    format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(png_bytes()))
}

/// Scripted provider behaviour.
#[derive(Clone)]
pub enum Reply {
    Refs(Vec<String>),
    /// `"<prefix>-<call number>"`, so every call yields a distinct reference.
    Numbered(&'static str),
    Status(u16, &'static str),
    Network,
    /// The provider's own client gave up.
    TimedOut,
    Hang,
    /// First call waits for the notify, later calls answer at once.
    GateFirst(Arc<Notify>, &'static str),
}

impl Reply {
    pub fn one(r: &str) -> Self {
        Reply::Refs(vec![r.to_string()])
    }

    pub fn empty() -> Self {
        Reply::Refs(Vec::new())
    }

    async fn resolve(&self, call: usize) -> ProviderResult<Vec<String>> {
        match self {
            Reply::Refs(refs) => Ok(refs.clone()),
            Reply::Numbered(prefix) => Ok(vec![format!("{prefix}-{call}")]),
            Reply::Status(status, body) => {
                Err(ProviderError::Status { status: *status, body: body.to_string() })
            }
            Reply::Network => Err(ProviderError::Transport("connection reset by peer".into())),
            Reply::TimedOut => Err(ProviderError::TimedOut("operation timed out".into())),
            Reply::Hang => std::future::pending().await,
            Reply::GateFirst(gate, prefix) => {
                if call == 1 {
                    gate.notified().await;
                }
                Ok(vec![format!("{prefix}-{call}")])
            }
        }
    }
}

pub struct FakeFetcher {
    pub calls: AtomicUsize,
    pub payload: Vec<u8>,
    pub content_type: Option<&'static str>,
    /// Consulted before serving; any error or hang replaces the payload.
    pub failure: Option<Reply>,
}

impl FakeFetcher {
    pub fn serving(payload: Vec<u8>, content_type: Option<&'static str>) -> Self {
        Self { calls: AtomicUsize::new(0), payload, content_type, failure: None }
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, _uri: &str) -> ProviderResult<FetchedImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(failure) = &self.failure {
            failure.resolve(call).await?;
        }
        Ok(FetchedImage {
            bytes: Bytes::from(self.payload.clone()),
            content_type: self.content_type.map(str::to_string),
        })
    }
}

pub struct FakeSegmenter {
    pub name: &'static str,
    pub reply: Reply,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<NormalizedImage>>,
}

impl FakeSegmenter {
    pub fn new(name: &'static str, reply: Reply) -> Self {
        Self { name, reply, calls: AtomicUsize::new(0), seen: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Segmenter for FakeSegmenter {
    fn name(&self) -> &str {
        self.name
    }

    async fn segment(&self, image: &NormalizedImage, _selector: &str) -> ProviderResult<Vec<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().push(image.clone());
        self.reply.resolve(call).await
    }
}

pub struct FakeReasoner {
    pub reply: Reply,
    pub calls: AtomicUsize,
    pub instructions: Mutex<Vec<String>>,
}

#[async_trait]
impl VisionReasoner for FakeReasoner {
    fn name(&self) -> &str {
        "fake-vision"
    }

    async fn reason(&self, _image: &NormalizedImage, instruction: &str) -> ProviderResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.instructions.lock().push(instruction.to_string());
        Ok(self.reply.resolve(call).await?.join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRender {
    pub had_image: bool,
    pub mask_ref: Option<String>,
    pub prompt: String,
}

pub struct FakeGenerator {
    pub name: &'static str,
    pub reply: Reply,
    pub applies_mask: bool,
    pub calls: AtomicUsize,
    pub renders: Mutex<Vec<RecordedRender>>,
}

impl FakeGenerator {
    pub fn new(name: &'static str, reply: Reply) -> Self {
        Self { name, reply, applies_mask: true, calls: AtomicUsize::new(0), renders: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    fn name(&self) -> &str {
        self.name
    }

    fn applies_mask(&self) -> bool {
        self.applies_mask
    }

    async fn generate(&self, request: RenderRequest<'_>) -> ProviderResult<Vec<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.renders.lock().push(RecordedRender {
            had_image: request.image.is_some(),
            mask_ref: request.mask.map(|m| m.mask_ref().to_string()),
            prompt: request.prompt.to_string(),
        });
        self.reply.resolve(call).await
    }
}

pub struct Setup {
    pub fetched: Vec<u8>,
    pub fetched_type: Option<&'static str>,
    pub fetch_failure: Option<Reply>,
    pub primary: Reply,
    pub fallback: Reply,
    pub reasoner: Reply,
    pub inpaint: Reply,
    pub inpaint_applies_mask: bool,
    pub caption: Reply,
    pub engines: Vec<Engine>,
    pub stage_timeout: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            fetched: png_bytes(),
            fetched_type: Some("image/png"),
            fetch_failure: None,
            primary: Reply::Numbered("https://fal.media/primary-mask"),
            fallback: Reply::Numbered("https://fal.media/fallback-mask"),
            reasoner: Reply::one("A fluffy golden retriever wearing a red raincoat; keep the head unchanged."),
            inpaint: Reply::Numbered("https://fal.media/fitting"),
            inpaint_applies_mask: true,
            caption: Reply::Numbered("https://ark.example/caption"),
            engines: Engine::ALL.to_vec(),
            stage_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Harness {
    pub fetcher: Arc<FakeFetcher>,
    pub primary: Arc<FakeSegmenter>,
    pub fallback: Arc<FakeSegmenter>,
    pub reasoner: Arc<FakeReasoner>,
    pub inpainter: Arc<FakeGenerator>,
    pub captioner: Arc<FakeGenerator>,
    pub service: FittingService,
}

impl Harness {
    pub fn new(setup: Setup) -> Self {
        let fetcher = Arc::new(FakeFetcher {
            failure: setup.fetch_failure,
            ..FakeFetcher::serving(setup.fetched, setup.fetched_type)
        });
        let primary = Arc::new(FakeSegmenter::new("fake-primary", setup.primary));
        let fallback = Arc::new(FakeSegmenter::new("fake-fallback", setup.fallback));
        let reasoner = Arc::new(FakeReasoner {
            reply: setup.reasoner,
            calls: AtomicUsize::new(0),
            instructions: Mutex::new(Vec::new()),
        });
        let inpainter = Arc::new(FakeGenerator {
            applies_mask: setup.inpaint_applies_mask,
            ..FakeGenerator::new("fake-inpaint", setup.inpaint)
        });
        let captioner = Arc::new(FakeGenerator::new("fake-caption", setup.caption));

        let normalizer = Arc::new(ImageNormalizer::new(fetcher.clone()));
        let segmentation = Arc::new(SegmentationStage::new(primary.clone(), fallback.clone()));
        let inpaint = Arc::new(RenderStage::new(inpainter.clone(), RenderParams::default()));
        let caption = Arc::new(RenderStage::new(captioner.clone(), RenderParams::default()));

        let mut router = EngineRouter::new();
        for engine in Engine::ALL {
            if !setup.engines.contains(&engine) {
                router.mark_unconfigured(engine, "TEST_KEY");
                continue;
            }
            match engine {
                Engine::Gemini => router.register(
                    engine,
                    Arc::new(VisionGuidedInpaint::new(
                        normalizer.clone(),
                        segmentation.clone(),
                        SynthesisStage::new(reasoner.clone()),
                        inpaint.clone(),
                    )),
                ),
                Engine::Fal => router.register(
                    engine,
                    Arc::new(FastInpaint::new(normalizer.clone(), segmentation.clone(), inpaint.clone())),
                ),
                Engine::Doubao => {
                    router.register(engine, Arc::new(DirectCaption::new(normalizer.clone(), caption.clone())))
                }
            }
        }

        Self {
            fetcher,
            primary,
            fallback,
            reasoner,
            inpainter,
            captioner,
            service: FittingService::new(router, setup.stage_timeout),
        }
    }

    /// Total outbound calls of any kind.
    pub fn network_calls(&self) -> usize {
        [
            self.fetcher.calls.load(Ordering::SeqCst),
            self.primary.calls.load(Ordering::SeqCst),
            self.fallback.calls.load(Ordering::SeqCst),
            self.reasoner.calls.load(Ordering::SeqCst),
            self.inpainter.calls.load(Ordering::SeqCst),
            self.captioner.calls.load(Ordering::SeqCst),
        ]
        .iter()
        .sum()
    }
}

pub fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
