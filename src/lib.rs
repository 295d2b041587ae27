pub mod config;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod providers;
pub mod render;
pub mod router;
pub mod routes;
pub mod segmentation;
pub mod session;
pub mod strategy;
pub mod synthesis;

pub use config::Config;
pub use error::{ErrorKind, FittingError, RenderCause, SynthesisCause};
pub use models::{GenerationRequest, GenerationResult, ImageSource, NormalizedImage, SubjectMask};
pub use pipeline::{FittingService, PipelineState, ProgressEvent, ProgressLog, ProgressObserver, Stage};
pub use router::{route, Engine, EngineRouter, StrategyKind};
