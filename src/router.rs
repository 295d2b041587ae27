use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{error::FittingError, pipeline::Stage, strategy::Strategy};

/// Caller-selected provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Gemini,
    Fal,
    Doubao,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Gemini, Engine::Fal, Engine::Doubao];

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Gemini => "gemini",
            Engine::Fal => "fal",
            Engine::Doubao => "doubao",
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        match self {
            Engine::Gemini => StrategyKind::VisionGuidedInpaint,
            Engine::Fal => StrategyKind::FastInpaint,
            Engine::Doubao => StrategyKind::DirectCaption,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = FittingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" | "vision-guided-inpaint" => Ok(Engine::Gemini),
            "fal" | "fast-inpaint" => Ok(Engine::Fal),
            "doubao" | "direct-caption" => Ok(Engine::Doubao),
            _ => Err(FittingError::UnsupportedEngine(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// One text-to-image call; no mask, no identity guarantee.
    DirectCaption,
    /// normalize → segment → synthesize → inpaint.
    VisionGuidedInpaint,
    /// normalize → segment → inpaint with the raw description.
    FastInpaint,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::DirectCaption => "direct-caption",
            StrategyKind::VisionGuidedInpaint => "vision-guided-inpaint",
            StrategyKind::FastInpaint => "fast-inpaint",
        }
    }

    pub fn stages(&self) -> &'static [Stage] {
        match self {
            StrategyKind::DirectCaption => &[Stage::Normalizing, Stage::Rendering],
            StrategyKind::VisionGuidedInpaint => {
                &[Stage::Normalizing, Stage::Segmenting, Stage::Synthesizing, Stage::Rendering]
            }
            StrategyKind::FastInpaint => &[Stage::Normalizing, Stage::Segmenting, Stage::Rendering],
        }
    }

    pub fn preserves_identity(&self) -> bool {
        !matches!(self, StrategyKind::DirectCaption)
    }
}

/// Resolve an engine identifier to its fixed strategy.
pub fn route(engine_id: &str) -> Result<StrategyKind, FittingError> {
    Ok(engine_id.parse::<Engine>()?.strategy())
}

/// Engines offered by this process, each bound to a ready strategy.
#[derive(Default)]
pub struct EngineRouter {
    strategies: HashMap<Engine, Arc<dyn Strategy>>,
    unconfigured: HashMap<Engine, &'static str>,
}

impl EngineRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Engine, strategy: Arc<dyn Strategy>) {
        debug_assert_eq!(engine.strategy(), strategy.kind());
        self.unconfigured.remove(&engine);
        self.strategies.insert(engine, strategy);
    }

    pub fn mark_unconfigured(&mut self, engine: Engine, variable: &'static str) {
        self.strategies.remove(&engine);
        self.unconfigured.insert(engine, variable);
    }

    pub fn resolve(&self, engine_id: &str) -> Result<(Engine, Arc<dyn Strategy>), FittingError> {
        let engine: Engine = engine_id.parse()?;
        match self.strategies.get(&engine) {
            Some(strategy) => Ok((engine, Arc::clone(strategy))),
            None => Err(FittingError::ConfigurationMissing {
                engine: engine.to_string(),
                variable: self.unconfigured.get(&engine).copied().unwrap_or("provider credentials"),
            }),
        }
    }

    pub fn offered(&self) -> Vec<Engine> {
        Engine::ALL.into_iter().filter(|e| self.strategies.contains_key(e)).collect()
    }
}
