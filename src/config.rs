use std::time::Duration;

use tracing::warn;

use crate::{providers::RenderParams, router::Engine};

pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_FAL_BASE: &str = "https://fal.run";
pub const DEFAULT_ARK_BASE: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Which provider renders for the vision-guided engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisionRenderer {
    /// Masked inpainting on fal; only the body region may change.
    #[default]
    FalInpaint,
    /// Gemini image model conditioned on the photo; the mask is not applied.
    Gemini,
}

impl std::str::FromStr for VisionRenderer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fal" | "fal-inpaint" | "inpaint" => Ok(VisionRenderer::FalInpaint),
            "gemini" | "google" => Ok(VisionRenderer::Gemini),
            other => Err(format!("unknown renderer '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub reasoning_model: String,
    pub image_model: String,
    pub renderer: VisionRenderer,
}

#[derive(Debug, Clone)]
pub struct FalConfig {
    pub api_key: String,
    pub base_url: String,
    pub primary_segmenter: String,
    pub fallback_segmenter: String,
    pub inpaint_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct ArkConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Process-wide settings, read once at startup and injected into clients.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: Option<GeminiConfig>,
    pub fal: Option<FalConfig>,
    pub ark: Option<ArkConfig>,
    pub stage_timeout: Duration,
    pub render: RenderParams,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let gemini = get("GEMINI_API_KEY").or_else(|| get("API_KEY")).map(|api_key| GeminiConfig {
            api_key,
            base_url: or("GEMINI_API_BASE", DEFAULT_GEMINI_BASE),
            reasoning_model: or("GEMINI_REASONING_MODEL", "gemini-2.5-flash"),
            image_model: or("GEMINI_IMAGE_MODEL", "gemini-2.5-flash-image"),
            renderer: match get("VISION_RENDERER") {
                None => VisionRenderer::default(),
                Some(raw) => raw.parse().unwrap_or_else(|e| {
                    warn!("⚠️ Ignoring VISION_RENDERER: {}", e);
                    VisionRenderer::default()
                }),
            },
        });

        let fal = get("FAL_KEY").or_else(|| get("FAL_API_KEY")).map(|api_key| FalConfig {
            api_key,
            base_url: or("FAL_API_BASE", DEFAULT_FAL_BASE),
            primary_segmenter: or("FAL_SEGMENT_ENDPOINT", "fal-ai/evf-sam"),
            fallback_segmenter: or(
                "FAL_SEGMENT_FALLBACK_ENDPOINT",
                "fal-ai/florence-2-large/referring-expression-segmentation",
            ),
            inpaint_endpoint: or("FAL_INPAINT_ENDPOINT", "fal-ai/flux-lora/inpainting"),
        });

        let ark = get("ARK_API_KEY").map(|api_key| ArkConfig {
            api_key,
            base_url: or("ARK_API_BASE", DEFAULT_ARK_BASE),
            model: or("ARK_IMAGE_MODEL", "doubao-seedream-3-0-t2i-250415"),
        });

        let defaults = RenderParams::default();
        let render = RenderParams {
            strength: parse_or(get("FITTING_STRENGTH"), "FITTING_STRENGTH", defaults.strength),
            guidance_scale: parse_or(
                get("FITTING_GUIDANCE_SCALE"),
                "FITTING_GUIDANCE_SCALE",
                defaults.guidance_scale,
            ),
            num_inference_steps: parse_or(get("FITTING_STEPS"), "FITTING_STEPS", defaults.num_inference_steps),
        };

        let stage_timeout = match parse_or(get("STAGE_TIMEOUT_SECS"), "STAGE_TIMEOUT_SECS", 0u64) {
            0 => DEFAULT_STAGE_TIMEOUT,
            secs => Duration::from_secs(secs),
        };

        Self {
            gemini,
            fal,
            ark,
            stage_timeout,
            render,
            port: parse_or(get("PORT"), "PORT", 8080),
        }
    }

    /// First missing credential for `engine`, if any.
    pub fn missing_for(&self, engine: Engine) -> Option<&'static str> {
        match engine {
            Engine::Gemini if self.gemini.is_none() => Some("GEMINI_API_KEY"),
            Engine::Gemini | Engine::Fal if self.fal.is_none() => Some("FAL_KEY"),
            Engine::Doubao if self.ark.is_none() => Some("ARK_API_KEY"),
            _ => None,
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("⚠️ Ignoring unparsable {}={:?}", key, raw);
            default
        }),
    }
}
