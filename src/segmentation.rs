use std::{fmt, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    error::FittingError,
    models::{NormalizedImage, SubjectMask},
    pipeline::Stage,
    providers::{preview, ProviderError, Segmenter},
};

pub const PRIMARY_SELECTOR: &str =
    "the dog or cat's body, torso and clothing area, excluding the head and face";
pub const FALLBACK_SELECTOR: &str = "pet body and torso without the head";

enum AttemptFailure {
    TimedOut,
    Provider(ProviderError),
    NoMask,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::TimedOut => f.write_str("timed out"),
            AttemptFailure::Provider(e) => write!(f, "{e}"),
            AttemptFailure::NoMask => f.write_str("no mask returned"),
        }
    }
}

/// Primary segmenter with exactly one fallback; never more than two attempts.
pub struct SegmentationStage {
    primary: Arc<dyn Segmenter>,
    fallback: Arc<dyn Segmenter>,
}

impl SegmentationStage {
    pub fn new(primary: Arc<dyn Segmenter>, fallback: Arc<dyn Segmenter>) -> Self {
        Self { primary, fallback }
    }

    pub async fn segment(
        &self,
        image: &NormalizedImage,
        deadline: Duration,
    ) -> Result<SubjectMask, FittingError> {
        let primary = match attempt(self.primary.as_ref(), image, PRIMARY_SELECTOR, deadline).await {
            Ok(mask) => return Ok(mask),
            Err(failure) => failure,
        };
        warn!("⚠️ Primary segmenter {} failed ({}), trying {}", self.primary.name(), primary, self.fallback.name());

        let fallback = match attempt(self.fallback.as_ref(), image, FALLBACK_SELECTOR, deadline).await {
            Ok(mask) => return Ok(mask),
            Err(failure) => failure,
        };

        if matches!((&primary, &fallback), (AttemptFailure::TimedOut, AttemptFailure::TimedOut)) {
            return Err(FittingError::Timeout { stage: Stage::Segmenting, after: deadline });
        }
        Err(FittingError::SegmentationFailed {
            primary: format!("{}: {}", self.primary.name(), primary),
            fallback: format!("{}: {}", self.fallback.name(), fallback),
        })
    }
}

async fn attempt(
    segmenter: &dyn Segmenter,
    image: &NormalizedImage,
    selector: &str,
    deadline: Duration,
) -> Result<SubjectMask, AttemptFailure> {
    let masks = match tokio::time::timeout(deadline, segmenter.segment(image, selector)).await {
        Err(_) => return Err(AttemptFailure::TimedOut),
        Ok(Err(e)) if e.is_timeout() => return Err(AttemptFailure::TimedOut),
        Ok(Err(e)) => return Err(AttemptFailure::Provider(e)),
        Ok(Ok(masks)) => masks,
    };
    let mask_ref = masks
        .into_iter()
        .map(|m| m.trim().to_string())
        .find(|m| !m.is_empty())
        .ok_or(AttemptFailure::NoMask)?;
    info!("🎭 Mask from {}: {}", segmenter.name(), preview(&mask_ref));
    Ok(SubjectMask::new(mask_ref, segmenter.name()))
}
