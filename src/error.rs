use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::{models::ErrorBody, pipeline::Stage, providers::ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisCause {
    AuthOrQuota,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderCause {
    BillingOrQuota,
    PayloadTooLarge,
    ServiceBusy,
    Malformed,
}

/// Stable tag for each failure; carried by `PipelineState::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ImageUnreadable,
    UnsupportedEngine,
    SegmentationFailed,
    PromptSynthesisFailed,
    RenderFailed,
    Timeout,
    ConfigurationMissing,
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ImageUnreadable => "image_unreadable",
            ErrorKind::UnsupportedEngine => "unsupported_engine",
            ErrorKind::SegmentationFailed => "segmentation_failed",
            ErrorKind::PromptSynthesisFailed => "prompt_synthesis_failed",
            ErrorKind::RenderFailed => "render_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConfigurationMissing => "configuration_missing",
            ErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

#[derive(Debug, Error)]
pub enum FittingError {
    #[error("subject image unreadable: {0}")]
    ImageUnreadable(String),
    #[error("unsupported engine '{0}'")]
    UnsupportedEngine(String),
    #[error("segmentation failed (primary: {primary}; fallback: {fallback})")]
    SegmentationFailed { primary: String, fallback: String },
    #[error("prompt synthesis failed ({cause:?}): {detail}")]
    PromptSynthesisFailed { cause: SynthesisCause, detail: String },
    #[error("render failed ({cause:?}): {detail}")]
    RenderFailed { cause: RenderCause, detail: String },
    #[error("{stage} stage timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },
    #[error("engine '{engine}' is not configured: missing {variable}")]
    ConfigurationMissing { engine: String, variable: &'static str },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FittingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FittingError::ImageUnreadable(_) => ErrorKind::ImageUnreadable,
            FittingError::UnsupportedEngine(_) => ErrorKind::UnsupportedEngine,
            FittingError::SegmentationFailed { .. } => ErrorKind::SegmentationFailed,
            FittingError::PromptSynthesisFailed { .. } => ErrorKind::PromptSynthesisFailed,
            FittingError::RenderFailed { .. } => ErrorKind::RenderFailed,
            FittingError::Timeout { .. } => ErrorKind::Timeout,
            FittingError::ConfigurationMissing { .. } => ErrorKind::ConfigurationMissing,
            FittingError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FittingError::SegmentationFailed { .. } | FittingError::Timeout { .. } => true,
            FittingError::PromptSynthesisFailed { cause, .. } => *cause == SynthesisCause::Transient,
            FittingError::RenderFailed { cause, .. } => {
                matches!(cause, RenderCause::ServiceBusy | RenderCause::Malformed)
            }
            _ => false,
        }
    }

    /// Actionable message for the user, independent of the raw provider text.
    pub fn guidance(&self) -> String {
        match self {
            FittingError::ImageUnreadable(_) => {
                "The pet photo could not be read. Try a different JPEG or PNG image.".into()
            }
            FittingError::UnsupportedEngine(_) => "Pick one of the available engines.".into(),
            FittingError::SegmentationFailed { .. } => {
                "We couldn't isolate your pet's body. Retry, or use a photo with one clearly visible pet."
                    .into()
            }
            FittingError::PromptSynthesisFailed { cause: SynthesisCause::AuthOrQuota, .. } => {
                "This engine is out of quota or not authorized right now. Switch to a different engine."
                    .into()
            }
            FittingError::PromptSynthesisFailed { cause: SynthesisCause::Transient, .. } => {
                "Analyzing the photo failed temporarily. Please retry.".into()
            }
            FittingError::RenderFailed { cause, .. } => match cause {
                RenderCause::BillingOrQuota => {
                    "The rendering account has run out of credit. Switch to a different engine.".into()
                }
                RenderCause::PayloadTooLarge => "The image is too large. Use a smaller photo.".into(),
                RenderCause::ServiceBusy => {
                    "The rendering service is busy. Please retry in a moment.".into()
                }
                RenderCause::Malformed => {
                    "The rendering service returned no image. Retry or switch engine.".into()
                }
            },
            FittingError::Timeout { stage, .. } => {
                format!("The '{}' step took too long. Please retry.", stage.label())
            }
            FittingError::ConfigurationMissing { .. } => {
                "This engine is not available on this server. Pick another engine.".into()
            }
            FittingError::InvalidRequest(_) => {
                "Select a pet photo and a garment before generating.".into()
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FittingError::ImageUnreadable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FittingError::UnsupportedEngine(_) | FittingError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            FittingError::SegmentationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            FittingError::PromptSynthesisFailed { .. } => StatusCode::BAD_GATEWAY,
            FittingError::RenderFailed { cause: RenderCause::PayloadTooLarge, .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            FittingError::RenderFailed { .. } => StatusCode::BAD_GATEWAY,
            FittingError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            FittingError::ConfigurationMissing { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub(crate) fn synthesis(err: ProviderError, deadline: Duration) -> Self {
        if err.is_timeout() {
            return FittingError::Timeout { stage: Stage::Synthesizing, after: deadline };
        }
        let cause = if err.is_auth_or_quota() {
            SynthesisCause::AuthOrQuota
        } else {
            SynthesisCause::Transient
        };
        FittingError::PromptSynthesisFailed { cause, detail: err.to_string() }
    }

    pub(crate) fn render(err: ProviderError, deadline: Duration) -> Self {
        if err.is_timeout() {
            return FittingError::Timeout { stage: Stage::Rendering, after: deadline };
        }
        let cause = if err.is_auth_or_quota() {
            RenderCause::BillingOrQuota
        } else if err.is_payload_too_large() {
            RenderCause::PayloadTooLarge
        } else if matches!(err, ProviderError::Malformed(_)) {
            RenderCause::Malformed
        } else {
            RenderCause::ServiceBusy
        };
        FittingError::RenderFailed { cause, detail: err.to_string() }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().as_str(),
            message: self.to_string(),
            guidance: self.guidance(),
            retryable: self.is_retryable(),
        }
    }
}

impl IntoResponse for FittingError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn status(code: u16, body: &str) -> ProviderError {
        ProviderError::Status { status: code, body: body.into() }
    }

    #[test]
    fn synthesis_quota_is_distinguished_from_transient() {
        let secs = Duration::from_secs(30);
        let quota = FittingError::synthesis(status(429, "RESOURCE_EXHAUSTED"), secs);
        let flaky = FittingError::synthesis(status(500, "internal"), secs);
        assert!(matches!(
            quota,
            FittingError::PromptSynthesisFailed { cause: SynthesisCause::AuthOrQuota, .. }
        ));
        assert!(matches!(
            flaky,
            FittingError::PromptSynthesisFailed { cause: SynthesisCause::Transient, .. }
        ));
        assert!(!quota.is_retryable());
        assert!(flaky.is_retryable());
        assert_ne!(quota.guidance(), flaky.guidance());
    }

    #[test]
    fn render_errors_map_to_actionable_causes() {
        let secs = Duration::from_secs(30);
        let cases = [
            (status(402, "payment required"), RenderCause::BillingOrQuota),
            (status(413, "request entity too large"), RenderCause::PayloadTooLarge),
            (status(503, "overloaded"), RenderCause::ServiceBusy),
            (ProviderError::Malformed("no images".into()), RenderCause::Malformed),
        ];
        for (err, expected) in cases {
            match FittingError::render(err, secs) {
                FittingError::RenderFailed { cause, .. } => assert_eq!(cause, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn provider_timeouts_become_stage_timeouts() {
        let err = FittingError::render(ProviderError::TimedOut("deadline".into()), Duration::from_secs(5));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(err.is_retryable());
    }
}
