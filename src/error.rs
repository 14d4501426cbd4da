use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures detected locally, before any external capability is called.
/// Surfaced to the user as a specific, actionable message with no state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no photo attached: at least one image is required")]
    MissingPhoto,
    #[error("empty instruction: a text prompt is required")]
    EmptyPrompt,
    #[error("instruction too long: {len} chars, maximum is {max}")]
    PromptTooLong { len: usize, max: usize },
    #[error("too many images: maximum is {max} per generation")]
    TooManyImages { max: usize },
    #[error("too many steps: maximum is {max} per flow")]
    TooManySteps { max: usize },
    #[error("insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: u32, available: u32 },
}

/// A vision, synthesis, or image-generation call failed or timed out.
/// The session lock is released and the flow stays on its pre-call step,
/// so the user can retry without re-uploading images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalServiceError {
    #[error("vision capability failed: {0}")]
    Vision(String),
    #[error("image generation failed: {0}")]
    Generation(String),
    #[error("storage collaborator failed: {0}")]
    Storage(String),
    #[error("{stage} stage timed out")]
    Timeout { stage: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("a generation is already in progress for this session (started {started_at})")]
    Concurrency { started_at: DateTime<Utc> },
    #[error(transparent)]
    External(#[from] ExternalServiceError),
    #[error("event `{event}` does not apply in state `{state}`")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
}

impl FlowError {
    /// External failures are retryable from the user's point of view;
    /// everything else needs a different input first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::External(_))
    }
}
