use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FlowError;

/// Semantic role detected for an input image. Drives the positional
/// "IMAGE N = role" references in synthesized prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Product,
    Logo,
    StyleReference,
    Background,
    Detail,
    Unknown,
}

impl ImageRole {
    /// Best-effort parse of a vision-capability label. Anything ambiguous
    /// degrades to `Unknown` rather than failing the call.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "product" => Self::Product,
            "logo" => Self::Logo,
            "style_reference" | "style reference" | "reference" | "template" => {
                Self::StyleReference
            }
            "background" => Self::Background,
            "detail" => Self::Detail,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Logo => "logo",
            Self::StyleReference => "style_reference",
            Self::Background => "background",
            Self::Detail => "detail",
            Self::Unknown => "unknown",
        }
    }
}

/// One image attached to the current conversation turn. Immutable once
/// classified; owned by the session that collected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInput {
    pub url: String,
    pub description: Option<String>,
    pub role: ImageRole,
    pub index: u32,
}

impl ImageInput {
    /// Copy of this input with a detected role attached. The registry's own
    /// entry stays as collected; classified copies flow into synthesis.
    pub fn classified(&self, role: ImageRole, description: Option<String>) -> Self {
        Self {
            url: self.url.clone(),
            description: description.or_else(|| self.description.clone()),
            role,
            index: self.index,
        }
    }
}

/// Style descriptor captured from the first finalized step of a multi-step
/// flow and attached read-only to every later synthesis call in that flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleReference {
    pub image_url: String,
    pub style_description: String,
}

/// A finalized, user-accepted generation within a carousel flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSlide {
    /// 1-based, matches the slide's position in the append-only list.
    pub step_number: u32,
    pub image_url: String,
    pub image_file_id: Option<String>,
    pub prompt: String,
    pub style: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Target shape for the generated image, passed through to the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    Square,
    #[default]
    Portrait,
    Story,
    Landscape,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "4:5",
            Self::Story => "9:16",
            Self::Landscape => "16:9",
        }
    }
}

/// Raw image returned by the generation capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Result of one successful pipeline run. Transient; persistence of the
/// order record belongs to the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub image: GeneratedImage,
    pub prompt: String,
    pub intent: crate::intent::Intent,
    pub style_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LockState {
    is_generating: bool,
    started_at: Option<DateTime<Utc>>,
}

/// Advisory per-session generation lock. The cell is shared between clones of
/// a state value, so an acquire done by the orchestrator is visible to the
/// copy the transport layer kept. Different sessions never share a cell.
#[derive(Debug, Clone, Default)]
pub struct SessionLock {
    inner: Arc<Mutex<LockState>>,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, or reports the in-flight generation. A lock older
    /// than `timeout` is stale (crashed or abandoned call) and is forcibly
    /// re-acquired.
    pub fn try_acquire(&self, now: DateTime<Utc>, timeout: Duration) -> Result<(), FlowError> {
        let mut state = self.inner.lock();
        if state.is_generating {
            if let Some(started_at) = state.started_at {
                let age = now
                    .signed_duration_since(started_at)
                    .to_std()
                    .unwrap_or_default();
                if age < timeout {
                    return Err(FlowError::Concurrency { started_at });
                }
                warn!(?started_at, "♻️ reclaiming stale session lock");
            }
        }
        state.is_generating = true;
        state.started_at = Some(now);
        Ok(())
    }

    pub fn release(&self) {
        let mut state = self.inner.lock();
        state.is_generating = false;
        state.started_at = None;
    }

    pub fn is_generating(&self) -> bool {
        self.inner.lock().is_generating
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().started_at
    }
}

impl PartialEq for SessionLock {
    fn eq(&self, other: &Self) -> bool {
        *self.inner.lock() == *other.inner.lock()
    }
}

impl Eq for SessionLock {}

impl Serialize for SessionLock {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.lock().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SessionLock {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = LockState::deserialize(deserializer)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
        })
    }
}
