use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FlowConfig;
use crate::error::{FlowError, ValidationError};
use crate::models::{AspectRatio, SessionLock};
use crate::registry::ImageContextRegistry;

use super::{invalid, Command, Event, FlowState, GeneratedStep, GenerationJob, Transition, UserAction};

/// Running edit context. `current` is the latest generated revision; each
/// further instruction edits that revision, not the original upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSession {
    pub registry: ImageContextRegistry,
    pub prompt: String,
    pub current: Option<GeneratedStep>,
    pub lock: SessionLock,
}

/// Edit steps: WaitingPhoto → WaitingPrompt → Session (repeatable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum EditState {
    WaitingPhoto { registry: ImageContextRegistry },
    WaitingPrompt { registry: ImageContextRegistry },
    Session(EditSession),
}

impl EditState {
    pub fn start() -> Self {
        EditState::WaitingPhoto {
            registry: ImageContextRegistry::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EditState::WaitingPhoto { .. } => "Edit::WaitingPhoto",
            EditState::WaitingPrompt { .. } => "Edit::WaitingPrompt",
            EditState::Session(_) => "Edit::Session",
        }
    }

    pub fn session_lock(&self) -> Option<&SessionLock> {
        match self {
            EditState::Session(s) => Some(&s.lock),
            _ => None,
        }
    }
}

/// Basis for the next edit: the latest revision once one exists, otherwise
/// the uploaded originals.
fn edit_job(session: &EditSession, cfg: &FlowConfig) -> Result<GenerationJob, FlowError> {
    let registry = match &session.current {
        Some(current) => {
            let mut registry = ImageContextRegistry::new();
            registry.add_image(current.image_url.clone(), None, cfg)?;
            registry
        }
        None => session.registry.clone(),
    };
    Ok(GenerationJob {
        text: session.prompt.clone(),
        registry,
        style: None,
        prior_slides: vec![],
        attribute_lines: vec![],
        edit_of_existing: true,
        aspect_ratio: AspectRatio::Portrait,
        credit_cost: cfg.credit_costs.edit,
    })
}

pub(super) fn apply(
    outer: &FlowState,
    state: &EditState,
    event: Event,
    cfg: &FlowConfig,
) -> Result<Transition, FlowError> {
    match (state, event) {
        (EditState::WaitingPhoto { registry }, Event::PhotoReceived { url, caption, .. }) => {
            let mut registry = registry.clone();
            registry.add_image(url, caption, cfg)?;
            Ok(Transition::to(FlowState::Edit(EditState::WaitingPrompt {
                registry,
            })))
        }
        (EditState::WaitingPrompt { registry }, Event::PhotoReceived { url, caption, .. }) => {
            let mut registry = registry.clone();
            registry.add_image(url, caption, cfg)?;
            Ok(Transition::to(FlowState::Edit(EditState::WaitingPrompt {
                registry,
            })))
        }
        (EditState::WaitingPrompt { registry }, Event::TextReceived(text)) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(ValidationError::EmptyPrompt.into());
            }
            let session = EditSession {
                registry: registry.clone(),
                prompt: text,
                current: None,
                lock: SessionLock::new(),
            };
            let job = edit_job(&session, cfg)?;
            Ok(Transition::with(
                FlowState::Edit(EditState::Session(session)),
                Command::RunGeneration(job),
            ))
        }
        (EditState::Session(session), Event::GenerationSucceeded(step)) => {
            let mut session = session.clone();
            session.current = Some(step);
            Ok(Transition::to(FlowState::Edit(EditState::Session(session))))
        }
        (EditState::Session(session), Event::GenerationFailed) => {
            if session.current.is_none() {
                return Ok(Transition::to(FlowState::Edit(EditState::WaitingPrompt {
                    registry: session.registry.clone(),
                })));
            }
            Ok(Transition::to(FlowState::Edit(EditState::Session(
                session.clone(),
            ))))
        }
        (EditState::Session(session), Event::TextReceived(text)) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(ValidationError::EmptyPrompt.into());
            }
            let mut session = session.clone();
            session.prompt = text;
            let job = edit_job(&session, cfg)?;
            Ok(Transition::with(
                FlowState::Edit(EditState::Session(session)),
                Command::RunGeneration(job),
            ))
        }
        (EditState::Session(session), Event::Action(UserAction::Regenerate)) => {
            let job = edit_job(session, cfg)?;
            Ok(Transition::with(
                FlowState::Edit(EditState::Session(session.clone())),
                Command::RunGeneration(job),
            ))
        }
        (EditState::Session(session), Event::Action(UserAction::Finish)) => {
            if session.current.is_none() {
                return Err(invalid(outer, &Event::Action(UserAction::Finish)));
            }
            info!("🏁 edit flow finished");
            Ok(Transition::to(FlowState::Idle))
        }
        (_, ref event) => Err(invalid(outer, event)),
    }
}
