//! The conversation as a strict state machine. One `FlowState` value exists
//! per session; every transition returns a brand-new value (plus an optional
//! command for the transport layer to execute) and never mutates in place.
//! Any (state, event) pair not explicitly valid is `InvalidTransition` and
//! the caller keeps its stored state.

pub mod carousel;
pub mod demo;
pub mod edit;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capabilities::UserId;
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::models::{AspectRatio, GenerationSlide, SessionLock, StyleReference};
use crate::orchestrator::GenerationRequest;
use crate::registry::ImageContextRegistry;

pub use carousel::{CarouselSession, CarouselState};
pub use demo::{DemoAttribute, DemoProgress, DemoSelections, DemoState};
pub use edit::{EditSession, EditState};

/// Explicit button-level actions the transport layer can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    StartCarousel,
    StartEdit,
    StartDemo,
    Finish,
    Regenerate,
    NextStep,
    Skip,
    SelectAttribute(DemoAttribute),
    Reset,
}

/// A generation the transport delivered back to the machine: the image has
/// already been uploaded wherever the transport stores media, so the state
/// only needs its URL and the prompt that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedStep {
    pub image_url: String,
    pub image_file_id: Option<String>,
    pub prompt: String,
    pub style_summary: Option<String>,
}

/// One incoming message or completion signal for a session. Transitions are
/// applied strictly in arrival order per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PhotoReceived {
        url: String,
        file_id: Option<String>,
        caption: Option<String>,
    },
    TextReceived(String),
    Action(UserAction),
    GenerationSucceeded(GeneratedStep),
    GenerationFailed,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::PhotoReceived { .. } => "PhotoReceived",
            Event::TextReceived(_) => "TextReceived",
            Event::Action(UserAction::StartCarousel) => "StartCarousel",
            Event::Action(UserAction::StartEdit) => "StartEdit",
            Event::Action(UserAction::StartDemo) => "StartDemo",
            Event::Action(UserAction::Finish) => "Finish",
            Event::Action(UserAction::Regenerate) => "Regenerate",
            Event::Action(UserAction::NextStep) => "NextStep",
            Event::Action(UserAction::Skip) => "Skip",
            Event::Action(UserAction::SelectAttribute(_)) => "SelectAttribute",
            Event::Action(UserAction::Reset) => "Reset",
            Event::GenerationSucceeded(_) => "GenerationSucceeded",
            Event::GenerationFailed => "GenerationFailed",
        }
    }
}

/// Everything the orchestrator needs except the user identity, which the
/// transport layer owns. Emitted inside `Command::RunGeneration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub text: String,
    pub registry: ImageContextRegistry,
    pub style: Option<StyleReference>,
    pub prior_slides: Vec<GenerationSlide>,
    pub attribute_lines: Vec<String>,
    pub edit_of_existing: bool,
    pub aspect_ratio: AspectRatio,
    pub credit_cost: u32,
}

impl GenerationJob {
    pub fn into_request(self, user_id: UserId) -> GenerationRequest {
        GenerationRequest {
            user_id,
            text: self.text,
            registry: self.registry,
            style: self.style,
            prior_slides: self.prior_slides,
            attribute_lines: self.attribute_lines,
            edit_of_existing: self.edit_of_existing,
            aspect_ratio: self.aspect_ratio,
            credit_cost: self.credit_cost,
        }
    }
}

/// Side effect the transport layer must execute after persisting the new
/// state. Generation results come back in as `Event::GenerationSucceeded` /
/// `Event::GenerationFailed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RunGeneration(GenerationJob),
    DeliverSlides(Vec<GenerationSlide>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: FlowState,
    pub command: Option<Command>,
}

impl Transition {
    pub fn to(next: FlowState) -> Self {
        Self {
            next,
            command: None,
        }
    }

    pub fn with(next: FlowState, command: Command) -> Self {
        Self {
            next,
            command: Some(command),
        }
    }
}

/// Closed union of every conversation mode. Exactly one per active session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Idle,
    Carousel(CarouselState),
    Edit(EditState),
    Demo(DemoState),
}

impl FlowState {
    /// Fresh `Idle`, valid from every state. Used for error recovery and
    /// explicit cancellation; discards slides, style and any pending result.
    pub fn reset() -> Self {
        FlowState::Idle
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Idle => "Idle",
            FlowState::Carousel(s) => s.name(),
            FlowState::Edit(s) => s.name(),
            FlowState::Demo(s) => s.name(),
        }
    }

    /// The generation lock embedded in the active session's own state, if
    /// one exists yet. The transport clones this (clones share the cell) and
    /// hands it to the orchestrator alongside the emitted job.
    pub fn session_lock(&self) -> Option<&SessionLock> {
        match self {
            FlowState::Idle => None,
            FlowState::Carousel(s) => s.session_lock(),
            FlowState::Edit(s) => s.session_lock(),
            FlowState::Demo(s) => s.session_lock(),
        }
    }
}

pub(crate) fn invalid(state: &FlowState, event: &Event) -> FlowError {
    FlowError::InvalidTransition {
        state: state.name(),
        event: event.name(),
    }
}

/// The single entry point the transport layer calls per incoming event.
/// Pure: same inputs, same output; the caller persists `Transition::next`
/// and executes `Transition::command`. On `Err` the stored state is kept
/// unchanged.
pub fn apply(
    state: &FlowState,
    event: Event,
    cfg: &FlowConfig,
    now: DateTime<Utc>,
) -> Result<Transition, FlowError> {
    if matches!(event, Event::Action(UserAction::Reset)) {
        info!(from = state.name(), "🔄 flow reset");
        return Ok(Transition::to(FlowState::reset()));
    }

    match state {
        FlowState::Idle => match event {
            Event::Action(UserAction::StartCarousel) => {
                Ok(Transition::to(FlowState::Carousel(CarouselState::start())))
            }
            Event::Action(UserAction::StartEdit) => {
                Ok(Transition::to(FlowState::Edit(EditState::start())))
            }
            Event::Action(UserAction::StartDemo) => {
                Ok(Transition::to(FlowState::Demo(DemoState::start())))
            }
            ref other => Err(invalid(state, other)),
        },
        FlowState::Carousel(s) => carousel::apply(state, s, event, cfg, now),
        FlowState::Edit(s) => edit::apply(state, s, event, cfg),
        FlowState::Demo(s) => demo::apply(state, s, event, cfg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reset_is_valid_from_every_state() {
        let states = [
            FlowState::Idle,
            FlowState::Carousel(CarouselState::start()),
            FlowState::Edit(EditState::start()),
            FlowState::Demo(DemoState::start()),
        ];
        let cfg = FlowConfig::default();
        for state in states {
            let t = apply(&state, Event::Action(UserAction::Reset), &cfg, Utc::now()).unwrap();
            assert_eq!(t.next, FlowState::Idle);
            assert_eq!(t.command, None);
        }
    }

    #[test]
    fn idle_rejects_non_start_events() {
        let cfg = FlowConfig::default();
        let events = [
            Event::TextReceived("hello".into()),
            Event::PhotoReceived {
                url: "u".into(),
                file_id: None,
                caption: None,
            },
            Event::Action(UserAction::Finish),
            Event::Action(UserAction::Regenerate),
            Event::GenerationFailed,
        ];
        for event in events {
            let err = apply(&FlowState::Idle, event, &cfg, Utc::now()).unwrap_err();
            assert!(matches!(err, FlowError::InvalidTransition { state: "Idle", .. }));
        }
    }

    #[test]
    fn only_session_states_carry_a_lock() {
        let cfg = FlowConfig::default();
        assert!(FlowState::Idle.session_lock().is_none());
        assert!(FlowState::Demo(DemoState::start()).session_lock().is_none());
        let mut state = FlowState::Carousel(CarouselState::start());
        state = apply(
            &state,
            Event::PhotoReceived {
                url: "https://img/bottle".into(),
                file_id: None,
                caption: None,
            },
            &cfg,
            Utc::now(),
        )
        .unwrap()
        .next;
        assert!(state.session_lock().is_none());
        state = apply(
            &state,
            Event::TextReceived("create a card".into()),
            &cfg,
            Utc::now(),
        )
        .unwrap()
        .next;
        assert!(state.session_lock().is_some());
    }

    #[test]
    fn idle_starts_each_flow_family() {
        let cfg = FlowConfig::default();
        let t = apply(
            &FlowState::Idle,
            Event::Action(UserAction::StartCarousel),
            &cfg,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.next.name(), "Carousel::WaitingPhoto");
        let t = apply(
            &FlowState::Idle,
            Event::Action(UserAction::StartDemo),
            &cfg,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.next.name(), "Demo::Welcome");
    }
}
