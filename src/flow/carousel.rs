use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FlowConfig;
use crate::error::{FlowError, ValidationError};
use crate::models::{AspectRatio, GenerationSlide, SessionLock};
use crate::registry::ImageContextRegistry;
use crate::style::StyleTracker;

use super::{invalid, Command, Event, FlowState, GeneratedStep, GenerationJob, Transition, UserAction};

/// Running carousel context: the append-only slide list, the captured style,
/// the images and instruction of the step currently being worked on, and the
/// advisory generation lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarouselSession {
    pub registry: ImageContextRegistry,
    pub prompt: String,
    pub slides: Vec<GenerationSlide>,
    pub style: StyleTracker,
    pub current: Option<GeneratedStep>,
    pub lock: SessionLock,
}

/// Carousel steps: WaitingPhoto → WaitingPrompt → Session ⇄ NextSlide → finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CarouselState {
    WaitingPhoto { registry: ImageContextRegistry },
    WaitingPrompt { registry: ImageContextRegistry },
    Session(CarouselSession),
    NextSlide(CarouselSession),
}

impl CarouselState {
    pub fn start() -> Self {
        CarouselState::WaitingPhoto {
            registry: ImageContextRegistry::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CarouselState::WaitingPhoto { .. } => "Carousel::WaitingPhoto",
            CarouselState::WaitingPrompt { .. } => "Carousel::WaitingPrompt",
            CarouselState::Session(_) => "Carousel::Session",
            CarouselState::NextSlide(_) => "Carousel::NextSlide",
        }
    }

    pub fn session_lock(&self) -> Option<&SessionLock> {
        match self {
            CarouselState::WaitingPhoto { .. } | CarouselState::WaitingPrompt { .. } => None,
            CarouselState::Session(s) | CarouselState::NextSlide(s) => Some(&s.lock),
        }
    }
}

fn generation_job(session: &CarouselSession, cfg: &FlowConfig) -> GenerationJob {
    GenerationJob {
        text: session.prompt.clone(),
        registry: session.registry.clone(),
        style: session.style.current().cloned(),
        prior_slides: session.slides.clone(),
        attribute_lines: vec![],
        edit_of_existing: false,
        aspect_ratio: AspectRatio::Portrait,
        credit_cost: cfg.credit_costs.carousel_slide,
    }
}

/// Appends the pending result as slide N+1 and captures the style reference
/// if this was the first finalize.
fn finalize_current(session: &mut CarouselSession, now: DateTime<Utc>) {
    let Some(current) = session.current.take() else {
        return;
    };
    let slide = GenerationSlide {
        step_number: session.slides.len() as u32 + 1,
        image_url: current.image_url,
        image_file_id: current.image_file_id,
        prompt: current.prompt,
        style: current.style_summary,
        generated_at: now,
    };
    session.style.capture_from(&slide);
    info!(step = slide.step_number, "📌 slide finalized");
    session.slides.push(slide);
}

pub(super) fn apply(
    outer: &FlowState,
    state: &CarouselState,
    event: Event,
    cfg: &FlowConfig,
    now: DateTime<Utc>,
) -> Result<Transition, FlowError> {
    match (state, event) {
        (CarouselState::WaitingPhoto { registry }, Event::PhotoReceived { url, caption, .. }) => {
            let mut registry = registry.clone();
            registry.add_image(url, caption, cfg)?;
            Ok(Transition::to(FlowState::Carousel(
                CarouselState::WaitingPrompt { registry },
            )))
        }
        (CarouselState::WaitingPrompt { registry }, Event::PhotoReceived { url, caption, .. }) => {
            let mut registry = registry.clone();
            registry.add_image(url, caption, cfg)?;
            Ok(Transition::to(FlowState::Carousel(
                CarouselState::WaitingPrompt { registry },
            )))
        }
        (CarouselState::WaitingPrompt { registry }, Event::TextReceived(text)) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(ValidationError::EmptyPrompt.into());
            }
            let session = CarouselSession {
                registry: registry.clone(),
                prompt: text,
                slides: Vec::new(),
                style: StyleTracker::new(),
                current: None,
                lock: SessionLock::new(),
            };
            let job = generation_job(&session, cfg);
            Ok(Transition::with(
                FlowState::Carousel(CarouselState::Session(session)),
                Command::RunGeneration(job),
            ))
        }
        (CarouselState::Session(session), Event::GenerationSucceeded(step)) => {
            let mut session = session.clone();
            session.current = Some(step);
            Ok(Transition::to(FlowState::Carousel(CarouselState::Session(
                session,
            ))))
        }
        (CarouselState::Session(session), Event::GenerationFailed) => {
            // Nothing generated yet: fall back to the prompt step with the
            // collected images intact so the user can retry. Otherwise keep
            // showing the previous result.
            if session.current.is_none() && session.slides.is_empty() {
                return Ok(Transition::to(FlowState::Carousel(
                    CarouselState::WaitingPrompt {
                        registry: session.registry.clone(),
                    },
                )));
            }
            Ok(Transition::to(FlowState::Carousel(CarouselState::Session(
                session.clone(),
            ))))
        }
        (CarouselState::Session(session), Event::TextReceived(text)) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(ValidationError::EmptyPrompt.into());
            }
            let mut session = session.clone();
            session.prompt = text;
            let job = generation_job(&session, cfg);
            Ok(Transition::with(
                FlowState::Carousel(CarouselState::Session(session)),
                Command::RunGeneration(job),
            ))
        }
        (CarouselState::Session(session), Event::Action(UserAction::Regenerate)) => {
            let job = generation_job(session, cfg);
            Ok(Transition::with(
                FlowState::Carousel(CarouselState::Session(session.clone())),
                Command::RunGeneration(job),
            ))
        }
        (CarouselState::Session(session), Event::Action(UserAction::NextStep)) => {
            if session.current.is_none() {
                return Err(invalid(outer, &Event::Action(UserAction::NextStep)));
            }
            if session.slides.len() >= cfg.max_steps {
                return Err(ValidationError::TooManySteps {
                    max: cfg.max_steps,
                }
                .into());
            }
            let mut session = session.clone();
            finalize_current(&mut session, now);
            // Each slide starts from its own images; style and prior slides
            // carry the context forward.
            session.registry = ImageContextRegistry::new();
            session.prompt.clear();
            Ok(Transition::to(FlowState::Carousel(
                CarouselState::NextSlide(session),
            )))
        }
        (CarouselState::Session(session), Event::Action(UserAction::Finish)) => {
            let mut session = session.clone();
            finalize_current(&mut session, now);
            if session.slides.is_empty() {
                return Err(invalid(outer, &Event::Action(UserAction::Finish)));
            }
            info!(slides = session.slides.len(), "🏁 carousel finished");
            Ok(Transition::with(
                FlowState::Idle,
                Command::DeliverSlides(session.slides),
            ))
        }
        (CarouselState::NextSlide(session), Event::PhotoReceived { url, caption, .. }) => {
            let mut session = session.clone();
            session.registry.add_image(url, caption, cfg)?;
            Ok(Transition::to(FlowState::Carousel(
                CarouselState::NextSlide(session),
            )))
        }
        (CarouselState::NextSlide(session), Event::TextReceived(text)) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(ValidationError::EmptyPrompt.into());
            }
            let mut session = session.clone();
            session.prompt = text;
            let job = generation_job(&session, cfg);
            Ok(Transition::with(
                FlowState::Carousel(CarouselState::Session(session)),
                Command::RunGeneration(job),
            ))
        }
        (CarouselState::NextSlide(session), Event::Action(UserAction::Finish)) => {
            info!(slides = session.slides.len(), "🏁 carousel finished");
            Ok(Transition::with(
                FlowState::Idle,
                Command::DeliverSlides(session.slides.clone()),
            ))
        }
        (_, ref event) => Err(invalid(outer, event)),
    }
}
