use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FlowConfig;
use crate::error::{FlowError, ValidationError};
use crate::models::{AspectRatio, SessionLock};
use crate::registry::ImageContextRegistry;

use super::{invalid, Command, Event, FlowState, GeneratedStep, GenerationJob, Transition, UserAction};

/// The guided attributes, in presentation order. Every step is skippable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoAttribute {
    Composition,
    VisualStyle,
    Atmosphere,
    Infographics,
    TextStyle,
    Headline,
}

impl DemoAttribute {
    pub const ALL: [DemoAttribute; 6] = [
        DemoAttribute::Composition,
        DemoAttribute::VisualStyle,
        DemoAttribute::Atmosphere,
        DemoAttribute::Infographics,
        DemoAttribute::TextStyle,
        DemoAttribute::Headline,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DemoAttribute::Composition => "Composition",
            DemoAttribute::VisualStyle => "Visual style",
            DemoAttribute::Atmosphere => "Atmosphere",
            DemoAttribute::Infographics => "Infographics",
            DemoAttribute::TextStyle => "Text style",
            DemoAttribute::Headline => "Headline",
        }
    }

    pub fn next(&self) -> Option<DemoAttribute> {
        let idx = Self::ALL.iter().position(|a| a == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

/// Accumulated attribute choices; skipped attributes stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoSelections {
    pub composition: Option<String>,
    pub visual_style: Option<String>,
    pub atmosphere: Option<String>,
    pub infographics: Option<String>,
    pub text_style: Option<String>,
    pub headline: Option<String>,
}

impl DemoSelections {
    pub fn set(&mut self, attribute: DemoAttribute, value: String) {
        let slot = match attribute {
            DemoAttribute::Composition => &mut self.composition,
            DemoAttribute::VisualStyle => &mut self.visual_style,
            DemoAttribute::Atmosphere => &mut self.atmosphere,
            DemoAttribute::Infographics => &mut self.infographics,
            DemoAttribute::TextStyle => &mut self.text_style,
            DemoAttribute::Headline => &mut self.headline,
        };
        *slot = Some(value);
    }

    pub fn get(&self, attribute: DemoAttribute) -> Option<&str> {
        match attribute {
            DemoAttribute::Composition => self.composition.as_deref(),
            DemoAttribute::VisualStyle => self.visual_style.as_deref(),
            DemoAttribute::Atmosphere => self.atmosphere.as_deref(),
            DemoAttribute::Infographics => self.infographics.as_deref(),
            DemoAttribute::TextStyle => self.text_style.as_deref(),
            DemoAttribute::Headline => self.headline.as_deref(),
        }
    }

    /// "Attribute: choice" lines for the synthesizer, in attribute order.
    pub fn lines(&self) -> Vec<String> {
        DemoAttribute::ALL
            .iter()
            .filter_map(|a| self.get(*a).map(|v| format!("{}: {v}", a.label())))
            .collect()
    }
}

/// Context carried through the whole demo flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoProgress {
    pub registry: ImageContextRegistry,
    pub selections: DemoSelections,
    pub extra_wishes: Option<String>,
    pub current: Option<GeneratedStep>,
    pub generation_count: u32,
    pub lock: SessionLock,
}

/// Demo steps: Welcome → WaitingPhoto → attribute steps (skippable) →
/// UserInput → Generating → Result → EditChoice (loops back) → Paywall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum DemoState {
    Welcome,
    WaitingPhoto {
        progress: DemoProgress,
    },
    Attribute {
        progress: DemoProgress,
        attribute: DemoAttribute,
        /// Reached from EditChoice: a new choice regenerates immediately
        /// instead of advancing to the next attribute.
        editing: bool,
    },
    UserInput {
        progress: DemoProgress,
    },
    Generating {
        progress: DemoProgress,
    },
    Result {
        progress: DemoProgress,
    },
    EditChoice {
        progress: DemoProgress,
    },
    Paywall {
        progress: DemoProgress,
    },
}

impl DemoState {
    pub fn start() -> Self {
        DemoState::Welcome
    }

    pub fn name(&self) -> &'static str {
        match self {
            DemoState::Welcome => "Demo::Welcome",
            DemoState::WaitingPhoto { .. } => "Demo::WaitingPhoto",
            DemoState::Attribute { .. } => "Demo::Attribute",
            DemoState::UserInput { .. } => "Demo::UserInput",
            DemoState::Generating { .. } => "Demo::Generating",
            DemoState::Result { .. } => "Demo::Result",
            DemoState::EditChoice { .. } => "Demo::EditChoice",
            DemoState::Paywall { .. } => "Demo::Paywall",
        }
    }

    pub fn session_lock(&self) -> Option<&SessionLock> {
        match self {
            DemoState::Welcome => None,
            DemoState::WaitingPhoto { progress }
            | DemoState::Attribute { progress, .. }
            | DemoState::UserInput { progress }
            | DemoState::Generating { progress }
            | DemoState::Result { progress }
            | DemoState::EditChoice { progress }
            | DemoState::Paywall { progress } => Some(&progress.lock),
        }
    }
}

fn demo_job(progress: &DemoProgress, cfg: &FlowConfig) -> GenerationJob {
    GenerationJob {
        text: progress.extra_wishes.clone().unwrap_or_default(),
        registry: progress.registry.clone(),
        style: None,
        prior_slides: vec![],
        attribute_lines: progress.selections.lines(),
        edit_of_existing: false,
        aspect_ratio: AspectRatio::Portrait,
        credit_cost: cfg.credit_costs.demo,
    }
}

/// Moves into `Generating`, enforcing the per-flow generation cap. The
/// budget is only consumed when a result comes back, so failed attempts
/// stay retryable.
fn start_generation(
    progress: DemoProgress,
    cfg: &FlowConfig,
) -> Result<Transition, FlowError> {
    if progress.generation_count as usize >= cfg.max_steps {
        return Err(ValidationError::TooManySteps {
            max: cfg.max_steps,
        }
        .into());
    }
    let job = demo_job(&progress, cfg);
    info!(attempt = progress.generation_count + 1, "🎬 demo generation started");
    Ok(Transition::with(
        FlowState::Demo(DemoState::Generating { progress }),
        Command::RunGeneration(job),
    ))
}

fn advance_from(
    progress: DemoProgress,
    attribute: DemoAttribute,
    cfg: &FlowConfig,
) -> Result<Transition, FlowError> {
    match attribute.next() {
        Some(next) => Ok(Transition::to(FlowState::Demo(DemoState::Attribute {
            progress,
            attribute: next,
            editing: false,
        }))),
        None => {
            // All attributes visited; if a result already exists the user is
            // re-editing and we regenerate right away.
            if progress.current.is_some() {
                start_generation(progress, cfg)
            } else {
                Ok(Transition::to(FlowState::Demo(DemoState::UserInput {
                    progress,
                })))
            }
        }
    }
}

pub(super) fn apply(
    outer: &FlowState,
    state: &DemoState,
    event: Event,
    cfg: &FlowConfig,
) -> Result<Transition, FlowError> {
    match (state, event) {
        (DemoState::Welcome, Event::Action(UserAction::NextStep)) => {
            Ok(Transition::to(FlowState::Demo(DemoState::WaitingPhoto {
                progress: DemoProgress::default(),
            })))
        }
        (DemoState::WaitingPhoto { progress }, Event::PhotoReceived { url, caption, .. }) => {
            let mut progress = progress.clone();
            progress.registry.add_image(url, caption, cfg)?;
            Ok(Transition::to(FlowState::Demo(DemoState::Attribute {
                progress,
                attribute: DemoAttribute::Composition,
                editing: false,
            })))
        }
        (
            DemoState::Attribute { progress, attribute, editing },
            Event::PhotoReceived { url, caption, .. },
        ) => {
            let mut progress = progress.clone();
            progress.registry.add_image(url, caption, cfg)?;
            Ok(Transition::to(FlowState::Demo(DemoState::Attribute {
                progress,
                attribute: *attribute,
                editing: *editing,
            })))
        }
        (DemoState::Attribute { progress, attribute, editing }, Event::TextReceived(choice)) => {
            let choice = choice.trim().to_string();
            if choice.is_empty() {
                return Err(ValidationError::EmptyPrompt.into());
            }
            let mut progress = progress.clone();
            progress.selections.set(*attribute, choice);
            if *editing {
                start_generation(progress, cfg)
            } else {
                advance_from(progress, *attribute, cfg)
            }
        }
        (DemoState::Attribute { progress, attribute, editing }, Event::Action(UserAction::Skip)) => {
            if *editing {
                // Nothing changed; back to the choice menu.
                return Ok(Transition::to(FlowState::Demo(DemoState::EditChoice {
                    progress: progress.clone(),
                })));
            }
            advance_from(progress.clone(), *attribute, cfg)
        }
        (DemoState::UserInput { progress }, Event::TextReceived(wishes)) => {
            let wishes = wishes.trim().to_string();
            let mut progress = progress.clone();
            if !wishes.is_empty() {
                progress.extra_wishes = Some(wishes);
            }
            start_generation(progress, cfg)
        }
        (DemoState::UserInput { progress }, Event::Action(UserAction::Skip)) => {
            start_generation(progress.clone(), cfg)
        }
        (DemoState::Generating { progress }, Event::GenerationSucceeded(step)) => {
            let mut progress = progress.clone();
            progress.current = Some(step);
            progress.generation_count += 1;
            Ok(Transition::to(FlowState::Demo(DemoState::Result {
                progress,
            })))
        }
        (DemoState::Generating { progress }, Event::GenerationFailed) => {
            // Back to the step the generation was launched from.
            if progress.current.is_some() {
                Ok(Transition::to(FlowState::Demo(DemoState::EditChoice {
                    progress: progress.clone(),
                })))
            } else {
                Ok(Transition::to(FlowState::Demo(DemoState::UserInput {
                    progress: progress.clone(),
                })))
            }
        }
        (DemoState::Result { progress }, Event::Action(UserAction::NextStep)) => {
            Ok(Transition::to(FlowState::Demo(DemoState::EditChoice {
                progress: progress.clone(),
            })))
        }
        (DemoState::Result { progress }, Event::Action(UserAction::Regenerate)) => {
            start_generation(progress.clone(), cfg)
        }
        (DemoState::Result { progress }, Event::Action(UserAction::Finish)) => {
            info!("💳 demo complete, showing paywall");
            Ok(Transition::to(FlowState::Demo(DemoState::Paywall {
                progress: progress.clone(),
            })))
        }
        (DemoState::EditChoice { progress }, Event::Action(UserAction::SelectAttribute(attr))) => {
            Ok(Transition::to(FlowState::Demo(DemoState::Attribute {
                progress: progress.clone(),
                attribute: attr,
                editing: true,
            })))
        }
        (DemoState::EditChoice { progress }, Event::Action(UserAction::Finish)) => {
            info!("💳 demo complete, showing paywall");
            Ok(Transition::to(FlowState::Demo(DemoState::Paywall {
                progress: progress.clone(),
            })))
        }
        (_, ref event) => Err(invalid(outer, event)),
    }
}
