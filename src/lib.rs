//! Conversational orchestrator for multi-step product marketing image
//! generation. The chat transport looks up a session, feeds each incoming
//! message through [`flow::apply`], executes the returned command (usually a
//! run of the [`orchestrator::Orchestrator`] pipeline), persists the new
//! state, and renders it to the user. Transport, persistence, payments and
//! the concrete generative models live elsewhere; this crate owns the state
//! machine, the image registry, prompt synthesis and the pipeline sequencing.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod flow;
pub mod gemini;
pub mod intent;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod style;

pub use capabilities::{ImageAnnotation, ImageGeneration, StorageCollaborator, VisionCapability};
pub use config::{CreditCosts, FlowConfig};
pub use error::{ExternalServiceError, FlowError, ValidationError};
pub use flow::{apply, Command, Event, FlowState, Transition, UserAction};
pub use intent::{classify_intent, synthesize, Intent};
pub use models::{
    AspectRatio, GeneratedImage, GenerationOutcome, GenerationSlide, ImageInput, ImageRole,
    SessionLock, StyleReference,
};
pub use orchestrator::{GenerationRequest, Orchestrator};
pub use registry::ImageContextRegistry;
pub use store::{SessionId, SessionStore};
pub use style::StyleTracker;
