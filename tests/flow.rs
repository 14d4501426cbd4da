//! End-to-end scenarios: a miniature transport layer drives the state
//! machine, executes emitted commands against the orchestrator with stub
//! capabilities, and feeds completion events back in.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use promo_studio::capabilities::{ImageAnnotation, OrderDraft, UserId};
use promo_studio::flow::{self, Command, Event, FlowState, GeneratedStep, UserAction};
use promo_studio::{
    ExternalServiceError, FlowConfig, FlowError, GeneratedImage, ImageGeneration, ImageRole,
    Orchestrator, StorageCollaborator, ValidationError, VisionCapability,
};
use promo_studio::models::AspectRatio;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct RecordingVision;

#[async_trait]
impl VisionCapability for RecordingVision {
    async fn classify(&self, image_url: &str) -> Result<ImageAnnotation, ExternalServiceError> {
        let role = if image_url.contains("template") {
            ImageRole::StyleReference
        } else {
            ImageRole::Product
        };
        Ok(ImageAnnotation {
            role,
            description: None,
        })
    }
}

#[derive(Default)]
struct RecordingGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageGeneration for RecordingGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _image_urls: &[String],
        _aspect_ratio: AspectRatio,
    ) -> Result<GeneratedImage, ExternalServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        Ok(GeneratedImage {
            bytes: Bytes::from_static(b"png"),
            mime_type: "image/png".into(),
        })
    }
}

struct FixedStorage {
    balance: u32,
    debited: AtomicUsize,
}

#[async_trait]
impl StorageCollaborator for FixedStorage {
    async fn credit_balance(&self, _user_id: UserId) -> Result<u32, ExternalServiceError> {
        Ok(self.balance)
    }

    async fn debit_credits(
        &self,
        _user_id: UserId,
        amount: u32,
    ) -> Result<(), ExternalServiceError> {
        self.debited.fetch_add(amount as usize, Ordering::SeqCst);
        Ok(())
    }

    async fn create_order(&self, _order: OrderDraft) -> Result<Uuid, ExternalServiceError> {
        Ok(Uuid::new_v4())
    }
}

struct Harness {
    orchestrator: Orchestrator<RecordingVision, Arc<RecordingGenerator>, FixedStorage>,
    generator: Arc<RecordingGenerator>,
    cfg: FlowConfig,
    state: FlowState,
    uploads: usize,
}

impl Harness {
    fn new(balance: u32) -> Self {
        init_tracing();
        let generator = Arc::new(RecordingGenerator::default());
        let cfg = FlowConfig::default();
        Self {
            orchestrator: Orchestrator::new(
                RecordingVision,
                generator.clone(),
                FixedStorage {
                    balance,
                    debited: AtomicUsize::new(0),
                },
                cfg.clone(),
            ),
            generator,
            cfg,
            state: FlowState::Idle,
            uploads: 0,
        }
    }

    /// One transport turn: transition, persist, execute the command, feed
    /// the completion event back in. The generation lock comes out of the
    /// persisted state itself; cloning it shares the cell.
    async fn send(&mut self, event: Event) -> Result<(), FlowError> {
        let transition = flow::apply(&self.state, event, &self.cfg, Utc::now())?;
        self.state = transition.next;
        match transition.command {
            Some(Command::RunGeneration(job)) => {
                let lock = self.state.session_lock().cloned().unwrap_or_default();
                let request = job.into_request(7);
                let completion = match self.orchestrator.generate(&lock, &request).await {
                    Ok(outcome) => {
                        self.uploads += 1;
                        Event::GenerationSucceeded(GeneratedStep {
                            image_url: format!("https://cdn/gen-{}", self.uploads),
                            image_file_id: None,
                            prompt: outcome.prompt,
                            style_summary: outcome.style_summary,
                        })
                    }
                    Err(e) => {
                        let t =
                            flow::apply(&self.state, Event::GenerationFailed, &self.cfg, Utc::now())?;
                        self.state = t.next;
                        return Err(e);
                    }
                };
                let t = flow::apply(&self.state, completion, &self.cfg, Utc::now())?;
                self.state = t.next;
            }
            Some(Command::DeliverSlides(_)) | None => {}
        }
        Ok(())
    }
}

fn photo(url: &str) -> Event {
    Event::PhotoReceived {
        url: url.into(),
        file_id: None,
        caption: None,
    }
}

#[tokio::test]
async fn happy_path_carousel_produces_one_slide() {
    let mut h = Harness::new(20);
    h.send(Event::Action(UserAction::StartCarousel)).await.unwrap();
    h.send(photo("https://img/bottle")).await.unwrap();
    h.send(Event::TextReceived(
        "create a card for a blue water bottle".into(),
    ))
    .await
    .unwrap();
    h.send(Event::Action(UserAction::NextStep)).await.unwrap();

    let FlowState::Carousel(flow::CarouselState::NextSlide(session)) = &h.state else {
        panic!("expected NextSlide, got {:?}", h.state);
    };
    assert_eq!(session.slides.len(), 1);
    assert_eq!(session.slides[0].step_number, 1);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    // The lock lives in the session state and was released after the run.
    assert!(!session.lock.is_generating());
}

#[tokio::test]
async fn style_propagates_verbatim_into_the_second_slide_prompt() {
    let mut h = Harness::new(100);
    h.send(Event::Action(UserAction::StartCarousel)).await.unwrap();
    h.send(photo("https://img/bottle")).await.unwrap();
    h.send(Event::TextReceived("dark premium background".into()))
        .await
        .unwrap();
    h.send(Event::Action(UserAction::NextStep)).await.unwrap();
    h.send(Event::TextReceived("now show the cap close up".into()))
        .await
        .unwrap();

    let prompts = h.generator.prompts.lock();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Keep the visual style consistent with: dark premium background"));
    assert!(prompts[1].contains("Prompts of earlier slides"));
}

#[tokio::test]
async fn finalize_round_trip_and_reset() {
    let mut h = Harness::new(100);
    h.send(Event::Action(UserAction::StartCarousel)).await.unwrap();
    h.send(photo("https://img/bottle")).await.unwrap();
    h.send(Event::TextReceived("slide one".into())).await.unwrap();
    h.send(Event::Action(UserAction::NextStep)).await.unwrap();
    h.send(Event::TextReceived("slide two".into())).await.unwrap();
    h.send(Event::Action(UserAction::NextStep)).await.unwrap();
    h.send(Event::TextReceived("slide three".into())).await.unwrap();
    h.send(Event::Action(UserAction::NextStep)).await.unwrap();

    let FlowState::Carousel(flow::CarouselState::NextSlide(session)) = &h.state else {
        panic!("expected NextSlide");
    };
    let numbers: Vec<u32> = session.slides.iter().map(|s| s.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    h.send(Event::Action(UserAction::Reset)).await.unwrap();
    assert_eq!(h.state, FlowState::Idle);
}

#[tokio::test]
async fn insufficient_credits_blocks_the_pipeline_and_keeps_the_step() {
    let mut h = Harness::new(2);
    h.send(Event::Action(UserAction::StartCarousel)).await.unwrap();
    h.send(photo("https://img/bottle")).await.unwrap();
    let err = h
        .send(Event::TextReceived("create a card".into()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FlowError::Validation(ValidationError::InsufficientCredits {
            required: 4,
            available: 2
        })
    );
    // No pipeline ran; the flow fell back to the prompt step with the photo
    // intact, so the user can retry after topping up.
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.state.name(), "Carousel::WaitingPrompt");
}

#[tokio::test]
async fn template_copy_intent_flows_through_the_pipeline() {
    let mut h = Harness::new(100);
    h.send(Event::Action(UserAction::StartCarousel)).await.unwrap();
    h.send(photo("https://img/bottle")).await.unwrap();
    h.send(photo("https://img/template-card")).await.unwrap();
    h.send(Event::TextReceived(
        "поставь мой товар на эту карточку".into(),
    ))
    .await
    .unwrap();

    let prompts = h.generator.prompts.lock();
    assert!(prompts[0].contains("Recreate the reference card's layout"));
    assert!(prompts[0].contains("IMAGE 2 = style_reference"));
}

#[test]
fn invalid_pairs_are_rejected_exhaustively() {
    let cfg = FlowConfig::default();
    let states = [
        FlowState::Idle,
        FlowState::Carousel(flow::CarouselState::start()),
        FlowState::Edit(flow::EditState::start()),
        FlowState::Demo(flow::DemoState::start()),
    ];
    let events = [
        Event::TextReceived("text".into()),
        Event::Action(UserAction::Finish),
        Event::Action(UserAction::Regenerate),
        Event::Action(UserAction::NextStep),
        Event::Action(UserAction::Skip),
        Event::Action(UserAction::SelectAttribute(flow::DemoAttribute::Headline)),
        Event::GenerationSucceeded(GeneratedStep {
            image_url: "u".into(),
            image_file_id: None,
            prompt: "p".into(),
            style_summary: None,
        }),
        Event::GenerationFailed,
    ];
    for state in &states {
        for event in &events {
            // Demo::Welcome accepts NextStep; everything else in this grid is
            // invalid for these entry states.
            if matches!(state, FlowState::Demo(flow::DemoState::Welcome))
                && matches!(event, Event::Action(UserAction::NextStep))
            {
                continue;
            }
            let result = flow::apply(state, event.clone(), &cfg, Utc::now());
            assert!(
                matches!(result, Err(FlowError::InvalidTransition { .. })),
                "expected InvalidTransition for {} + {}",
                state.name(),
                event.name()
            );
        }
    }
}

#[tokio::test]
async fn demo_flow_reaches_paywall() {
    let mut h = Harness::new(100);
    h.send(Event::Action(UserAction::StartDemo)).await.unwrap();
    h.send(Event::Action(UserAction::NextStep)).await.unwrap();
    h.send(photo("https://img/bottle")).await.unwrap();
    h.send(Event::TextReceived("product centered".into())).await.unwrap();
    for _ in 0..5 {
        h.send(Event::Action(UserAction::Skip)).await.unwrap();
    }
    h.send(Event::TextReceived("make it pop".into())).await.unwrap();
    assert_eq!(h.state.name(), "Demo::Result");
    h.send(Event::Action(UserAction::Finish)).await.unwrap();
    assert_eq!(h.state.name(), "Demo::Paywall");

    let prompts = h.generator.prompts.lock();
    assert!(prompts[0].contains("- Composition: product centered"));
    assert!(prompts[0].contains("User instruction: make it pop"));
}
