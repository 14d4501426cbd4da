use chrono::Utc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::capabilities::{
    ImageGeneration, OrderDraft, StorageCollaborator, UserId, VisionCapability,
};
use crate::config::FlowConfig;
use crate::error::{ExternalServiceError, FlowError, ValidationError};
use crate::intent::{synthesize, SynthesisInput};
use crate::models::{
    AspectRatio, GenerationOutcome, GenerationSlide, ImageInput, SessionLock, StyleReference,
};
use crate::registry::ImageContextRegistry;

/// Everything one pipeline run needs, assembled by the transport layer from
/// the current flow state. "Regenerate" is a fresh request built from the
/// same inputs, never a mutation of an in-flight call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: UserId,
    pub text: String,
    pub registry: ImageContextRegistry,
    pub style: Option<StyleReference>,
    pub prior_slides: Vec<GenerationSlide>,
    pub attribute_lines: Vec<String>,
    pub edit_of_existing: bool,
    pub aspect_ratio: AspectRatio,
    pub credit_cost: u32,
}

/// Sequences the three pipeline stages (visual analysis → prompt synthesis →
/// image generation) for one session, holding that session's lock for the
/// duration. Different sessions are fully independent.
pub struct Orchestrator<V, G, S> {
    vision: V,
    generator: G,
    storage: S,
    config: FlowConfig,
}

impl<V, G, S> Orchestrator<V, G, S>
where
    V: VisionCapability,
    G: ImageGeneration,
    S: StorageCollaborator,
{
    pub fn new(vision: V, generator: G, storage: S, config: FlowConfig) -> Self {
        Self {
            vision,
            generator,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Runs one generation. Local validation happens first; the lock is taken
    /// before any storage call, so a busy session is reported as busy rather
    /// than as whatever the credit check would have said. Every non-success
    /// path after acquisition releases the lock. Credits are debited and the
    /// order recorded only after the capability returned a usable image.
    pub async fn generate(
        &self,
        lock: &SessionLock,
        request: &GenerationRequest,
    ) -> Result<GenerationOutcome, FlowError> {
        let ordered_urls = request.registry.ordered_urls(
            request.style.as_ref(),
            &request.prior_slides,
            &self.config,
        )?;
        if ordered_urls.is_empty() {
            return Err(ValidationError::MissingPhoto.into());
        }

        lock.try_acquire(Utc::now(), self.config.lock_timeout)?;

        let available = match self.storage.credit_balance(request.user_id).await {
            Ok(available) => available,
            Err(e) => {
                lock.release();
                return Err(e.into());
            }
        };
        if available < request.credit_cost {
            lock.release();
            return Err(ValidationError::InsufficientCredits {
                required: request.credit_cost,
                available,
            }
            .into());
        }

        info!(user = request.user_id, images = ordered_urls.len(), "🚀 pipeline started");

        let result = self.run_pipeline(request, &ordered_urls).await;
        lock.release();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(user = request.user_id, error = %e, "❌ pipeline failed");
                return Err(e);
            }
        };

        self.storage
            .debit_credits(request.user_id, request.credit_cost)
            .await?;
        let order_id = self
            .storage
            .create_order(OrderDraft {
                user_id: request.user_id,
                prompt: outcome.prompt.clone(),
                intent: outcome.intent,
                cost: request.credit_cost,
                created_at: Utc::now(),
            })
            .await?;
        info!(user = request.user_id, %order_id, "✅ generation complete, order recorded");
        Ok(outcome)
    }

    async fn run_pipeline(
        &self,
        request: &GenerationRequest,
        ordered_urls: &[String],
    ) -> Result<GenerationOutcome, FlowError> {
        let classified = self.analyze_images(request.registry.images()).await;

        let prior_prompts: Vec<String> = request
            .prior_slides
            .iter()
            .map(|s| s.prompt.clone())
            .collect();
        let synthesized = synthesize(
            &SynthesisInput {
                text: &request.text,
                images: &classified,
                style: request.style.as_ref(),
                prior_prompts: &prior_prompts,
                attribute_lines: &request.attribute_lines,
                edit_of_existing: request.edit_of_existing,
                aspect_ratio: request.aspect_ratio,
            },
            &self.config,
        )?;

        let image = match timeout(
            self.config.generation_timeout,
            self.generator
                .generate(&synthesized.final_prompt, ordered_urls, request.aspect_ratio),
        )
        .await
        {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(ExternalServiceError::Timeout { stage: "generation" }.into());
            }
        };
        if image.bytes.is_empty() {
            return Err(ExternalServiceError::Generation("empty image returned".into()).into());
        }

        Ok(GenerationOutcome {
            image,
            prompt: synthesized.final_prompt,
            intent: synthesized.intent,
            style_summary: synthesized.style_summary,
        })
    }

    /// Best-effort visual analysis. Each classification runs under its own
    /// timeout; a failure or timeout leaves that image with its collected
    /// (usually `Unknown`) role and never aborts the pipeline.
    async fn analyze_images(&self, images: &[ImageInput]) -> Vec<ImageInput> {
        let mut classified = Vec::with_capacity(images.len());
        for image in images {
            let annotated = match timeout(
                self.config.vision_timeout,
                self.vision.classify(&image.url),
            )
            .await
            {
                Ok(Ok(annotation)) => image.classified(annotation.role, annotation.description),
                Ok(Err(e)) => {
                    warn!(url = %image.url, error = %e, "⚠️ vision failed, keeping unknown role");
                    image.clone()
                }
                Err(_) => {
                    warn!(url = %image.url, "⚠️ vision timed out, keeping unknown role");
                    image.clone()
                }
            };
            classified.push(annotated);
        }
        classified
    }
}
