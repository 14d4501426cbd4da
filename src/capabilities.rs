use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ExternalServiceError;
use crate::intent::Intent;
use crate::models::{AspectRatio, GeneratedImage, ImageRole};

/// Host-side user identifier (chat platforms hand out numeric ids).
pub type UserId = i64;

/// Role and caption detected for one input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAnnotation {
    pub role: ImageRole,
    pub description: Option<String>,
}

/// Vision collaborator. Ambiguous input must come back as
/// `ImageRole::Unknown`, not as an error; errors are reserved for transport
/// or service failures, which the orchestrator degrades anyway.
#[async_trait]
pub trait VisionCapability: Send + Sync {
    async fn classify(&self, image_url: &str) -> Result<ImageAnnotation, ExternalServiceError>;
}

/// Image-generation collaborator. Receives the synthesized prompt and the
/// registry's ordered image URLs; order is load-bearing (prompts refer to
/// images by position).
#[async_trait]
pub trait ImageGeneration: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        image_urls: &[String],
        aspect_ratio: AspectRatio,
    ) -> Result<GeneratedImage, ExternalServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub user_id: UserId,
    pub prompt: String,
    pub intent: Intent,
    pub cost: u32,
    pub created_at: DateTime<Utc>,
}

/// Credit and order persistence, implemented elsewhere. All-or-nothing from
/// this subsystem's viewpoint; called only after a fully successful
/// generation (except `credit_balance`, which gates the pipeline).
#[async_trait]
pub trait StorageCollaborator: Send + Sync {
    async fn credit_balance(&self, user_id: UserId) -> Result<u32, ExternalServiceError>;
    async fn debit_credits(&self, user_id: UserId, amount: u32)
        -> Result<(), ExternalServiceError>;
    async fn create_order(&self, order: OrderDraft) -> Result<Uuid, ExternalServiceError>;
}

#[async_trait]
impl<T: VisionCapability + ?Sized> VisionCapability for Arc<T> {
    async fn classify(&self, image_url: &str) -> Result<ImageAnnotation, ExternalServiceError> {
        (**self).classify(image_url).await
    }
}

#[async_trait]
impl<T: ImageGeneration + ?Sized> ImageGeneration for Arc<T> {
    async fn generate(
        &self,
        prompt: &str,
        image_urls: &[String],
        aspect_ratio: AspectRatio,
    ) -> Result<GeneratedImage, ExternalServiceError> {
        (**self).generate(prompt, image_urls, aspect_ratio).await
    }
}

#[async_trait]
impl<T: StorageCollaborator + ?Sized> StorageCollaborator for Arc<T> {
    async fn credit_balance(&self, user_id: UserId) -> Result<u32, ExternalServiceError> {
        (**self).credit_balance(user_id).await
    }

    async fn debit_credits(
        &self,
        user_id: UserId,
        amount: u32,
    ) -> Result<(), ExternalServiceError> {
        (**self).debit_credits(user_id, amount).await
    }

    async fn create_order(&self, order: OrderDraft) -> Result<Uuid, ExternalServiceError> {
        (**self).create_order(order).await
    }
}
