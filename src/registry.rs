use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FlowConfig;
use crate::error::ValidationError;
use crate::models::{GenerationSlide, ImageInput, ImageRole, StyleReference};

/// Images collected for the current generation call. Roles start `Unknown`;
/// the orchestrator's analysis stage classifies copies of these entries, the
/// collected inputs themselves are never rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContextRegistry {
    images: Vec<ImageInput>,
}

impl ImageContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the next image. Rejects anything past the per-call cap
    /// instead of silently truncating.
    pub fn add_image(
        &mut self,
        url: impl Into<String>,
        description: Option<String>,
        cfg: &FlowConfig,
    ) -> Result<&ImageInput, ValidationError> {
        if self.images.len() >= cfg.max_images {
            return Err(ValidationError::TooManyImages {
                max: cfg.max_images,
            });
        }
        let input = ImageInput {
            url: url.into(),
            description,
            role: ImageRole::Unknown,
            index: self.images.len() as u32,
        };
        info!(index = input.index, url = %input.url, "📎 image attached");
        self.images.push(input);
        Ok(self.images.last().unwrap_or_else(|| unreachable!()))
    }

    pub fn images(&self) -> &[ImageInput] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Deterministic URL order handed to the generation capability:
    /// this step's own images, then the captured style-reference image, then
    /// prior finalized step images oldest first. Synthesized prompts refer to
    /// images by position, so this order must not change independently of
    /// the synthesizer.
    pub fn ordered_urls(
        &self,
        style: Option<&StyleReference>,
        prior_slides: &[GenerationSlide],
        cfg: &FlowConfig,
    ) -> Result<Vec<String>, ValidationError> {
        let mut urls: Vec<String> = self.images.iter().map(|i| i.url.clone()).collect();
        if let Some(style) = style {
            urls.push(style.image_url.clone());
        }
        for slide in prior_slides {
            urls.push(slide.image_url.clone());
        }
        if urls.len() > cfg.max_images {
            return Err(ValidationError::TooManyImages {
                max: cfg.max_images,
            });
        }
        Ok(urls)
    }
}
