use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{GenerationSlide, StyleReference};

/// Captures the style of the first finalized step and carries it forward so
/// later steps reproduce the same visual language. Write-once: a second
/// capture is a no-op returning the existing reference. Only a full flow
/// reset discards it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleTracker {
    current: Option<StyleReference>,
}

impl StyleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_from(&mut self, finalized: &GenerationSlide) -> &StyleReference {
        if self.current.is_none() {
            let style_description = finalized
                .style
                .clone()
                .unwrap_or_else(|| finalized.prompt.clone());
            info!(step = finalized.step_number, style = %style_description,
                "🎨 style reference captured");
            self.current = Some(StyleReference {
                image_url: finalized.image_url.clone(),
                style_description,
            });
        }
        self.current.as_ref().unwrap_or_else(|| unreachable!())
    }

    pub fn current(&self) -> Option<&StyleReference> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn slide(n: u32, url: &str, style: Option<&str>) -> GenerationSlide {
        GenerationSlide {
            step_number: n,
            image_url: url.to_string(),
            image_file_id: None,
            prompt: format!("prompt {n}"),
            style: style.map(str::to_string),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn capture_is_write_once() {
        let mut tracker = StyleTracker::new();
        tracker.capture_from(&slide(1, "one", Some("dark premium background")));
        tracker.capture_from(&slide(2, "two", Some("bright minimal")));
        let current = tracker.current().unwrap();
        assert_eq!(current.image_url, "one");
        assert_eq!(current.style_description, "dark premium background");
    }

    #[test]
    fn capture_falls_back_to_prompt() {
        let mut tracker = StyleTracker::new();
        tracker.capture_from(&slide(1, "one", None));
        assert_eq!(tracker.current().unwrap().style_description, "prompt 1");
    }
}
