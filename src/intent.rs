use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FlowConfig;
use crate::error::ValidationError;
use crate::models::{AspectRatio, ImageInput, ImageRole, StyleReference};

/// What the user is asking the generator to do, detected from the message
/// text and the attached image roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateNew,
    StyleTransfer,
    TemplateCopy,
    EditExisting,
}

/// "Put my product on this card / replace the product" signals. The bot's
/// audience writes both Russian and English, so both tables are checked.
const TEMPLATE_COPY_SIGNALS: &[&str] = &[
    "поставь",
    "помести",
    "вставь",
    "замени товар",
    "замени продукт",
    "на эту карточку",
    "на этот шаблон",
    "сделай такую же карточку",
    "replace the product",
    "swap the product",
    "put my product",
    "onto this card",
    "on this template",
    "same card but with my",
];

/// "In this style / like this example" signals.
const STYLE_TRANSFER_SIGNALS: &[&str] = &[
    "в этом стиле",
    "в таком стиле",
    "в таком же стиле",
    "как на этом примере",
    "похожий стиль",
    "in this style",
    "in the same style",
    "like this example",
    "in the style of",
];

fn matches_any(text: &str, signals: &[&str]) -> bool {
    signals.iter().any(|s| text.contains(s))
}

/// Applies the detection rules in precedence order, first match wins.
/// When template and style signals fire together, template wins: a layout
/// request subsumes a style request.
pub fn classify_intent(text: &str, images: &[ImageInput], edit_of_existing: bool) -> Intent {
    if edit_of_existing {
        return Intent::EditExisting;
    }
    let lowered = text.to_lowercase();
    let has_reference = images.len() >= 2
        || images
            .iter()
            .any(|i| matches!(i.role, ImageRole::StyleReference | ImageRole::Background));
    if has_reference && matches_any(&lowered, TEMPLATE_COPY_SIGNALS) {
        return Intent::TemplateCopy;
    }
    if has_reference && matches_any(&lowered, STYLE_TRANSFER_SIGNALS) {
        return Intent::StyleTransfer;
    }
    Intent::CreateNew
}

/// Everything the synthesizer needs for one generation call. The image list
/// is this step's own classified images; the style reference and prior
/// prompts describe the extra images the registry appends after them, in the
/// same order, so positional "IMAGE N" references line up.
#[derive(Debug)]
pub struct SynthesisInput<'a> {
    pub text: &'a str,
    pub images: &'a [ImageInput],
    pub style: Option<&'a StyleReference>,
    pub prior_prompts: &'a [String],
    /// Pre-rendered "Attribute: choice" lines from the demo flow.
    pub attribute_lines: &'a [String],
    pub edit_of_existing: bool,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedPrompt {
    pub final_prompt: String,
    pub intent: Intent,
    /// Short style seed carried onto the slide when this step is finalized.
    pub style_summary: Option<String>,
}

fn intent_header(intent: Intent) -> &'static str {
    match intent {
        Intent::CreateNew => {
            "Create a high-quality product marketing image from the inputs below."
        }
        Intent::StyleTransfer => {
            "Create a product marketing image that reproduces the visual style of the reference image."
        }
        Intent::TemplateCopy => {
            "Recreate the reference card's layout and composition, replacing its product with the user's product. Keep everything else as in the reference."
        }
        Intent::EditExisting => {
            "Edit the current image. Apply only the requested change and keep every other element intact."
        }
    }
}

/// Turns free-form user text, image roles, and prior-step context into one
/// final generation instruction. Fails closed: no images or an empty or
/// over-long instruction is rejected before any external capability sees it.
pub fn synthesize(
    input: &SynthesisInput<'_>,
    cfg: &FlowConfig,
) -> Result<SynthesizedPrompt, ValidationError> {
    if input.images.is_empty() && input.style.is_none() && input.prior_prompts.is_empty() {
        return Err(ValidationError::MissingPhoto);
    }
    let text = input.text.trim();
    if text.is_empty() && input.attribute_lines.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }
    let len = text.chars().count();
    if len > cfg.max_prompt_chars {
        return Err(ValidationError::PromptTooLong {
            len,
            max: cfg.max_prompt_chars,
        });
    }

    let intent = classify_intent(text, input.images, input.edit_of_existing);

    let mut lines: Vec<String> = vec![intent_header(intent).to_string()];

    lines.push(String::new());
    let mut position = 0u32;
    for image in input.images {
        position += 1;
        let mut line = format!("IMAGE {position} = {}", image.role.as_str());
        if let Some(desc) = &image.description {
            line.push_str(&format!(" ({desc})"));
        }
        lines.push(line);
    }
    if let Some(style) = input.style {
        position += 1;
        lines.push(format!(
            "IMAGE {position} = style reference, reproduce its visual language"
        ));
        lines.push(format!(
            "Keep the visual style consistent with: {}",
            style.style_description
        ));
    }
    for (i, _) in input.prior_prompts.iter().enumerate() {
        position += 1;
        lines.push(format!(
            "IMAGE {position} = previously finalized slide {}",
            i + 1
        ));
    }

    if !text.is_empty() {
        lines.push(String::new());
        lines.push(format!("User instruction: {text}"));
    }
    if !input.attribute_lines.is_empty() {
        lines.push(String::new());
        lines.push("Requested attributes:".to_string());
        for line in input.attribute_lines {
            lines.push(format!("- {line}"));
        }
    }
    if !input.prior_prompts.is_empty() {
        lines.push(String::new());
        lines.push("Prompts of earlier slides, keep the series coherent:".to_string());
        for (i, prompt) in input.prior_prompts.iter().enumerate() {
            lines.push(format!("{}. {prompt}", i + 1));
        }
    }

    lines.push(String::new());
    lines.push(format!("Target aspect ratio: {}.", input.aspect_ratio.as_str()));
    lines.push(
        "Photorealistic commercial quality, clean composition, no watermarks, no text artifacts."
            .to_string(),
    );

    // The first generation of a flow seeds the style that later steps keep.
    let style_summary = if !input.edit_of_existing && input.style.is_none() && !text.is_empty() {
        Some(text.to_string())
    } else {
        None
    };

    let final_prompt = lines.join("\n");
    info!(?intent, chars = final_prompt.len(), "🧩 prompt synthesized");
    Ok(SynthesizedPrompt {
        final_prompt,
        intent,
        style_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn image(index: u32, role: ImageRole) -> ImageInput {
        ImageInput {
            url: format!("https://img/{index}"),
            description: None,
            role,
            index,
        }
    }

    #[test]
    fn russian_template_copy_is_detected() {
        let images = vec![image(0, ImageRole::Product), image(1, ImageRole::Unknown)];
        let intent = classify_intent("поставь мой товар на эту карточку", &images, false);
        assert_eq!(intent, Intent::TemplateCopy);
    }

    #[test]
    fn style_transfer_needs_a_reference_image() {
        let one = vec![image(0, ImageRole::Product)];
        assert_eq!(classify_intent("сделай в этом стиле", &one, false), Intent::CreateNew);
        let two = vec![image(0, ImageRole::Product), image(1, ImageRole::StyleReference)];
        assert_eq!(
            classify_intent("сделай в этом стиле", &two, false),
            Intent::StyleTransfer
        );
    }

    #[test]
    fn edit_flag_wins_over_everything() {
        let images = vec![image(0, ImageRole::Product), image(1, ImageRole::StyleReference)];
        let intent = classify_intent("replace the product in this style", &images, true);
        assert_eq!(intent, Intent::EditExisting);
    }

    #[test]
    fn template_wins_when_both_signals_fire() {
        let images = vec![image(0, ImageRole::Product), image(1, ImageRole::StyleReference)];
        let intent = classify_intent(
            "put my product onto this card, in this style",
            &images,
            false,
        );
        assert_eq!(intent, Intent::TemplateCopy);
    }

    #[test]
    fn synthesis_fails_closed_without_images() {
        let cfg = FlowConfig::default();
        let input = SynthesisInput {
            text: "create a card",
            images: &[],
            style: None,
            prior_prompts: &[],
            attribute_lines: &[],
            edit_of_existing: false,
            aspect_ratio: AspectRatio::Portrait,
        };
        assert_eq!(synthesize(&input, &cfg).unwrap_err(), ValidationError::MissingPhoto);
    }

    #[test]
    fn synthesis_rejects_overlong_text_before_any_call() {
        let cfg = FlowConfig::default();
        let long = "x".repeat(cfg.max_prompt_chars + 1);
        let images = vec![image(0, ImageRole::Product)];
        let input = SynthesisInput {
            text: &long,
            images: &images,
            style: None,
            prior_prompts: &[],
            attribute_lines: &[],
            edit_of_existing: false,
            aspect_ratio: AspectRatio::Portrait,
        };
        assert!(matches!(
            synthesize(&input, &cfg).unwrap_err(),
            ValidationError::PromptTooLong { .. }
        ));
    }

    #[test]
    fn image_positions_cover_style_and_prior_slides() {
        let cfg = FlowConfig::default();
        let images = vec![image(0, ImageRole::Product)];
        let style = StyleReference {
            image_url: "s".into(),
            style_description: "dark premium background".into(),
        };
        let priors = vec!["slide one prompt".to_string()];
        let input = SynthesisInput {
            text: "second slide: show the bottle cap",
            images: &images,
            style: Some(&style),
            prior_prompts: &priors,
            attribute_lines: &[],
            edit_of_existing: false,
            aspect_ratio: AspectRatio::Portrait,
        };
        let out = synthesize(&input, &cfg).unwrap();
        assert!(out.final_prompt.contains("IMAGE 1 = product"));
        assert!(out.final_prompt.contains("IMAGE 2 = style reference"));
        assert!(out.final_prompt.contains("IMAGE 3 = previously finalized slide 1"));
        assert!(out
            .final_prompt
            .contains("Keep the visual style consistent with: dark premium background"));
        // A styled follow-up step does not reseed the style.
        assert_eq!(out.style_summary, None);
    }

    #[test]
    fn first_generation_seeds_the_style_summary() {
        let cfg = FlowConfig::default();
        let images = vec![image(0, ImageRole::Product)];
        let input = SynthesisInput {
            text: "dark premium background",
            images: &images,
            style: None,
            prior_prompts: &[],
            attribute_lines: &[],
            edit_of_existing: false,
            aspect_ratio: AspectRatio::Portrait,
        };
        let out = synthesize(&input, &cfg).unwrap();
        assert_eq!(out.style_summary.as_deref(), Some("dark premium background"));
        assert_eq!(out.intent, Intent::CreateNew);
    }

    #[test]
    fn demo_attributes_alone_are_a_valid_instruction() {
        let cfg = FlowConfig::default();
        let images = vec![image(0, ImageRole::Product)];
        let lines = vec!["Composition: product centered".to_string()];
        let input = SynthesisInput {
            text: "",
            images: &images,
            style: None,
            prior_prompts: &[],
            attribute_lines: &lines,
            edit_of_existing: false,
            aspect_ratio: AspectRatio::Square,
        };
        let out = synthesize(&input, &cfg).unwrap();
        assert!(out.final_prompt.contains("- Composition: product centered"));
        assert!(out.final_prompt.contains("Target aspect ratio: 1:1."));
    }
}
