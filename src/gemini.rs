//! Gemini-backed implementations of the vision and image-generation
//! capabilities. With the API key set to `DEMO_KEY` the client stays fully
//! offline and returns SVG placeholders, which keeps the library exercisable
//! without credentials.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::capabilities::{ImageAnnotation, ImageGeneration, VisionCapability};
use crate::error::ExternalServiceError;
use crate::models::{AspectRatio, GeneratedImage, ImageRole};

const IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
const TEXT_MODEL: &str = "gemini-1.5-flash";

// Helper to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100
                            && s.chars()
                                .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=')
                        {
                            *val = serde_json::Value::String(format!(
                                "{}...[truncated {} chars]",
                                &s[..50],
                                s.len() - 50
                            ));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(b"\xFF\xD8\xFF") {
        "image/jpeg"
    } else if bytes.len() > 11 && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let base_url = std::env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    fn is_demo(&self) -> bool {
        self.api_key == "DEMO_KEY"
    }

    async fn fetch_inline_part(
        &self,
        url: &str,
    ) -> Result<serde_json::Value, ExternalServiceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExternalServiceError::Vision(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExternalServiceError::Vision(format!(
                "image fetch failed: status={status} url={url}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExternalServiceError::Vision(e.to_string()))?;
        let mime = sniff_mime(&bytes);
        Ok(json!({
            "inlineData": {
                "mimeType": mime,
                "data": base64::engine::general_purpose::STANDARD.encode(&bytes),
            }
        }))
    }

    async fn call_model(
        &self,
        model: &str,
        body: serde_json::Value,
    ) -> Result<GeminiResponse, ExternalServiceError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExternalServiceError::Generation(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response
            .text()
            .await
            .map_err(|e| ExternalServiceError::Generation(e.to_string()))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(ExternalServiceError::Generation(format!(
                "status={status} body={response_text}"
            )));
        }

        // Truncate base64 image data for cleaner logging
        if let Ok(mut json_value) = serde_json::from_str::<serde_json::Value>(&response_text) {
            truncate_base64_in_json(&mut json_value);
            info!(
                "📥 Raw Gemini API response: {}",
                serde_json::to_string(&json_value).unwrap_or_default()
            );
        }

        serde_json::from_str(&response_text)
            .map_err(|e| ExternalServiceError::Generation(format!("parse error: {e}")))
    }

    fn placeholder_image(&self, prompt: &str) -> GeneratedImage {
        let colors = ["#3B82F6", "#EF4444", "#10B981", "#F59E0B", "#8B5CF6"];
        let color = colors[prompt.len() % colors.len()];
        let svg = format!(
            r#"<svg width="400" height="500" xmlns="http://www.w3.org/2000/svg">
            <defs>
                <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
                    <stop offset="0%" style="stop-color:{color};stop-opacity:1" />
                    <stop offset="100%" style="stop-color:{color};stop-opacity:0.6" />
                </linearGradient>
            </defs>
            <rect width="400" height="500" fill="url(#grad)" />
            <text x="200" y="250" font-family="Arial, sans-serif" font-size="22" font-weight="bold"
                  text-anchor="middle" fill="white">
                Generated card
            </text>
        </svg>"#
        );
        GeneratedImage {
            bytes: Bytes::from(svg.into_bytes()),
            mime_type: "image/svg+xml".to_string(),
        }
    }
}

#[async_trait]
impl VisionCapability for GeminiClient {
    async fn classify(&self, image_url: &str) -> Result<ImageAnnotation, ExternalServiceError> {
        if self.is_demo() {
            info!("Using demo mode - no real classification performed");
            return Ok(ImageAnnotation {
                role: ImageRole::Product,
                description: Some("demo product shot".into()),
            });
        }

        let inline = self
            .fetch_inline_part(image_url)
            .await
            .map_err(|e| ExternalServiceError::Vision(e.to_string()))?;
        let body = json!({
            "contents": [{
                "parts": [
                    inline,
                    {"text": "Classify this image for a product marketing card. \
                        Reply with exactly two lines:\n\
                        role: one of product, logo, style_reference, background, detail, unknown\n\
                        description: one short sentence describing the image"}
                ]
            }],
            "generationConfig": {
                "temperature": 0.2,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 120
            }
        });

        let parsed = self
            .call_model(TEXT_MODEL, body)
            .await
            .map_err(|e| ExternalServiceError::Vision(e.to_string()))?;
        let text = parsed
            .first_text()
            .ok_or_else(|| ExternalServiceError::Vision("no text in response".into()))?;

        let mut role = ImageRole::Unknown;
        let mut description = None;
        for line in text.lines() {
            if let Some(value) = line.trim().strip_prefix("role:") {
                role = ImageRole::parse(value);
            } else if let Some(value) = line.trim().strip_prefix("description:") {
                let value = value.trim();
                if !value.is_empty() {
                    description = Some(value.to_string());
                }
            }
        }
        info!(role = role.as_str(), "🔎 image classified");
        Ok(ImageAnnotation { role, description })
    }
}

#[async_trait]
impl ImageGeneration for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        image_urls: &[String],
        aspect_ratio: AspectRatio,
    ) -> Result<GeneratedImage, ExternalServiceError> {
        if self.is_demo() {
            info!("Using demo mode - no real images generated");
            return Ok(self.placeholder_image(prompt));
        }

        info!(images = image_urls.len(), aspect = aspect_ratio.as_str(),
            "🎨 Generating image with Gemini API...");
        let mut parts = Vec::with_capacity(image_urls.len() + 1);
        for url in image_urls {
            match self.fetch_inline_part(url).await {
                Ok(part) => parts.push(part),
                Err(e) => {
                    // A missing reference degrades the result but the
                    // positional prompt still describes it; keep going.
                    warn!(url = %url, error = %e, "⚠️ skipping unfetchable image");
                }
            }
        }
        parts.push(json!({"text": prompt}));

        let body = json!({
            "contents": [{"parts": parts}],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 64,
                "candidateCount": 1
            }
        });

        let parsed = self.call_model(IMAGE_MODEL, body).await?;
        let (data, mime_type) = parsed
            .first_image()
            .ok_or_else(|| ExternalServiceError::Generation("no image data in response".into()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ExternalServiceError::Generation(format!("bad base64: {e}")))?;
        info!("✅ Successfully generated image ({} bytes, {})", bytes.len(), mime_type);
        Ok(GeneratedImage {
            bytes: Bytes::from(bytes),
            mime_type,
        })
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

impl GeminiResponse {
    fn first_text(&self) -> Option<&str> {
        for c in &self.candidates {
            for p in &c.content.parts {
                if let Part::Text { text } = p {
                    return Some(text);
                }
            }
        }
        None
    }

    fn first_image(&self) -> Option<(&str, String)> {
        for c in &self.candidates {
            for p in &c.content.parts {
                if let Part::Inline { inline_data } = p {
                    info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                    return Some((&inline_data.data, inline_data.mime_type.clone()));
                }
            }
        }
        info!("⚠️ No inline image data found in response structure");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sniffs_common_image_formats() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(sniff_mime(b"\xFF\xD8\xFF\xE0...."), "image/jpeg");
        assert_eq!(sniff_mime(b"RIFF\x00\x00\x00\x00WEBPVP8"), "image/webp");
        assert_eq!(sniff_mime(b"plain text"), "application/octet-stream");
    }

    #[test]
    fn parses_inline_image_from_response() {
        let raw = r#"{
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
                ]}
            }]
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        let (data, mime) = parsed.first_image().unwrap();
        assert_eq!(data, "aGVsbG8=");
        assert_eq!(mime, "image/png");
        assert_eq!(parsed.first_text(), Some("here you go"));
    }

    #[test]
    fn truncates_base64_payloads_for_logging() {
        let long = "A".repeat(200);
        let mut value = serde_json::json!({"inlineData": {"data": long, "mimeType": "image/png"}});
        truncate_base64_in_json(&mut value);
        let data = value["inlineData"]["data"].as_str().unwrap();
        assert!(data.contains("truncated 150 chars"));
    }

    #[tokio::test]
    async fn demo_mode_stays_offline() {
        let client = GeminiClient::new("DEMO_KEY".into());
        let image = client
            .generate("a card", &["https://img/1".into()], AspectRatio::Portrait)
            .await
            .unwrap();
        assert_eq!(image.mime_type, "image/svg+xml");
        assert!(!image.bytes.is_empty());

        let annotation = client.classify("https://img/1").await.unwrap();
        assert_eq!(annotation.role, ImageRole::Product);
    }
}
