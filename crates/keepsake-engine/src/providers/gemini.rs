use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use keepsake_contracts::credentials::Credential;
use keepsake_contracts::settings::DEFAULT_API_BASE;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{response_json_or_error, GeneratedPayload, GenerationRequest, ImageProvider};

pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_base: &str) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// Reference images first, then the single text instruction.
    fn build_parts(request: &GenerationRequest<'_>) -> Vec<Value> {
        let mut parts: Vec<Value> = request
            .reference_images
            .iter()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.media_type,
                        "data": image.payload,
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.prompt }));
        parts
    }

    fn build_payload(request: &GenerationRequest<'_>) -> Value {
        let mut image_config = Map::new();
        image_config.insert(
            "aspectRatio".to_string(),
            Value::String(request.aspect_ratio.to_string()),
        );
        image_config.insert(
            "imageSize".to_string(),
            Value::String(request.image_size.to_ascii_uppercase()),
        );
        json!({
            "contents": [{
                "role": "user",
                "parts": Self::build_parts(request),
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
                "imageConfig": image_config,
            },
        })
    }

    /// First inline image across all candidates; text parts are ignored.
    fn extract_first_image(response_payload: &Value) -> Result<Option<GeneratedPayload>> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let media_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .filter(|value| value.starts_with("image/"))
                    .unwrap_or("image/png")
                    .to_string();
                return Ok(Some(GeneratedPayload { bytes, media_type }));
            }
        }
        Ok(None)
    }

    fn block_reason(response_payload: &Value) -> Option<String> {
        response_payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                response_payload
                    .get("candidates")
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.first())
                    .and_then(|row| row.get("finishReason"))
                    .and_then(Value::as_str)
                    .filter(|reason| *reason != "STOP")
                    .map(str::to_string)
            })
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &GenerationRequest<'_>,
        credential: &Credential,
    ) -> Result<GeneratedPayload> {
        let endpoint = self.endpoint_for_model(request.model);
        let payload = Self::build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", credential.expose())])
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .map_err(|err| {
                let kind = if err.is_timeout() { "timed out" } else { "failed" };
                anyhow!(err).context(format!("Gemini request {kind} ({endpoint})"))
            })?;
        let response_payload = response_json_or_error("Gemini", response)?;

        match Self::extract_first_image(&response_payload)? {
            Some(image) => Ok(image),
            None => match Self::block_reason(&response_payload) {
                Some(reason) => bail!("no image returned (finish reason: {reason})"),
                None => bail!("no image returned"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use keepsake_contracts::credentials::Credential;
    use keepsake_contracts::images::EncodedImage;
    use keepsake_contracts::scenarios::SCENARIOS;
    use serde_json::json;

    use super::GeminiProvider;
    use crate::providers::{GenerationRequest, ImageProvider};

    fn reference(id: &str) -> EncodedImage {
        EncodedImage {
            id: id.to_string(),
            display_url: String::new(),
            payload: format!("payload-{id}"),
            media_type: "image/jpeg".to_string(),
            width: 8,
            height: 8,
        }
    }

    #[test]
    fn endpoint_prefixes_models_path_once() {
        let provider = GeminiProvider::new("https://example.test/v1beta/");
        assert_eq!(
            provider.endpoint_for_model("gemini-3-pro-image-preview"),
            "https://example.test/v1beta/models/gemini-3-pro-image-preview:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model("models/x"),
            "https://example.test/v1beta/models/x:generateContent"
        );
    }

    #[test]
    fn payload_puts_references_before_instruction() {
        let references = vec![reference("a"), reference("b")];
        let request = GenerationRequest {
            model: "gemini-3-pro-image-preview",
            scenario: SCENARIOS[2],
            reference_images: &references,
            prompt: "the instruction".to_string(),
            aspect_ratio: "1:1",
            image_size: "1k",
            timeout: Duration::from_secs(30),
        };
        let payload = GeminiProvider::build_payload(&request);
        let parts = payload["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["data"], json!("payload-a"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[2]["text"], json!("the instruction"));
        assert_eq!(
            payload["generationConfig"]["imageConfig"],
            json!({"aspectRatio": "1:1", "imageSize": "1K"})
        );
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn extracts_first_inline_image_in_either_casing() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inline_data": {"mime_type": "image/jpeg", "data": "aGVsbG8="}},
                    {"inlineData": {"mimeType": "image/png", "data": "d29ybGQ="}}
                ]}
            }]
        });
        let image = GeminiProvider::extract_first_image(&response)?;
        let image = image.ok_or_else(|| anyhow::anyhow!("expected an image"))?;
        assert_eq!(image.bytes, b"hello".to_vec());
        assert_eq!(image.media_type, "image/jpeg");
        Ok(())
    }

    #[test]
    fn text_only_response_has_no_image() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "finishReason": "IMAGE_SAFETY",
                "content": {"parts": [{"text": "I can't help with that."}]}
            }]
        });
        assert!(GeminiProvider::extract_first_image(&response)?.is_none());
        assert_eq!(
            GeminiProvider::block_reason(&response).as_deref(),
            Some("IMAGE_SAFETY")
        );
        assert!(GeminiProvider::extract_first_image(&json!({}))?.is_none());
        assert!(GeminiProvider::block_reason(&json!({})).is_none());
        Ok(())
    }

    #[test]
    fn corrupt_image_data_is_an_error() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"data": "@@not-base64@@"}}]}}]
        });
        assert!(GeminiProvider::extract_first_image(&response).is_err());
    }

    #[test]
    fn silent_endpoint_fails_with_timeout() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;
        let holder = thread::spawn(move || {
            let connection = listener.accept();
            thread::sleep(Duration::from_millis(1500));
            drop(connection);
        });

        let provider = GeminiProvider::new(&format!("http://{address}/v1beta"));
        let references = vec![reference("a")];
        let request = GenerationRequest {
            model: "gemini-3-pro-image-preview",
            scenario: SCENARIOS[0],
            reference_images: &references,
            prompt: "the instruction".to_string(),
            aspect_ratio: "1:1",
            image_size: "1K",
            timeout: Duration::from_millis(200),
        };
        let credential = Credential::new("test-key").ok_or_else(|| anyhow::anyhow!("blank key"))?;
        let err = provider
            .generate(&request, &credential)
            .expect_err("nothing answers");
        assert!(
            format!("{err:#}").contains("Gemini request timed out"),
            "unexpected error: {err:#}"
        );
        let _ = holder.join();
        Ok(())
    }
}
