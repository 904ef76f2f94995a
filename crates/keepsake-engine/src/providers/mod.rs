use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use keepsake_contracts::credentials::Credential;
use keepsake_contracts::images::{data_url, EncodedImage};
use keepsake_contracts::scenarios::Scenario;
use keepsake_contracts::settings::CollageSettings;
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::truncate_text;

mod dryrun;
mod gemini;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;

/// Everything one generation call needs. Reference images are borrowed, never copied.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub model: &'a str,
    pub scenario: Scenario,
    pub reference_images: &'a [EncodedImage],
    pub prompt: String,
    pub aspect_ratio: &'a str,
    pub image_size: &'a str,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPayload {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl GeneratedPayload {
    pub fn display_url(&self) -> String {
        data_url(&self.media_type, &BASE64.encode(&self.bytes))
    }
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(
        &self,
        request: &GenerationRequest<'_>,
        credential: &Credential,
    ) -> Result<GeneratedPayload>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(settings: &CollageSettings) -> ImageProviderRegistry {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunProvider::default());
    providers.register(GeminiProvider::new(&settings.api_base));
    providers
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}
