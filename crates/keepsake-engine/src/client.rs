use std::sync::Arc;
use std::time::Duration;

use keepsake_contracts::credentials::Credential;
use keepsake_contracts::errors::CollageError;
use keepsake_contracts::images::EncodedImage;
use keepsake_contracts::models::ModelSpec;
use keepsake_contracts::scenarios::Scenario;
use keepsake_contracts::settings::CollageSettings;

use crate::error_chain_text;
use crate::prompt::compose_instruction;
use crate::providers::{GeneratedPayload, GenerationRequest, ImageProvider};

/// One model behind one provider, configured for collage tiles.
///
/// Makes a single attempt per call; any provider failure comes back as
/// `CollageError::Generation` for that scenario.
#[derive(Clone)]
pub struct GenerationClient {
    provider: Arc<dyn ImageProvider>,
    model: ModelSpec,
    reference_limit: usize,
    aspect_ratio: String,
    image_size: String,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        model: ModelSpec,
        settings: &CollageSettings,
    ) -> Self {
        let reference_limit = settings
            .max_reference_images
            .min(model.max_reference_images)
            .max(1);
        Self {
            provider,
            model,
            reference_limit,
            aspect_ratio: settings.aspect_ratio.clone(),
            image_size: settings.image_size.clone(),
            timeout: settings.request_timeout(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn reference_limit(&self) -> usize {
        self.reference_limit
    }

    pub fn build_request<'a>(
        &'a self,
        reference_images: &'a [EncodedImage],
        scenario: Scenario,
    ) -> GenerationRequest<'a> {
        let kept = reference_images.len().min(self.reference_limit);
        GenerationRequest {
            model: &self.model.name,
            scenario,
            reference_images: &reference_images[..kept],
            prompt: compose_instruction(&scenario, &self.aspect_ratio),
            aspect_ratio: &self.aspect_ratio,
            image_size: &self.image_size,
            timeout: self.timeout,
        }
    }

    pub fn generate(
        &self,
        reference_images: &[EncodedImage],
        scenario: Scenario,
        credential: &Credential,
    ) -> Result<GeneratedPayload, CollageError> {
        let request = self.build_request(reference_images, scenario);
        let generation_error = |message: String| CollageError::Generation {
            scenario_index: scenario.index,
            message,
        };
        let payload = self
            .provider
            .generate(&request, credential)
            .map_err(|err| generation_error(error_chain_text(&err, 512)))?;
        if payload.bytes.is_empty() {
            return Err(generation_error("no image returned".to_string()));
        }
        Ok(payload)
    }
}
