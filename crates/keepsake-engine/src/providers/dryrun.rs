use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use keepsake_contracts::credentials::Credential;
use sha2::{Digest, Sha256};

use super::{GeneratedPayload, GenerationRequest, ImageProvider};

/// Offline provider: a flat square whose colour is derived from the prompt.
#[derive(Debug, Clone)]
pub struct DryrunProvider {
    side: u32,
}

impl DryrunProvider {
    pub fn new(side: u32) -> Self {
        Self { side: side.max(1) }
    }
}

impl Default for DryrunProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(
        &self,
        request: &GenerationRequest<'_>,
        _credential: &Credential,
    ) -> Result<GeneratedPayload> {
        let seed = request.reference_images.len() as u64;
        let (r, g, b) = color_from_prompt(&request.prompt, seed);
        let image = RgbImage::from_pixel(self.side, self.side, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun image encode failed")?;
        Ok(GeneratedPayload {
            bytes,
            media_type: "image/png".to_string(),
        })
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keepsake_contracts::credentials::Credential;
    use keepsake_contracts::scenarios::SCENARIOS;

    use super::{color_from_prompt, DryrunProvider};
    use crate::providers::{GenerationRequest, ImageProvider};

    #[test]
    fn dryrun_returns_decodable_square_png() -> anyhow::Result<()> {
        let provider = DryrunProvider::new(32);
        let request = GenerationRequest {
            model: "dryrun-image-1",
            scenario: SCENARIOS[0],
            reference_images: &[],
            prompt: "snowy window".to_string(),
            aspect_ratio: "1:1",
            image_size: "1K",
            timeout: Duration::from_secs(5),
        };
        let credential = Credential::new("dryrun").unwrap();
        let payload = provider.generate(&request, &credential)?;
        assert_eq!(payload.media_type, "image/png");
        let image = image::load_from_memory(&payload.bytes)?;
        assert_eq!((image.width(), image.height()), (32, 32));
        Ok(())
    }

    #[test]
    fn color_is_stable_per_prompt() {
        assert_eq!(color_from_prompt("a", 1), color_from_prompt("a", 1));
        assert_ne!(color_from_prompt("a", 1), color_from_prompt("b", 1));
    }
}
