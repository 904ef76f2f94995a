use anyhow::Error;
use keepsake_contracts::images::EncodedImage;
use sha2::{Digest, Sha256};

pub mod client;
pub mod collage;
pub mod orchestrator;
pub mod preprocess;
pub mod prompt;
pub mod providers;
pub mod session;

pub use client::GenerationClient;
pub use collage::{export_png, CollageCompositor, TreeSlot, TREE_SLOTS};
pub use orchestrator::CollageOrchestrator;
pub use preprocess::{preprocess, preprocess_batch, scaled_dimensions, RawPhoto};
pub use providers::{
    default_provider_registry, DryrunProvider, GeminiProvider, GeneratedPayload,
    GenerationRequest, ImageProvider, ImageProviderRegistry,
};
pub use session::CollageSession;

/// Flattens an anyhow chain into one line, skipping repeated causes.
pub(crate) fn error_chain_text(err: &Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Short stable digest of a reference set, so runs can be matched to their inputs.
pub fn reference_fingerprint(references: &[EncodedImage]) -> String {
    let mut hasher = Sha256::new();
    for reference in references {
        hasher.update(reference.media_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(reference.payload.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use keepsake_contracts::images::EncodedImage;

    use super::{error_chain_text, reference_fingerprint, truncate_text};

    fn encoded(payload: &str) -> EncodedImage {
        EncodedImage {
            id: "a".to_string(),
            display_url: String::new(),
            payload: payload.to_string(),
            media_type: "image/jpeg".to_string(),
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn error_chain_joins_distinct_causes() {
        let err = anyhow!("socket closed")
            .context("Gemini request failed")
            .context("Gemini request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed | caused by: socket closed"
        );
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }

    #[test]
    fn fingerprint_depends_on_order_and_content() {
        let a = reference_fingerprint(&[encoded("AA"), encoded("BB")]);
        let b = reference_fingerprint(&[encoded("BB"), encoded("AA")]);
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert_eq!(a, reference_fingerprint(&[encoded("AA"), encoded("BB")]));
    }
}
