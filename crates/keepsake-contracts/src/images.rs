use serde::{Deserialize, Serialize};

pub const FAILED_PROMPT: &str = "Generation Failed";

/// A reference photo after resize + re-encode, ready to be sent inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub id: String,
    pub display_url: String,
    /// Base64 of the encoded bytes.
    pub payload: String,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
}

/// One tile of the collage. There is exactly one per scenario index, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub display_url: String,
    pub scenario_index: usize,
    pub prompt: String,
    pub succeeded: bool,
}

impl GeneratedImage {
    pub fn placeholder(scenario_index: usize, placeholder_url: &str) -> Self {
        Self {
            id: format!("fail-{scenario_index}"),
            display_url: placeholder_url.to_string(),
            scenario_index,
            prompt: FAILED_PROMPT.to_string(),
            succeeded: false,
        }
    }
}

pub fn data_url(media_type: &str, payload: &str) -> String {
    format!("data:{media_type};base64,{payload}")
}

/// Splits `data:<mime>;base64,<payload>` into its media type and payload.
pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    if payload.is_empty() {
        return None;
    }
    Some((media_type, payload))
}
