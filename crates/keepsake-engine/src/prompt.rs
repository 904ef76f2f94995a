use keepsake_contracts::scenarios::Scenario;

const SUBJECT: &str =
    "Subject: the baby shown in the reference photos. Keep the same baby: hair, skin tone, eye colour and facial features must match the references.";
const STYLE: &str = "Style: professional photography, soft bokeh, warm pastel tones, magical Christmas atmosphere, sharp focus on the eyes.";

/// The single text instruction sent after the reference images.
pub fn compose_instruction(scenario: &Scenario, aspect_ratio: &str) -> String {
    format!(
        "Generate a high-quality, photorealistic Christmas-themed baby portrait.\n\
         {SUBJECT}\n\
         {STYLE}\n\
         Scenario: {scenario}\n\
         Output: one clean, full-bleed square image at aspect ratio {aspect_ratio}. \
         No frames, borders, collage layouts, text, captions, logos or watermarks.",
        scenario = scenario.text.trim(),
        aspect_ratio = aspect_ratio.trim(),
    )
}
