use serde::Serialize;

pub const SCENARIO_COUNT: usize = 10;

/// One scene description, bound by `index` to a fixed slot of the tree collage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub index: usize,
    pub text: &'static str,
}

const fn scenario(index: usize, text: &'static str) -> Scenario {
    Scenario { index, text }
}

/// Slot order matters: index 0 is the top of the tree, 6..=9 the bottom row.
pub const SCENARIOS: [Scenario; SCENARIO_COUNT] = [
    scenario(
        0,
        "A close-up portrait of the baby smiling warmly, soft festive lighting, blurred Christmas tree in background.",
    ),
    scenario(
        1,
        "The baby wrapped snugly in a soft, chunky knit Christmas blanket, looking cozy and safe.",
    ),
    scenario(
        2,
        "The baby sitting beside a miniature Christmas tree, looking at the ornaments with wonder.",
    ),
    scenario(
        3,
        "The baby playing with safe, soft Christmas plush toys, joyful expression.",
    ),
    scenario(
        4,
        "The baby wearing a cute red and white Christmas onesie or elf costume.",
    ),
    scenario(
        5,
        "The baby crawling on a soft rug with twinkling fairy lights in the background (safe distance).",
    ),
    scenario(
        6,
        "The baby holding a small, beautifully wrapped gift box with a bow.",
    ),
    scenario(
        7,
        "The baby sitting in front of a window with a snowy winter glow outside, soft interior lighting.",
    ),
    scenario(
        8,
        "The baby clapping hands or laughing, celebrating the festive spirit.",
    ),
    scenario(
        9,
        "A magical portrait of the baby with subtle, golden festive sparkles floating in the air.",
    ),
];

pub fn scenario_at(index: usize) -> Option<Scenario> {
    SCENARIOS.get(index).copied()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{scenario_at, SCENARIOS, SCENARIO_COUNT};

    #[test]
    fn catalog_indices_match_positions() {
        for (position, scenario) in SCENARIOS.iter().enumerate() {
            assert_eq!(scenario.index, position);
            assert!(!scenario.text.trim().is_empty());
        }
    }

    #[test]
    fn catalog_texts_are_distinct() {
        let texts: HashSet<&str> = SCENARIOS.iter().map(|scenario| scenario.text).collect();
        assert_eq!(texts.len(), SCENARIO_COUNT);
    }

    #[test]
    fn scenario_at_is_bounded() {
        assert_eq!(scenario_at(9).map(|scenario| scenario.index), Some(9));
        assert!(scenario_at(SCENARIO_COUNT).is_none());
    }
}
