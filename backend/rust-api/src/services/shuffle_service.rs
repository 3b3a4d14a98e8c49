use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;

use crate::models::session::DisplayChoice;
use crate::models::{ChoiceContent, ChoiceLabel, Question};

/// Bijection between display positions and original labels for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleMap {
    // display[p] = original label shown at display position p
    display: [ChoiceLabel; 5],
}

impl ShuffleMap {
    pub fn identity() -> Self {
        Self {
            display: ChoiceLabel::ALL,
        }
    }

    /// Accepts `order` only if it is a permutation of a..e.
    pub fn from_display_order(order: [ChoiceLabel; 5]) -> Option<Self> {
        let mut seen = [false; 5];
        for label in order {
            let slot = &mut seen[label.position()];
            if *slot {
                return None;
            }
            *slot = true;
        }
        Some(Self { display: order })
    }

    pub fn display_order(&self) -> &[ChoiceLabel; 5] {
        &self.display
    }

    pub fn to_original(&self, displayed: ChoiceLabel) -> ChoiceLabel {
        self.display[displayed.position()]
    }

    pub fn to_display(&self, original: ChoiceLabel) -> ChoiceLabel {
        let position = self
            .display
            .iter()
            .position(|label| *label == original)
            .unwrap_or_else(|| original.position());
        ChoiceLabel::from_position(position).unwrap_or(original)
    }
}

/// A displayed choice together with the label it really has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffledChoice {
    pub display_label: ChoiceLabel,
    pub original_label: ChoiceLabel,
    pub content: ChoiceContent,
}

impl From<ShuffledChoice> for DisplayChoice {
    fn from(choice: ShuffledChoice) -> Self {
        DisplayChoice {
            label: choice.display_label,
            content: choice.content,
        }
    }
}

/// Per-session choice shuffling. A question's permutation is drawn the first
/// time it is displayed and reused for the rest of the session.
pub struct AnswerShuffler {
    rng: StdRng,
    enabled: bool,
    maps: HashMap<usize, ShuffleMap>,
}

impl AnswerShuffler {
    pub fn new(enabled: bool) -> Self {
        Self::with_rng(StdRng::from_os_rng(), enabled)
    }

    pub fn with_rng(rng: StdRng, enabled: bool) -> Self {
        Self {
            rng,
            enabled,
            maps: HashMap::new(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), true)
    }

    /// Returns the cached map for `question_index`, drawing it on first use.
    pub fn map_for(&mut self, question_index: usize) -> ShuffleMap {
        if let Some(map) = self.maps.get(&question_index) {
            return *map;
        }

        let map = if self.enabled {
            let mut order = ChoiceLabel::ALL;
            order.shuffle(&mut self.rng);
            ShuffleMap { display: order }
        } else {
            ShuffleMap::identity()
        };

        tracing::debug!(
            "Shuffle map created for question {}: {:?}",
            question_index,
            map.display
        );
        self.maps.insert(question_index, map);
        map
    }

    pub fn map(&self, question_index: usize) -> Option<&ShuffleMap> {
        self.maps.get(&question_index)
    }

    pub fn shuffle(&mut self, question_index: usize, question: &Question) -> Vec<ShuffledChoice> {
        let map = self.map_for(question_index);
        ChoiceLabel::ALL
            .iter()
            .map(|display_label| {
                let original_label = map.to_original(*display_label);
                ShuffledChoice {
                    display_label: *display_label,
                    original_label,
                    content: ChoiceContent::classify(question.choice(original_label)),
                }
            })
            .collect()
    }

    /// Inverse lookup. Without a map the label is taken as already original.
    pub fn to_original(&self, question_index: usize, displayed: ChoiceLabel) -> ChoiceLabel {
        match self.maps.get(&question_index) {
            Some(map) => map.to_original(displayed),
            None => {
                tracing::debug!(
                    "No shuffle map for question {}, treating '{}' as original",
                    question_index,
                    displayed
                );
                displayed
            }
        }
    }
}
