use serde::{Deserialize, Serialize};

use super::block_partitioner::BlockStructure;
use crate::metrics::SKIP_TOGGLES_TOTAL;
use crate::models::notification::Notification;
use crate::models::session::SessionState;

/// Result of a skip toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipToggle {
    Skipped,
    Unskipped,
    Denied,
}

impl SkipToggle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipToggle::Skipped => "skipped",
            SkipToggle::Unskipped => "unskipped",
            SkipToggle::Denied => "denied",
        }
    }

    pub fn notification(&self) -> Notification {
        match self {
            SkipToggle::Skipped => Notification::success("Question skipped in this block."),
            SkipToggle::Unskipped => Notification::info("Skip undone."),
            SkipToggle::Denied => Notification::warning("You already used the skip in this block!"),
        }
    }
}

/// Skipped indices inside `block`, ascending.
pub fn skipped_in_block(state: &SessionState, blocks: &BlockStructure, block: usize) -> Vec<usize> {
    state
        .skipped
        .range(blocks.block_range(block))
        .copied()
        .collect()
}

/// At most one question per block may be skipped at a time.
pub fn can_skip(state: &SessionState, blocks: &BlockStructure, index: usize) -> bool {
    if !state.exam_started {
        return false;
    }
    if state.is_skipped(index) {
        return true;
    }

    let block = blocks.block_of(index);
    skipped_in_block(state, blocks, block).is_empty()
}

/// Flips the skip mark of `index`. Skipping drops any recorded answer;
/// unskipping does not bring it back.
pub fn toggle_skip(state: &mut SessionState, blocks: &BlockStructure, index: usize) -> SkipToggle {
    let result = if state.is_skipped(index) {
        state.skipped.remove(&index);
        SkipToggle::Unskipped
    } else if can_skip(state, blocks, index) {
        state.skipped.insert(index);
        state.answers.remove(&index);
        SkipToggle::Skipped
    } else {
        tracing::warn!(
            "Skip denied for question {}: block {} already has a skipped question",
            index,
            blocks.block_of(index)
        );
        SkipToggle::Denied
    };

    SKIP_TOGGLES_TOTAL
        .with_label_values(&[result.as_str()])
        .inc();

    result
}
