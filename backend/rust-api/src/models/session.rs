use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{ChoiceContent, ChoiceLabel, QuestionImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamPhase {
    NotStarted,
    InProgress,
    Finalizing,
    Submitted,
}

impl ExamPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamPhase::NotStarted => "not_started",
            ExamPhase::InProgress => "in_progress",
            ExamPhase::Finalizing => "finalizing",
            ExamPhase::Submitted => "submitted",
        }
    }
}

/// Mutable state of one exam attempt.
///
/// `answers` holds the *displayed* label the user picked; it is translated back
/// to the original label only at finalization. A question index is never in
/// both `answers` and `skipped`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub current_question_index: usize,
    pub current_block: usize,
    pub answers: BTreeMap<usize, ChoiceLabel>,
    pub skipped: BTreeSet<usize>,
    pub completed_blocks: BTreeSet<usize>,
    /// Accumulated milliseconds per question index.
    pub time_spent: BTreeMap<usize, i64>,
    pub exam_started: bool,
    pub exam_start_time: Option<DateTime<Utc>>,
    pub question_started_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            current_block: 1,
            ..Default::default()
        }
    }

    pub fn is_answered(&self, index: usize) -> bool {
        self.answers.contains_key(&index)
    }

    pub fn is_skipped(&self, index: usize) -> bool {
        self.skipped.contains(&index)
    }

    /// Adds the time spent on the current question since it was displayed and
    /// restarts its stopwatch. No-op before the exam starts.
    pub fn flush_time(&mut self, now: DateTime<Utc>) {
        if !self.exam_started {
            return;
        }

        if let Some(since) = self.question_started_at {
            let elapsed = (now - since).num_milliseconds().max(0);
            *self
                .time_spent
                .entry(self.current_question_index)
                .or_insert(0) += elapsed;
        }
        self.question_started_at = Some(now);
    }

    pub fn time_spent_on(&self, index: usize) -> i64 {
        self.time_spent.get(&index).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavStatus {
    Answered,
    Skipped,
    Unanswered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavItem {
    pub index: usize,
    pub number: usize,
    pub status: NavStatus,
    pub current: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Current,
    Completed,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIndicator {
    pub block: usize,
    pub size: usize,
    pub status: BlockStatus,
}

/// One choice as shown to the user: `label` is the display position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayChoice {
    pub label: ChoiceLabel,
    pub content: ChoiceContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub index: usize,
    pub id: i64,
    pub title: String,
    pub enunciado: String,
    pub choices: Vec<DisplayChoice>,
    pub selected: Option<ChoiceLabel>,
    pub skipped: bool,
    #[serde(default)]
    pub images: Vec<QuestionImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipToggleView {
    pub checked: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerView {
    pub started_at: DateTime<Utc>,
    pub remaining_ms: i64,
    pub remaining: String,
    pub warning: bool,
}

/// Everything the page needs to render the current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub phase: ExamPhase,
    pub total_questions: usize,
    pub current_question_index: usize,
    pub current_block: usize,
    pub answered_count: usize,
    pub skipped_count: usize,
    pub blocks: Vec<BlockIndicator>,
    pub navigation: Vec<NavItem>,
    pub question: Option<QuestionView>,
    pub skip_toggle: SkipToggleView,
    pub next_enabled: bool,
    pub finalize_enabled: bool,
    pub pending_skip_choice: bool,
    pub timer: Option<TimerView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn flush_time_is_noop_before_start() {
        let mut state = SessionState::new();
        state.flush_time(Utc::now());
        assert!(state.time_spent.is_empty());
        assert_eq!(state.question_started_at, None);
    }

    #[test]
    fn flush_time_accumulates_per_question() {
        let t0 = Utc::now();
        let mut state = SessionState::new();
        state.exam_started = true;
        state.question_started_at = Some(t0);

        state.flush_time(t0 + Duration::seconds(3));
        state.flush_time(t0 + Duration::seconds(5));

        assert_eq!(state.time_spent_on(0), 5_000);
        assert_eq!(state.question_started_at, Some(t0 + Duration::seconds(5)));
    }

    #[test]
    fn flush_time_ignores_clock_going_backwards() {
        let t0 = Utc::now();
        let mut state = SessionState::new();
        state.exam_started = true;
        state.question_started_at = Some(t0);

        state.flush_time(t0 - Duration::seconds(2));
        assert_eq!(state.time_spent_on(0), 0);
    }
}
