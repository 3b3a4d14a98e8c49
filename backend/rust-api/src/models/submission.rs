use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ChoiceLabel;

/// Rendered in place of an answer for questions left blank.
pub const NO_ANSWER: &str = "none";

/// Body of `POST /api/simulados/submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    /// Question id to original (un-shuffled) label.
    pub answers: BTreeMap<i64, ChoiceLabel>,
    /// Zero-based question indices, ascending.
    pub skipped_questions: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub index: usize,
    pub number: usize,
    pub question_id: i64,
    pub block: usize,
    pub outcome: Outcome,
    /// Original label, `"none"` when unanswered, absent when skipped.
    pub user_answer: Option<String>,
    pub correct_answer: String,
    pub time_spent_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockAccuracy {
    pub block: usize,
    pub correct: usize,
    pub total: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamReport {
    pub total_questions: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub skipped: usize,
    pub answered: usize,
    pub time_used_ms: i64,
    pub time_used: String,
    pub blocks: Vec<BlockAccuracy>,
    pub questions: Vec<QuestionResult>,
}

/// Pure output of finalization, before anything leaves the process.
#[derive(Debug, Clone)]
pub struct FinalizedExam {
    pub payload: SubmissionPayload,
    pub report: ExamReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSubmission {
    pub redirect_url: String,
    /// False when the upstream rejected or never received the results.
    pub submitted: bool,
    pub report: ExamReport,
}
