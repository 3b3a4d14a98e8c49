use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::block_partitioner::BlockStructure;
use super::shuffle_service::AnswerShuffler;
use crate::models::session::SessionState;
use crate::models::submission::{
    BlockAccuracy, ExamReport, FinalizedExam, Outcome, QuestionResult, SubmissionPayload,
    NO_ANSWER,
};
use crate::models::{ChoiceLabel, Question};
use crate::utils::time::format_hms;

/// Translates every recorded (displayed) answer back to its original label.
/// Skipped questions contribute nothing.
pub fn resolve_answers(
    state: &SessionState,
    shuffler: &AnswerShuffler,
) -> BTreeMap<usize, ChoiceLabel> {
    state
        .answers
        .iter()
        .filter(|(index, _)| !state.is_skipped(**index))
        .map(|(index, displayed)| (*index, shuffler.to_original(*index, *displayed)))
        .collect()
}

/// An unknown gabarito never matches, so any answer to such a question is incorrect.
pub fn classify(question: &Question, answer: Option<ChoiceLabel>, skipped: bool) -> Outcome {
    if skipped {
        return Outcome::Skipped;
    }

    match (answer, question.correct_label()) {
        (Some(given), Some(correct)) if given == correct => Outcome::Correct,
        _ => Outcome::Incorrect,
    }
}

pub fn build_payload(
    questions: &[Question],
    resolved: &BTreeMap<usize, ChoiceLabel>,
    state: &SessionState,
) -> SubmissionPayload {
    let answers = resolved
        .iter()
        .filter_map(|(index, label)| questions.get(*index).map(|q| (q.id, *label)))
        .collect();

    let skipped_questions = state
        .skipped
        .iter()
        .copied()
        .filter(|index| *index < questions.len())
        .collect();

    SubmissionPayload {
        answers,
        skipped_questions,
    }
}

pub fn build_report(
    questions: &[Question],
    blocks: &BlockStructure,
    state: &SessionState,
    resolved: &BTreeMap<usize, ChoiceLabel>,
    now: DateTime<Utc>,
) -> ExamReport {
    let results: Vec<QuestionResult> = questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let skipped = state.is_skipped(index);
            let answer = resolved.get(&index).copied();
            let outcome = classify(question, answer, skipped);

            let user_answer = match outcome {
                Outcome::Skipped => None,
                _ => Some(
                    answer
                        .map(|label| label.to_string())
                        .unwrap_or_else(|| NO_ANSWER.to_string()),
                ),
            };

            QuestionResult {
                index,
                number: index + 1,
                question_id: question.id,
                block: blocks.block_of(index),
                outcome,
                user_answer,
                correct_answer: question.gabarito.clone(),
                time_spent_ms: state.time_spent_on(index),
            }
        })
        .collect();

    let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();

    let block_accuracy = (1..=blocks.block_count())
        .map(|block| {
            let in_block = results.iter().filter(|r| r.block == block);
            let total = in_block.clone().count();
            let correct = in_block.filter(|r| r.outcome == Outcome::Correct).count();
            let percentage = if total == 0 {
                0.0
            } else {
                correct as f64 / total as f64 * 100.0
            };
            BlockAccuracy {
                block,
                correct,
                total,
                percentage,
            }
        })
        .collect();

    let time_used_ms = state
        .exam_start_time
        .map(|start| (now - start).num_milliseconds().max(0))
        .unwrap_or(0);

    ExamReport {
        total_questions: questions.len(),
        correct: count(Outcome::Correct),
        incorrect: count(Outcome::Incorrect),
        skipped: count(Outcome::Skipped),
        answered: resolved.len(),
        time_used_ms,
        time_used: format_hms(time_used_ms),
        blocks: block_accuracy,
        questions: results,
    }
}

/// Pure part of termination: nothing here talks to the network.
pub fn finalize(
    questions: &[Question],
    blocks: &BlockStructure,
    state: &SessionState,
    shuffler: &AnswerShuffler,
    now: DateTime<Utc>,
) -> FinalizedExam {
    let resolved = resolve_answers(state, shuffler);
    let payload = build_payload(questions, &resolved, state);
    let report = build_report(questions, blocks, state, &resolved, now);

    tracing::info!(
        "Exam finalized: {} correct, {} incorrect, {} skipped of {} in {}",
        report.correct,
        report.incorrect,
        report.skipped,
        report.total_questions,
        report.time_used
    );

    FinalizedExam { payload, report }
}
