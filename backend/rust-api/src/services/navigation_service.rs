use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

use super::block_partitioner::BlockStructure;
use super::finalization_service;
use super::shuffle_service::AnswerShuffler;
use super::skip_quota::{self, SkipToggle};
use super::timer_service::{Countdown, CountdownSettings};
use crate::metrics::{BLOCK_FINALIZATIONS_TOTAL, EXAM_NAVIGATIONS_TOTAL, SESSIONS_ACTIVE};
use crate::models::notification::Notification;
use crate::models::session::{
    BlockIndicator, BlockStatus, DisplayChoice, ExamPhase, NavItem, NavStatus, QuestionView,
    SessionState, SessionView, SkipToggleView, TimerView,
};
use crate::models::submission::FinalizedExam;
use crate::models::{ChoiceLabel, Question};
use crate::utils::time::format_hms;

/// Actions the exam rules refuse. State is left untouched whenever one is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExamError {
    #[error("You must start the exam first!")]
    NotStarted,
    #[error("The exam is not in progress")]
    NotInProgress,
    #[error("Question {number} does not exist", number = .index + 1)]
    OutOfRange { index: usize },
    #[error("Question {number} is the last one of block {block}. Finalize the block to continue.", number = .index + 1)]
    BlockBoundary { index: usize, block: usize },
    #[error("Question {number} is skipped. Undo the skip to answer it.", number = .index + 1)]
    QuestionSkipped { index: usize },
    #[error("Question {number} is not part of block {block}", number = .index + 1)]
    OutsideCurrentBlock { index: usize, block: usize },
    #[error("You already used the skip in this block!")]
    SkipQuotaExceeded { block: usize },
    #[error("Block {block} is already finalized")]
    BlockClosed { block: usize },
}

impl ExamError {
    pub fn notification(&self) -> Notification {
        Notification::warning(self.to_string())
    }
}

/// Confirmations the user has already given for a block finalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeAck {
    pub reviewed: bool,
    pub accept_gaps: bool,
    pub confirmed: bool,
}

impl FinalizeAck {
    pub fn all() -> Self {
        Self {
            reviewed: true,
            accept_gaps: true,
            confirmed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    NeedsReview {
        block: usize,
    },
    /// Every block must carry exactly one skip before it can be closed.
    SkipSelectionRequired {
        block: usize,
        candidates: Vec<usize>,
    },
    NeedsGapConfirmation {
        block: usize,
        unanswered: usize,
    },
    NeedsFinalConfirmation {
        block: usize,
        closes_exam: bool,
    },
    BlockCompleted {
        block: usize,
        next_block: usize,
    },
    ExamComplete {
        block: usize,
    },
}

impl FinalizeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeOutcome::NeedsReview { .. } => "needs_review",
            FinalizeOutcome::SkipSelectionRequired { .. } => "skip_selection_required",
            FinalizeOutcome::NeedsGapConfirmation { .. } => "needs_gap_confirmation",
            FinalizeOutcome::NeedsFinalConfirmation { .. } => "needs_final_confirmation",
            FinalizeOutcome::BlockCompleted { .. } => "block_completed",
            FinalizeOutcome::ExamComplete { .. } => "exam_complete",
        }
    }

    pub fn notification(&self) -> Notification {
        match self {
            FinalizeOutcome::NeedsReview { .. } => {
                Notification::info("Did you review all answers in this block?")
            }
            FinalizeOutcome::SkipSelectionRequired { .. } => Notification::warning(
                "You must choose one question to skip before finalizing this block!",
            ),
            FinalizeOutcome::NeedsGapConfirmation { block, unanswered } => {
                Notification::warning(format!(
                    "You have {} unanswered question(s) in block {}. Finalize anyway?",
                    unanswered, block
                ))
            }
            FinalizeOutcome::NeedsFinalConfirmation { block, closes_exam } => {
                if *closes_exam {
                    Notification::warning(format!(
                        "You are about to close block {} and finish the exam. Continue?",
                        block
                    ))
                } else {
                    Notification::info(format!(
                        "Are you sure you want to finalize block {}?",
                        block
                    ))
                }
            }
            FinalizeOutcome::BlockCompleted { block, .. }
            | FinalizeOutcome::ExamComplete { block } => {
                Notification::success(format!("Block {} finalized!", block))
            }
        }
    }
}

fn record_navigation<T>(kind: &str, result: &Result<T, ExamError>) {
    let label = if result.is_ok() { "ok" } else { "rejected" };
    EXAM_NAVIGATIONS_TOTAL
        .with_label_values(&[kind, label])
        .inc();
}

/// Owns one exam attempt: questions, rules and mutable state.
pub struct ExamController {
    questions: Vec<Question>,
    blocks: BlockStructure,
    state: SessionState,
    phase: ExamPhase,
    shuffler: AnswerShuffler,
    countdown: CountdownSettings,
    pending_finalize: bool,
}

impl ExamController {
    pub fn new(
        questions: Vec<Question>,
        blocks: BlockStructure,
        shuffler: AnswerShuffler,
        countdown: CountdownSettings,
    ) -> Self {
        Self {
            questions,
            blocks,
            state: SessionState::new(),
            phase: ExamPhase::NotStarted,
            shuffler,
            countdown,
            pending_finalize: false,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn blocks(&self) -> &BlockStructure {
        &self.blocks
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> ExamPhase {
        self.phase
    }

    pub fn is_in_progress(&self) -> bool {
        self.phase == ExamPhase::InProgress
    }

    pub fn pending_skip_choice(&self) -> bool {
        self.pending_finalize
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.state.current_question_index)
    }

    /// Indices of `block` that exist in the loaded question list.
    fn block_indices(&self, block: usize) -> Range<usize> {
        let range = self.blocks.block_range(block);
        range.start.min(self.questions.len())..range.end.min(self.questions.len())
    }

    /// The last block, or any block past which there are no more questions.
    fn closes_exam(&self, block: usize) -> bool {
        self.blocks.is_last_block(block) || self.blocks.block_end(block) >= self.questions.len()
    }

    fn require_in_progress(&self) -> Result<(), ExamError> {
        if self.is_in_progress() {
            Ok(())
        } else {
            Err(ExamError::NotInProgress)
        }
    }

    /// Returns false when the exam had already been started.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.phase != ExamPhase::NotStarted {
            tracing::debug!("Exam already started, ignoring start");
            return false;
        }

        self.state.exam_started = true;
        self.state.exam_start_time = Some(now);
        self.state.question_started_at = Some(now);
        self.phase = ExamPhase::InProgress;
        self.shuffler.map_for(self.state.current_question_index);
        SESSIONS_ACTIVE.set(1);

        tracing::info!(
            "Exam started at {} with {} questions in {} blocks",
            now,
            self.questions.len(),
            self.blocks.block_count()
        );
        true
    }

    pub fn go_to(&mut self, target: usize, now: DateTime<Utc>) -> Result<(), ExamError> {
        let result = self.move_to(target, now);
        record_navigation("goto", &result);
        result
    }

    fn move_to(&mut self, target: usize, now: DateTime<Utc>) -> Result<(), ExamError> {
        self.require_in_progress()?;
        if target >= self.questions.len() {
            tracing::warn!(
                "Navigation to question {} rejected: only {} questions",
                target,
                self.questions.len()
            );
            return Err(ExamError::OutOfRange { index: target });
        }

        // Blocks only change through finalization
        let block = self.blocks.block_of(target);
        if self.state.completed_blocks.contains(&block) {
            return Err(ExamError::BlockClosed { block });
        }
        if block != self.state.current_block {
            return Err(ExamError::OutsideCurrentBlock {
                index: target,
                block: self.state.current_block,
            });
        }

        self.state.flush_time(now);
        self.state.current_question_index = target;
        self.shuffler.map_for(target);

        Ok(())
    }

    pub fn next(&mut self, now: DateTime<Utc>) -> Result<(), ExamError> {
        let result = self.require_in_progress().and_then(|_| {
            let current = self.state.current_question_index;
            if self.blocks.is_last_in_block(current) || current + 1 >= self.questions.len() {
                return Err(ExamError::BlockBoundary {
                    index: current,
                    block: self.state.current_block,
                });
            }
            self.move_to(current + 1, now)
        });
        record_navigation("next", &result);
        result
    }

    /// Records `displayed` for the current question. Returns the question index.
    pub fn answer(&mut self, displayed: ChoiceLabel) -> Result<usize, ExamError> {
        self.require_in_progress()?;
        let index = self.state.current_question_index;
        if self.state.is_skipped(index) {
            return Err(ExamError::QuestionSkipped { index });
        }

        self.shuffler.map_for(index);
        self.state.answers.insert(index, displayed);
        tracing::debug!("Answer '{}' recorded for question {}", displayed, index);
        Ok(index)
    }

    pub fn toggle_skip_current(&mut self) -> Result<SkipToggle, ExamError> {
        self.require_in_progress()?;
        let index = self.state.current_question_index;
        match skip_quota::toggle_skip(&mut self.state, &self.blocks, index) {
            SkipToggle::Denied => Err(ExamError::SkipQuotaExceeded {
                block: self.blocks.block_of(index),
            }),
            toggled => Ok(toggled),
        }
    }

    pub fn finalize_block(
        &mut self,
        ack: FinalizeAck,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, ExamError> {
        match self.phase {
            ExamPhase::NotStarted => return Err(ExamError::NotStarted),
            ExamPhase::InProgress => {}
            ExamPhase::Finalizing | ExamPhase::Submitted => return Err(ExamError::NotInProgress),
        }

        let outcome = self.evaluate_finalize(ack, now);
        BLOCK_FINALIZATIONS_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        Ok(outcome)
    }

    fn evaluate_finalize(&mut self, ack: FinalizeAck, now: DateTime<Utc>) -> FinalizeOutcome {
        let block = self.state.current_block;
        if !ack.reviewed {
            return FinalizeOutcome::NeedsReview { block };
        }

        let indices = self.block_indices(block);
        if skip_quota::skipped_in_block(&self.state, &self.blocks, block).is_empty() {
            self.pending_finalize = true;
            tracing::info!("Block {} has no skip yet, asking for one", block);
            return FinalizeOutcome::SkipSelectionRequired {
                block,
                candidates: indices.collect(),
            };
        }

        let total = indices.len();
        let completed = indices
            .filter(|i| self.state.is_answered(*i) || self.state.is_skipped(*i))
            .count();
        if completed < total && !ack.accept_gaps {
            return FinalizeOutcome::NeedsGapConfirmation {
                block,
                unanswered: total - completed,
            };
        }

        let closes_exam = self.closes_exam(block);
        if !ack.confirmed {
            return FinalizeOutcome::NeedsFinalConfirmation { block, closes_exam };
        }

        self.pending_finalize = false;
        self.state.completed_blocks.insert(block);
        tracing::info!("Block {} finalized", block);

        if closes_exam {
            return FinalizeOutcome::ExamComplete { block };
        }

        let next_block = block + 1;
        self.state.flush_time(now);
        self.state.current_block = next_block;
        self.state.current_question_index = self.blocks.block_start(next_block);
        self.shuffler.map_for(self.state.current_question_index);

        FinalizeOutcome::BlockCompleted { block, next_block }
    }

    /// Confirms the question picked in the skip-selection prompt. When the
    /// prompt was opened by a finalization, that finalization is resumed.
    pub fn choose_skip(
        &mut self,
        index: usize,
        ack: FinalizeAck,
        now: DateTime<Utc>,
    ) -> Result<Option<FinalizeOutcome>, ExamError> {
        self.require_in_progress()?;
        let block = self.state.current_block;
        if !self.block_indices(block).contains(&index) {
            return Err(ExamError::OutsideCurrentBlock { index, block });
        }
        if !skip_quota::can_skip(&self.state, &self.blocks, index) {
            return Err(ExamError::SkipQuotaExceeded { block });
        }

        if self.state.skipped.insert(index) {
            self.state.answers.remove(&index);
            tracing::info!("Question {} chosen as the skip of block {}", index, block);
        }

        if self.pending_finalize {
            self.pending_finalize = false;
            return self.finalize_block(ack, now).map(Some);
        }
        Ok(None)
    }

    /// Returns whether a finalization was waiting on the prompt.
    pub fn cancel_skip_choice(&mut self) -> bool {
        std::mem::replace(&mut self.pending_finalize, false)
    }

    /// Single entry into termination. Only the first call after the exam
    /// started yields a result.
    pub fn begin_termination(&mut self, now: DateTime<Utc>) -> Option<FinalizedExam> {
        if self.phase != ExamPhase::InProgress {
            tracing::debug!(
                "Termination ignored in phase {}",
                self.phase.as_str()
            );
            return None;
        }

        self.state.flush_time(now);
        self.phase = ExamPhase::Finalizing;
        self.pending_finalize = false;
        SESSIONS_ACTIVE.set(0);

        Some(finalization_service::finalize(
            &self.questions,
            &self.blocks,
            &self.state,
            &self.shuffler,
            now,
        ))
    }

    pub fn mark_submitted(&mut self) {
        self.phase = ExamPhase::Submitted;
    }

    pub fn view(&mut self, now: DateTime<Utc>) -> SessionView {
        let current_index = self.state.current_question_index;
        let current_block = self.state.current_block;
        let in_progress = self.is_in_progress();

        let blocks = (1..=self.blocks.block_count())
            .map(|block| BlockIndicator {
                block,
                size: self.blocks.block_size(block),
                status: if block == current_block {
                    BlockStatus::Current
                } else if self.state.completed_blocks.contains(&block) {
                    BlockStatus::Completed
                } else {
                    BlockStatus::Pending
                },
            })
            .collect();

        let navigation = self
            .block_indices(current_block)
            .map(|index| NavItem {
                index,
                number: index + 1,
                status: if self.state.is_answered(index) {
                    NavStatus::Answered
                } else if self.state.is_skipped(index) {
                    NavStatus::Skipped
                } else {
                    NavStatus::Unanswered
                },
                current: index == current_index,
            })
            .collect();

        let question = if in_progress {
            self.question_view(current_index)
        } else {
            None
        };

        let skipped = self.state.is_skipped(current_index);
        let skip_toggle = SkipToggleView {
            checked: skipped,
            enabled: in_progress
                && (skipped || skip_quota::can_skip(&self.state, &self.blocks, current_index)),
        };

        let next_enabled = in_progress
            && !self.blocks.is_last_in_block(current_index)
            && current_index + 1 < self.questions.len();

        let timer = self.state.exam_start_time.map(|started_at| {
            let countdown = Countdown::new(self.countdown, started_at);
            let remaining_ms = countdown.remaining_ms(now);
            TimerView {
                started_at,
                remaining_ms,
                remaining: format_hms(remaining_ms),
                warning: countdown.is_warning(now),
            }
        });

        SessionView {
            phase: self.phase,
            total_questions: self.questions.len(),
            current_question_index: current_index,
            current_block,
            answered_count: self.state.answers.len(),
            skipped_count: self.state.skipped.len(),
            blocks,
            navigation,
            question,
            skip_toggle,
            next_enabled,
            finalize_enabled: in_progress,
            pending_skip_choice: self.pending_finalize,
            timer,
        }
    }

    fn question_view(&mut self, index: usize) -> Option<QuestionView> {
        let question = self.questions.get(index)?;
        let choices = self
            .shuffler
            .shuffle(index, question)
            .into_iter()
            .map(DisplayChoice::from)
            .collect();
        let skipped = self.state.is_skipped(index);

        Some(QuestionView {
            index,
            id: question.id,
            title: format!("Question {:02}", index + 1),
            enunciado: question.enunciado.clone(),
            choices,
            selected: if skipped {
                None
            } else {
                self.state.answers.get(&index).copied()
            },
            skipped,
            images: Vec::new(),
        })
    }
}
