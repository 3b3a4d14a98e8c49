use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::navigation_service::{ExamController, ExamError, FinalizeAck, FinalizeOutcome};
use super::skip_quota::SkipToggle;
use super::timer_service::TimerService;
use super::{AppState, SessionSlot};
use crate::metrics::EXAM_TERMINATIONS_TOTAL;
use crate::models::notification::Notification;
use crate::models::session::{ExamPhase, SessionView};
use crate::models::submission::ExamSubmission;
use crate::models::timer::{ExamSubmitted, TimerEvent};
use crate::models::{ChoiceLabel, QuestionImage};

#[derive(Debug, Error)]
pub enum ExamServiceError {
    #[error("No active simulado")]
    NoActiveSession,
    #[error("Simulado API unavailable: {0}")]
    Unavailable(String),
    #[error("The exam is still in progress")]
    ExamInProgress,
    #[error(transparent)]
    Policy(#[from] ExamError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    UserEnded,
    FinalBlockCompleted,
    TimeExpired,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::UserEnded => "user_ended",
            TerminationReason::FinalBlockCompleted => "final_block_completed",
            TerminationReason::TimeExpired => "time_expired",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", content = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    Skip(SkipToggle),
    Finalize(FinalizeOutcome),
    EndNeedsConfirmation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamResponse {
    pub view: SessionView,
    pub notifications: Vec<Notification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<ExamSubmission>,
}

impl ExamResponse {
    fn new(view: SessionView) -> Self {
        Self {
            view,
            notifications: Vec::new(),
            outcome: None,
            submission: None,
        }
    }
}

/// Orchestrates one exam action: controller transition, timer, images and
/// submission. Cheap to build per request.
pub struct ExamService {
    state: Arc<AppState>,
}

impl ExamService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Runs `action` on the controller and renders the view under the same lock.
    async fn mutate<T, F>(&self, action: F) -> Result<(T, SessionView), ExamServiceError>
    where
        F: FnOnce(&mut ExamController, DateTime<Utc>) -> Result<T, ExamError>,
    {
        let now = Utc::now();
        let mut slot = self.state.exam.lock().await;
        let controller = slot.controller_mut()?;
        let value = action(controller, now).map_err(|e| {
            tracing::warn!("Exam action rejected: {}", e);
            e
        })?;
        Ok((value, controller.view(now)))
    }

    pub async fn snapshot(&self) -> Result<ExamResponse, ExamServiceError> {
        let view = {
            let mut slot = self.state.exam.lock().await;
            slot.controller_mut()?.view(Utc::now())
        };
        Ok(ExamResponse::new(self.with_images(view).await))
    }

    pub async fn start(&self) -> Result<ExamResponse, ExamServiceError> {
        let _display = self.state.navigation.lock().await;
        let now = Utc::now();

        let (started, view) = {
            let mut slot = self.state.exam.lock().await;
            let controller = slot.controller_mut()?;
            let started = controller.start(now);
            if started {
                let handle = TimerService::arm(self.state.clone(), now);
                *self.state.timer.lock().await = handle;
            }
            (started, controller.view(now))
        };

        let mut response = ExamResponse::new(self.with_images(view).await);
        if started {
            response
                .notifications
                .push(Notification::success("Exam started. Good luck!"));
        }
        Ok(response)
    }

    pub async fn go_to(&self, index: usize) -> Result<ExamResponse, ExamServiceError> {
        let _display = self.state.navigation.lock().await;
        let (_, view) = self.mutate(|c, now| c.go_to(index, now)).await?;
        Ok(ExamResponse::new(self.with_images(view).await))
    }

    pub async fn next(&self) -> Result<ExamResponse, ExamServiceError> {
        let _display = self.state.navigation.lock().await;
        let (_, view) = self.mutate(|c, now| c.next(now)).await?;
        Ok(ExamResponse::new(self.with_images(view).await))
    }

    pub async fn answer(&self, label: ChoiceLabel) -> Result<ExamResponse, ExamServiceError> {
        let (_, view) = self.mutate(|c, _| c.answer(label)).await?;
        Ok(ExamResponse::new(self.with_images(view).await))
    }

    pub async fn toggle_skip(&self) -> Result<ExamResponse, ExamServiceError> {
        let (toggle, view) = self.mutate(|c, _| c.toggle_skip_current()).await?;

        let mut response = ExamResponse::new(self.with_images(view).await);
        response.notifications.push(toggle.notification());
        response.outcome = Some(ActionOutcome::Skip(toggle));
        Ok(response)
    }

    pub async fn finalize_block(&self, ack: FinalizeAck) -> Result<ExamResponse, ExamServiceError> {
        let _display = self.state.navigation.lock().await;
        let (outcome, view) = self.mutate(|c, now| c.finalize_block(ack, now)).await?;
        self.finish_finalize(outcome, view, Vec::new()).await
    }

    pub async fn choose_skip(
        &self,
        index: usize,
        ack: FinalizeAck,
    ) -> Result<ExamResponse, ExamServiceError> {
        let _display = self.state.navigation.lock().await;
        let (outcome, view) = self.mutate(|c, now| c.choose_skip(index, ack, now)).await?;

        let chosen = Notification::success(format!("Question {} will be skipped.", index + 1));
        match outcome {
            Some(outcome) => self.finish_finalize(outcome, view, vec![chosen]).await,
            None => {
                let mut response = ExamResponse::new(self.with_images(view).await);
                response.notifications.push(chosen);
                Ok(response)
            }
        }
    }

    pub async fn cancel_skip_choice(&self) -> Result<ExamResponse, ExamServiceError> {
        let (_, view) = self
            .mutate(|c, _| Ok(c.cancel_skip_choice()))
            .await?;
        Ok(ExamResponse::new(self.with_images(view).await))
    }

    async fn finish_finalize(
        &self,
        outcome: FinalizeOutcome,
        view: SessionView,
        mut notifications: Vec<Notification>,
    ) -> Result<ExamResponse, ExamServiceError> {
        notifications.push(outcome.notification());

        let (view, submission) = if matches!(outcome, FinalizeOutcome::ExamComplete { .. }) {
            let submission = self.terminate(TerminationReason::FinalBlockCompleted).await;
            (self.current_view().await?, submission)
        } else {
            (self.with_images(view).await, None)
        };

        Ok(ExamResponse {
            view,
            notifications,
            outcome: Some(ActionOutcome::Finalize(outcome)),
            submission,
        })
    }

    /// Manual end. Without `confirmed` only asks for confirmation.
    pub async fn end_exam(&self, confirmed: bool) -> Result<ExamResponse, ExamServiceError> {
        if !confirmed {
            let (_, view) = self
                .mutate(|c, _| {
                    if c.is_in_progress() {
                        Ok(())
                    } else {
                        Err(ExamError::NotInProgress)
                    }
                })
                .await?;
            let mut response = ExamResponse::new(self.with_images(view).await);
            response
                .notifications
                .push(Notification::warning("Are you sure you want to end the exam?"));
            response.outcome = Some(ActionOutcome::EndNeedsConfirmation);
            return Ok(response);
        }

        let submission = self
            .terminate(TerminationReason::UserEnded)
            .await
            .ok_or(ExamError::NotInProgress)?;

        let mut response = ExamResponse::new(self.current_view().await?);
        response
            .notifications
            .push(Notification::info("Exam finished."));
        response.submission = Some(submission);
        Ok(response)
    }

    /// Single termination path for manual end, last block and expiry.
    /// Returns `None` when the exam was not running or already terminated.
    pub async fn terminate(&self, reason: TerminationReason) -> Option<ExamSubmission> {
        let finalized = {
            let mut slot = self.state.exam.lock().await;
            match slot.controller_mut() {
                Ok(controller) => controller.begin_termination(Utc::now()),
                Err(_) => None,
            }
        }?;

        EXAM_TERMINATIONS_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
        tracing::info!("Terminating exam: {}", reason.as_str());

        self.state.timer.lock().await.cancel();

        let (redirect_url, submitted) = self
            .state
            .submissions
            .submit_with_fallback(&finalized.payload)
            .await;

        if let Ok(controller) = self.state.exam.lock().await.controller_mut() {
            controller.mark_submitted();
        }

        let submission = ExamSubmission {
            redirect_url: redirect_url.clone(),
            submitted,
            report: finalized.report,
        };
        *self.state.last_submission.write().await = Some(submission.clone());

        // Nobody may be listening on the stream
        let _ = self
            .state
            .timer_events
            .send(TimerEvent::ExamSubmitted(ExamSubmitted {
                redirect_url,
                timestamp: Utc::now(),
            }));

        Some(submission)
    }

    pub async fn last_submission(&self) -> Option<ExamSubmission> {
        self.state.last_submission.read().await.clone()
    }

    /// Fresh page load: fetches the current simulado again. Refused while an
    /// exam is running.
    pub async fn reload(&self) -> Result<ExamResponse, ExamServiceError> {
        let _display = self.state.navigation.lock().await;

        {
            let slot = self.state.exam.lock().await;
            if let SessionSlot::Ready(controller) = &*slot {
                if matches!(
                    controller.phase(),
                    ExamPhase::InProgress | ExamPhase::Finalizing
                ) {
                    return Err(ExamServiceError::ExamInProgress);
                }
            }
        }

        self.state.timer.lock().await.cancel();
        self.state.image_cache.write().await.clear();
        *self.state.last_submission.write().await = None;

        let slot = SessionSlot::load(
            &self.state.config,
            &self.state.blocks,
            self.state.questions.as_ref(),
        )
        .await;
        tracing::info!("Exam session reloaded: {}", slot.status());
        *self.state.exam.lock().await = slot;

        self.snapshot().await
    }

    async fn current_view(&self) -> Result<SessionView, ExamServiceError> {
        let view = {
            let mut slot = self.state.exam.lock().await;
            slot.controller_mut()?.view(Utc::now())
        };
        Ok(self.with_images(view).await)
    }

    async fn with_images(&self, mut view: SessionView) -> SessionView {
        if let Some(question) = view.question.as_mut() {
            question.images = self.images_for(question.id).await;
        }
        view
    }

    /// Failures are not cached, so the next display tries again.
    async fn images_for(&self, question_id: i64) -> Vec<QuestionImage> {
        if let Some(images) = self.state.image_cache.read().await.get(&question_id) {
            return images.clone();
        }

        match self.state.questions.question_images(question_id).await {
            Ok(images) => {
                self.state
                    .image_cache
                    .write()
                    .await
                    .insert(question_id, images.clone());
                images
            }
            Err(e) => {
                tracing::warn!("Failed to load images for question {}: {:#}", question_id, e);
                Vec::new()
            }
        }
    }
}
