use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::config::Config;
use crate::models::submission::ExamSubmission;
use crate::models::timer::TimerEvent;
use crate::models::QuestionImage;
use crate::utils::retry::RetryConfig;

use self::block_partitioner::BlockStructure;
use self::exam_service::ExamServiceError;
use self::navigation_service::ExamController;
use self::question_source::{load_session, QuestionSource, SessionLoad};
use self::shuffle_service::AnswerShuffler;
use self::submission_service::{SubmissionApi, SubmissionService};
use self::timer_service::{CountdownSettings, TimerHandle};

pub mod block_partitioner;
pub mod exam_service;
pub mod finalization_service;
pub mod navigation_service;
pub mod question_source;
pub mod shuffle_service;
pub mod skip_quota;
pub mod submission_service;
pub mod timer_service;

/// Capacity of the timer event channel. Slow SSE clients skip missed ticks.
const TIMER_EVENT_BUFFER: usize = 64;

/// What the page finds when it loads.
pub enum SessionSlot {
    Ready(Box<ExamController>),
    NoActiveSession,
    Unavailable(String),
}

impl SessionSlot {
    pub async fn load(
        config: &Config,
        blocks: &BlockStructure,
        source: &dyn QuestionSource,
    ) -> Self {
        match load_session(source, blocks, RetryConfig::upstream()).await {
            SessionLoad::Loaded(questions) => SessionSlot::Ready(Box::new(ExamController::new(
                questions,
                blocks.clone(),
                AnswerShuffler::new(config.exam.shuffle_choices),
                CountdownSettings::from(&config.exam),
            ))),
            SessionLoad::NoActiveSession => SessionSlot::NoActiveSession,
            SessionLoad::Unavailable(reason) => SessionSlot::Unavailable(reason),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            SessionSlot::Ready(_) => "ready",
            SessionSlot::NoActiveSession => "no_active_session",
            SessionSlot::Unavailable(_) => "unavailable",
        }
    }

    pub fn controller_mut(&mut self) -> Result<&mut ExamController, ExamServiceError> {
        match self {
            SessionSlot::Ready(controller) => Ok(controller.as_mut()),
            SessionSlot::NoActiveSession => Err(ExamServiceError::NoActiveSession),
            SessionSlot::Unavailable(reason) => Err(ExamServiceError::Unavailable(reason.clone())),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub blocks: BlockStructure,
    pub exam: Mutex<SessionSlot>,
    /// Held for a whole question display (transition and image fetch).
    pub navigation: Mutex<()>,
    pub timer: Mutex<TimerHandle>,
    pub timer_events: broadcast::Sender<TimerEvent>,
    pub questions: Arc<dyn QuestionSource>,
    pub submissions: SubmissionService,
    pub image_cache: RwLock<HashMap<i64, Vec<QuestionImage>>>,
    pub last_submission: RwLock<Option<ExamSubmission>>,
}

impl AppState {
    pub async fn new(
        config: Config,
        questions: Arc<dyn QuestionSource>,
        submissions_api: Arc<dyn SubmissionApi>,
    ) -> anyhow::Result<Self> {
        let blocks = config.exam.blocks()?;

        tracing::info!("Loading current simulado...");
        let slot = SessionSlot::load(&config, &blocks, questions.as_ref()).await;
        tracing::info!("Exam session status: {}", slot.status());

        let submissions = SubmissionService::new(
            submissions_api,
            config.exam.fallback_redirect.clone(),
            RetryConfig::submission(config.exam.submit_retry_attempts),
        );
        let (timer_events, _) = broadcast::channel(TIMER_EVENT_BUFFER);

        Ok(Self {
            config,
            blocks,
            exam: Mutex::new(slot),
            navigation: Mutex::new(()),
            timer: Mutex::new(TimerHandle::idle()),
            timer_events,
            questions,
            submissions,
            image_cache: RwLock::new(HashMap::new()),
            last_submission: RwLock::new(None),
        })
    }
}
