use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::block_partitioner::BlockStructure;
use crate::metrics::track_upstream_call;
use crate::models::{parse_images, CurrentSimuladoResponse, Question, QuestionDetailResponse, QuestionImage};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Read side of the upstream simulado API.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// `Ok(None)` when the upstream answers but has no active simulado.
    async fn current_session(&self) -> Result<Option<Vec<Question>>>;

    async fn question_images(&self, question_id: i64) -> Result<Vec<QuestionImage>>;
}

/// reqwest client for the simulado API.
#[derive(Clone)]
pub struct HttpUpstream {
    pub(crate) http_client: Client,
    pub(crate) base_url: String,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl QuestionSource for HttpUpstream {
    async fn current_session(&self) -> Result<Option<Vec<Question>>> {
        let url = self.url("/api/simulados/current");
        tracing::debug!("Fetching current simulado from {}", url);

        track_upstream_call("current", async {
            let response = self
                .http_client
                .get(&url)
                .send()
                .await
                .context("Failed to call simulado API")?;

            if !response.status().is_success() {
                tracing::info!(
                    "Simulado API returned {} for current session",
                    response.status()
                );
                return Ok(None);
            }

            let body: CurrentSimuladoResponse = response
                .json()
                .await
                .context("Failed to parse current simulado response")?;

            Ok(Some(body.questions))
        })
        .await
    }

    async fn question_images(&self, question_id: i64) -> Result<Vec<QuestionImage>> {
        let url = self.url(&format!("/api/simulados/question/{}", question_id));

        track_upstream_call("question", async {
            let response = self
                .http_client
                .get(&url)
                .send()
                .await
                .context("Failed to fetch question details")?;

            if !response.status().is_success() {
                return Err(anyhow!(
                    "Simulado API returned {} for question {}",
                    response.status(),
                    question_id
                ));
            }

            let detail: QuestionDetailResponse = response
                .json()
                .await
                .context("Failed to parse question details")?;

            match detail.imagens {
                Some(raw) => parse_images(&raw)
                    .with_context(|| format!("Invalid imagens for question {}", question_id)),
                None => Ok(Vec::new()),
            }
        })
        .await
    }
}

/// Result of loading the session at start-up or on reload.
#[derive(Debug)]
pub enum SessionLoad {
    Loaded(Vec<Question>),
    NoActiveSession,
    Unavailable(String),
}

/// Fetches the question list and fits it to `blocks`: extra questions are
/// dropped, a shorter list is kept as is.
pub async fn load_session(
    source: &dyn QuestionSource,
    blocks: &BlockStructure,
    retry: RetryConfig,
) -> SessionLoad {
    let fetched =
        retry_async_with_config("load current simulado", retry, || source.current_session()).await;

    match fetched {
        Ok(Some(mut questions)) if !questions.is_empty() => {
            let expected = blocks.total_questions();
            if questions.len() > expected {
                tracing::info!(
                    "Simulado has {} questions, keeping the first {}",
                    questions.len(),
                    expected
                );
                questions.truncate(expected);
            } else if questions.len() < expected {
                tracing::warn!(
                    "Simulado has only {} of {} questions, later blocks will be short",
                    questions.len(),
                    expected
                );
            }
            let mismatched = mismatched_blocks(&questions, blocks);
            if !mismatched.is_empty() {
                tracing::warn!(
                    "Upstream block numbers disagree with the block structure at indices {:?}, using the block structure",
                    mismatched
                );
            }
            tracing::info!("Loaded simulado with {} questions", questions.len());
            SessionLoad::Loaded(questions)
        }
        Ok(_) => {
            tracing::info!("No active simulado");
            SessionLoad::NoActiveSession
        }
        Err(e) => {
            tracing::error!("Failed to load simulado: {:#}", e);
            SessionLoad::Unavailable(format!("{:#}", e))
        }
    }
}

/// Indices whose upstream `bloco` differs from the block the partition assigns.
/// Questions without a `bloco` never count as mismatched.
pub fn mismatched_blocks(questions: &[Question], blocks: &BlockStructure) -> Vec<usize> {
    questions
        .iter()
        .enumerate()
        .filter_map(|(index, question)| match question.bloco {
            Some(bloco) if bloco != blocks.block_of(index) => Some(index),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        questions: Option<Vec<Question>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl QuestionSource for FixedSource {
        async fn current_session(&self) -> Result<Option<Vec<Question>>> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("connection refused"));
            }
            Ok(self.questions.clone())
        }

        async fn question_images(&self, _question_id: i64) -> Result<Vec<QuestionImage>> {
            Ok(Vec::new())
        }
    }

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| {
                serde_json::from_value(serde_json::json!({ "id": i, "enunciado": "x" })).unwrap()
            })
            .collect()
    }

    fn fast_retry(attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            base_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(2),
            jitter_max: None,
        }
    }

    #[test]
    fn upstream_block_numbers_are_checked_against_partition() {
        let mut qs = questions(10);
        qs[0].bloco = Some(1);
        qs[7].bloco = Some(2);
        qs[8].bloco = Some(2);
        qs[9].bloco = Some(1);

        assert_eq!(
            mismatched_blocks(&qs, &BlockStructure::standard()),
            vec![7, 9]
        );
    }

    #[tokio::test]
    async fn truncates_to_block_structure() {
        let source = FixedSource {
            questions: Some(questions(30)),
            failures: AtomicUsize::new(0),
        };
        match load_session(&source, &BlockStructure::standard(), fast_retry(1)).await {
            SessionLoad::Loaded(qs) => assert_eq!(qs.len(), 24),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn short_list_is_accepted() {
        let source = FixedSource {
            questions: Some(questions(10)),
            failures: AtomicUsize::new(0),
        };
        match load_session(&source, &BlockStructure::standard(), fast_retry(1)).await {
            SessionLoad::Loaded(qs) => assert_eq!(qs.len(), 10),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_or_missing_session_is_not_an_error() {
        for questions in [None, Some(Vec::new())] {
            let source = FixedSource {
                questions,
                failures: AtomicUsize::new(0),
            };
            assert!(matches!(
                load_session(&source, &BlockStructure::standard(), fast_retry(1)).await,
                SessionLoad::NoActiveSession
            ));
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let source = FixedSource {
            questions: Some(questions(24)),
            failures: AtomicUsize::new(1),
        };
        assert!(matches!(
            load_session(&source, &BlockStructure::standard(), fast_retry(2)).await,
            SessionLoad::Loaded(_)
        ));
    }

    #[tokio::test]
    async fn persistent_failure_is_unavailable() {
        let source = FixedSource {
            questions: Some(questions(24)),
            failures: AtomicUsize::new(5),
        };
        match load_session(&source, &BlockStructure::standard(), fast_retry(2)).await {
            SessionLoad::Unavailable(reason) => assert!(reason.contains("connection refused")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let upstream = HttpUpstream::new("http://localhost:5000/");
        assert_eq!(
            upstream.url("/api/simulados/current"),
            "http://localhost:5000/api/simulados/current"
        );
    }
}
