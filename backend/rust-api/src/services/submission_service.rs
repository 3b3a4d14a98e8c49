use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::question_source::HttpUpstream;
use crate::metrics::{track_upstream_call, SUBMISSIONS_TOTAL};
use crate::models::submission::{SubmissionPayload, SubmissionResponse};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Write side of the upstream simulado API.
#[async_trait]
pub trait SubmissionApi: Send + Sync {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionResponse>;
}

#[async_trait]
impl SubmissionApi for HttpUpstream {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionResponse> {
        let url = self.url("/api/simulados/submit");

        track_upstream_call("submit", async {
            let response = self
                .http_client
                .post(&url)
                .json(payload)
                .send()
                .await
                .context("Failed to submit simulado results")?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(anyhow!(
                    "Simulado API rejected submission with {}: {}",
                    status,
                    error_text
                ));
            }

            response
                .json::<SubmissionResponse>()
                .await
                .context("Failed to parse submission response")
        })
        .await
    }
}

/// Delivers results and decides where the page goes next. Never fails: any
/// problem on the way sends the user to the fallback redirect.
#[derive(Clone)]
pub struct SubmissionService {
    api: Arc<dyn SubmissionApi>,
    fallback_redirect: String,
    retry: RetryConfig,
}

impl SubmissionService {
    pub fn new(api: Arc<dyn SubmissionApi>, fallback_redirect: String, retry: RetryConfig) -> Self {
        Self {
            api,
            fallback_redirect,
            retry,
        }
    }

    /// Returns the redirect target and whether the upstream accepted the results.
    pub async fn submit_with_fallback(&self, payload: &SubmissionPayload) -> (String, bool) {
        tracing::info!(
            "Submitting {} answers and {} skipped questions",
            payload.answers.len(),
            payload.skipped_questions.len()
        );

        let result = retry_async_with_config("submit results", self.retry.clone(), || {
            self.api.submit(payload)
        })
        .await;

        match result {
            Ok(SubmissionResponse {
                success: true,
                redirect_url: Some(redirect),
            }) => {
                SUBMISSIONS_TOTAL.with_label_values(&["success"]).inc();
                tracing::info!("Results submitted, redirecting to {}", redirect);
                (redirect, true)
            }
            Ok(SubmissionResponse {
                success: true,
                redirect_url: None,
            }) => {
                SUBMISSIONS_TOTAL.with_label_values(&["success"]).inc();
                tracing::warn!(
                    "Results accepted without a redirect, falling back to {}",
                    self.fallback_redirect
                );
                (self.fallback_redirect.clone(), true)
            }
            Ok(response) => {
                SUBMISSIONS_TOTAL.with_label_values(&["rejected"]).inc();
                tracing::warn!(
                    "Submission not accepted (success={}, redirect={:?}), falling back to {}",
                    response.success,
                    response.redirect_url,
                    self.fallback_redirect
                );
                (self.fallback_redirect.clone(), false)
            }
            Err(e) => {
                SUBMISSIONS_TOTAL.with_label_values(&["error"]).inc();
                tracing::error!(
                    "Failed to submit results: {:#}, falling back to {}",
                    e,
                    self.fallback_redirect
                );
                (self.fallback_redirect.clone(), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct StubApi {
        response: Mutex<Option<Result<SubmissionResponse>>>,
    }

    impl StubApi {
        fn new(response: Result<SubmissionResponse>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
            })
        }
    }

    #[async_trait]
    impl SubmissionApi for StubApi {
        async fn submit(&self, _payload: &SubmissionPayload) -> Result<SubmissionResponse> {
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(anyhow!("already consumed")))
        }
    }

    fn payload() -> SubmissionPayload {
        SubmissionPayload {
            answers: BTreeMap::new(),
            skipped_questions: vec![0],
        }
    }

    fn service(api: Arc<StubApi>) -> SubmissionService {
        SubmissionService::new(api, "/".to_string(), RetryConfig::no_retry())
    }

    #[tokio::test]
    async fn success_follows_upstream_redirect() {
        let api = StubApi::new(Ok(SubmissionResponse {
            success: true,
            redirect_url: Some("/resultado/42".to_string()),
        }));
        let (redirect, submitted) = service(api).submit_with_fallback(&payload()).await;
        assert_eq!(redirect, "/resultado/42");
        assert!(submitted);
    }

    #[tokio::test]
    async fn network_failure_falls_back() {
        let api = StubApi::new(Err(anyhow!("connection reset")));
        let (redirect, submitted) = service(api).submit_with_fallback(&payload()).await;
        assert_eq!(redirect, "/");
        assert!(!submitted);
    }

    #[tokio::test]
    async fn unsuccessful_response_falls_back() {
        let api = StubApi::new(Ok(SubmissionResponse {
            success: false,
            redirect_url: Some("/ignored".to_string()),
        }));
        let (redirect, submitted) = service(api).submit_with_fallback(&payload()).await;
        assert_eq!(redirect, "/");
        assert!(!submitted);
    }

    #[tokio::test]
    async fn success_without_redirect_keeps_submitted_flag() {
        let api = StubApi::new(Ok(SubmissionResponse {
            success: true,
            redirect_url: None,
        }));
        let (redirect, submitted) = service(api).submit_with_fallback(&payload()).await;
        assert_eq!(redirect, "/");
        assert!(submitted);
    }
}
