#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use simulado_api::{
    config::Config,
    create_router,
    models::submission::{SubmissionPayload, SubmissionResponse},
    models::{Question, QuestionImage},
    services::question_source::QuestionSource,
    services::submission_service::SubmissionApi,
    services::AppState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// In-memory stand-in for the upstream simulado API.
pub struct FakeUpstream {
    pub questions: Option<Vec<Question>>,
    pub images: HashMap<i64, Vec<QuestionImage>>,
    pub accept_submissions: bool,
    pub submissions: Mutex<Vec<SubmissionPayload>>,
    pub image_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn with_questions(count: usize) -> Self {
        Self {
            questions: Some(sample_questions(count)),
            images: HashMap::new(),
            accept_submissions: true,
            submissions: Mutex::new(Vec::new()),
            image_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_session() -> Self {
        Self {
            questions: None,
            ..Self::with_questions(0)
        }
    }

    pub fn rejecting_submissions(mut self) -> Self {
        self.accept_submissions = false;
        self
    }

    pub fn with_image(mut self, question_id: i64) -> Self {
        self.images.insert(
            question_id,
            vec![QuestionImage {
                base64: "iVBORw0KGgo=".to_string(),
                filename: Some("figura.png".to_string()),
            }],
        );
        self
    }

    pub fn submitted(&self) -> Vec<SubmissionPayload> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionSource for FakeUpstream {
    async fn current_session(&self) -> Result<Option<Vec<Question>>> {
        Ok(self.questions.clone())
    }

    async fn question_images(&self, question_id: i64) -> Result<Vec<QuestionImage>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.images.get(&question_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SubmissionApi for FakeUpstream {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionResponse> {
        if !self.accept_submissions {
            return Err(anyhow!("simulado API is down"));
        }
        self.submissions.lock().unwrap().push(payload.clone());
        Ok(SubmissionResponse {
            success: true,
            redirect_url: Some("/resultado/1".to_string()),
        })
    }
}

/// Question `i` has id `1000 + i` and gabarito `a`.
pub fn sample_questions(count: usize) -> Vec<Question> {
    (0..count)
        .map(|i| {
            serde_json::from_value(serde_json::json!({
                "id": 1000 + i as i64,
                "enunciado": format!("Enunciado da questão {}", i + 1),
                "a": "alternativa a",
                "b": "alternativa b",
                "c": "alternativa c",
                "d": "alternativa d",
                "e": "alternativa e",
                "gabarito": "a",
                "bloco": 1
            }))
            .expect("valid question")
        })
        .collect()
}

/// Deterministic configuration: no shuffling and a fast tick.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.exam.shuffle_choices = false;
    config.exam.tick_interval_ms = 20;
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub upstream: Arc<FakeUpstream>,
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(FakeUpstream::with_questions(24), test_config()).await
}

pub async fn create_test_app_with(upstream: FakeUpstream, config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let upstream = Arc::new(upstream);
    let state = Arc::new(
        AppState::new(config, upstream.clone(), upstream.clone())
            .await
            .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        upstream,
    }
}

impl TestApp {
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::POST, uri, None).await
    }
}

pub fn ack_all() -> Value {
    serde_json::json!({ "reviewed": true, "accept_gaps": true, "confirmed": true })
}
