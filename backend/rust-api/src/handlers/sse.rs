use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};

use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    models::timer::{ExamSubmitted, TimerEvent},
    services::AppState,
};

/// SSE endpoint for timer events
/// GET /api/exam/stream
pub async fn exam_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let receiver = state.timer_events.subscribe();

    // A client connecting after submission only needs to learn where to go
    let already_submitted = state
        .last_submission
        .read()
        .await
        .as_ref()
        .map(|submission| {
            TimerEvent::ExamSubmitted(ExamSubmitted {
                redirect_url: submission.redirect_url.clone(),
                timestamp: Utc::now(),
            })
        });

    tracing::info!(
        "Client connected to exam stream ({} subscribers)",
        state.timer_events.receiver_count()
    );

    Sse::new(create_event_stream(receiver, already_submitted)).keep_alive(KeepAlive::default())
}

/// Decrements the connection gauge when the stream is dropped.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
        tracing::debug!("Exam stream closed");
    }
}

struct StreamState {
    receiver: Receiver<TimerEvent>,
    pending: Option<TimerEvent>,
    finished: bool,
    _guard: ConnectionGuard,
}

fn to_sse(event: &TimerEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .data(event.to_sse_data())
}

/// Forwards broadcast events until the exam is submitted or the channel closes.
fn create_event_stream(
    receiver: Receiver<TimerEvent>,
    pending: Option<TimerEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = StreamState {
        receiver,
        pending,
        finished: false,
        _guard: ConnectionGuard::new(),
    };

    stream::unfold(initial, |mut st| async move {
        if st.finished {
            return None;
        }

        if let Some(event) = st.pending.take() {
            st.finished = event.is_final();
            return Some((Ok(to_sse(&event)), st));
        }

        loop {
            match st.receiver.recv().await {
                Ok(event) => {
                    st.finished = event.is_final();
                    return Some((Ok(to_sse(&event)), st));
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Ticks are superseded by the next one, dropping them is harmless
                    tracing::debug!("Exam stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
