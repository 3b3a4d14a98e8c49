use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimerAlert(TimerAlert),
    TimeExpired(TimeExpired),
    ExamSubmitted(ExamSubmitted),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub remaining_ms: i64,
    pub elapsed_ms: i64,
    pub total_ms: i64,
    pub remaining: String,
    /// Set while less than the warning threshold is left.
    pub warning: bool,
    pub timestamp: DateTime<Utc>,
}

/// Periodic "time so far" alert, emitted each time elapsed time crosses the
/// next multiple of the alert interval.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerAlert {
    pub elapsed: String,
    pub remaining: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExamSubmitted {
    pub redirect_url: String,
    pub timestamp: DateTime<Utc>,
}

impl TimerEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimerAlert(_) => "timer-alert",
            TimerEvent::TimeExpired(_) => "time-expired",
            TimerEvent::ExamSubmitted(_) => "exam-submitted",
        }
    }

    /// Whether the stream has nothing left to report after this event.
    pub fn is_final(&self) -> bool {
        matches!(self, TimerEvent::ExamSubmitted(_))
    }
}
