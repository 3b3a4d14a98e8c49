use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use super::exam_service::{ExamService, TerminationReason};
use super::AppState;
use crate::config::ExamSettings;
use crate::metrics::TIMER_ALERTS_TOTAL;
use crate::models::timer::{TimeExpired, TimerAlert, TimerEvent, TimerTick};
use crate::utils::time::format_hms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownSettings {
    pub total_ms: i64,
    pub alert_interval_ms: i64,
    pub warning_threshold_ms: i64,
    pub tick_interval: Duration,
}

impl From<&ExamSettings> for CountdownSettings {
    fn from(settings: &ExamSettings) -> Self {
        Self {
            total_ms: secs_to_ms(settings.total_duration_secs),
            alert_interval_ms: secs_to_ms(settings.alert_interval_secs),
            warning_threshold_ms: secs_to_ms(settings.warning_threshold_secs),
            tick_interval: Duration::from_millis(settings.tick_interval_ms),
        }
    }
}

impl Default for CountdownSettings {
    fn default() -> Self {
        Self::from(&ExamSettings::default())
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// Pure countdown over wall-clock time. Feeding it `now` on every tick yields
/// the events to broadcast.
#[derive(Debug, Clone)]
pub struct Countdown {
    settings: CountdownSettings,
    started_at: DateTime<Utc>,
    next_alert_ms: i64,
    expired: bool,
}

impl Countdown {
    pub fn new(settings: CountdownSettings, started_at: DateTime<Utc>) -> Self {
        Self {
            settings,
            started_at,
            next_alert_ms: settings.alert_interval_ms,
            expired: false,
        }
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_milliseconds().max(0)
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.settings.total_ms - self.elapsed_ms(now)).max(0)
    }

    pub fn is_warning(&self, now: DateTime<Utc>) -> bool {
        self.remaining_ms(now) < self.settings.warning_threshold_ms
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Nothing is emitted once `TimeExpired` has been returned.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<TimerEvent> {
        if self.expired {
            return Vec::new();
        }

        let elapsed = self.elapsed_ms(now);
        let remaining = self.settings.total_ms - elapsed;
        let mut events = Vec::with_capacity(2);

        events.push(TimerEvent::TimerTick(TimerTick {
            remaining_ms: remaining.max(0),
            elapsed_ms: elapsed,
            total_ms: self.settings.total_ms,
            remaining: format_hms(remaining),
            warning: remaining < self.settings.warning_threshold_ms,
            timestamp: now,
        }));

        if remaining <= 0 {
            self.expired = true;
            TIMER_ALERTS_TOTAL.with_label_values(&["expired"]).inc();
            tracing::info!("Exam time expired after {}", format_hms(elapsed));
            events.push(TimerEvent::TimeExpired(TimeExpired {
                timestamp: now,
                message: "Exam time is up!".to_string(),
            }));
            return events;
        }

        if elapsed >= self.next_alert_ms {
            // One alert per crossing, even if several intervals went by unobserved
            while self.next_alert_ms <= elapsed {
                self.next_alert_ms += self.settings.alert_interval_ms;
            }

            TIMER_ALERTS_TOTAL.with_label_values(&["periodic"]).inc();
            let elapsed_h = format_hms(elapsed);
            let remaining_h = format_hms(remaining);
            events.push(TimerEvent::TimerAlert(TimerAlert {
                message: format!(
                    "Exam time\n\nElapsed: {}\nRemaining: {}",
                    elapsed_h, remaining_h
                ),
                elapsed: elapsed_h,
                remaining: remaining_h,
                timestamp: now,
            }));
        }

        events
    }
}

/// Cancels the running countdown task. Dropping the handle cancels it as well.
#[derive(Debug, Default)]
pub struct TimerHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl TimerHandle {
    pub fn idle() -> Self {
        Self { cancel: None }
    }

    pub fn is_armed(&self) -> bool {
        self.cancel.is_some()
    }

    /// Returns false when there was nothing left to cancel.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(tx) => {
                // The task may already have stopped on its own after expiry
                let _ = tx.send(());
                tracing::debug!("Exam timer cancelled");
                true
            }
            None => false,
        }
    }
}

pub struct TimerService;

impl TimerService {
    /// Spawns the ticking task. On expiry it runs the same termination path as
    /// a manual end, then stops.
    pub fn arm(state: Arc<AppState>, started_at: DateTime<Utc>) -> TimerHandle {
        let settings = CountdownSettings::from(&state.config.exam);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        tracing::info!(
            "Arming exam timer: total={}, tick={}ms",
            format_hms(settings.total_ms),
            settings.tick_interval.as_millis()
        );

        tokio::spawn(async move {
            let mut countdown = Countdown::new(settings, started_at);
            let mut interval = tokio::time::interval(settings.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        tracing::debug!("Timer task stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        let events = countdown.evaluate(Utc::now());
                        for event in events {
                            // No subscribers is fine: nobody is watching the stream
                            let _ = state.timer_events.send(event);
                        }

                        if countdown.is_expired() {
                            ExamService::new(state.clone())
                                .terminate(TerminationReason::TimeExpired)
                                .await;
                            break;
                        }
                    }
                }
            }
        });

        TimerHandle {
            cancel: Some(cancel_tx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn countdown() -> (Countdown, DateTime<Utc>) {
        let t0 = Utc::now();
        (Countdown::new(CountdownSettings::default(), t0), t0)
    }

    fn ticks(events: &[TimerEvent]) -> Vec<&TimerTick> {
        events
            .iter()
            .filter_map(|e| match e {
                TimerEvent::TimerTick(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn five_minutes_left_raises_warning() {
        let (mut countdown, t0) = countdown();
        let events = countdown.evaluate(t0 + ChronoDuration::minutes(115));
        let tick = ticks(&events)[0];
        assert!(tick.warning);
        assert_eq!(tick.remaining_ms, 5 * 60 * 1000);
        assert_eq!(tick.remaining, "00:05:00");
    }

    #[test]
    fn no_warning_with_plenty_of_time() {
        let (mut countdown, t0) = countdown();
        let events = countdown.evaluate(t0 + ChronoDuration::minutes(10));
        assert!(!ticks(&events)[0].warning);
        assert!(!countdown.is_warning(t0 + ChronoDuration::minutes(10)));
        assert!(countdown.is_warning(t0 + ChronoDuration::minutes(111)));
    }

    #[test]
    fn expiry_fires_exactly_once() {
        let (mut countdown, t0) = countdown();
        let late = t0 + ChronoDuration::hours(2);

        let events = countdown.evaluate(late);
        let expired = events
            .iter()
            .filter(|e| matches!(e, TimerEvent::TimeExpired(_)))
            .count();
        assert_eq!(expired, 1);
        assert!(countdown.is_expired());

        assert!(countdown.evaluate(late + ChronoDuration::seconds(1)).is_empty());
        assert!(countdown.evaluate(late + ChronoDuration::minutes(5)).is_empty());
    }

    #[test]
    fn no_alert_on_expiry_tick() {
        let (mut countdown, t0) = countdown();
        let events = countdown.evaluate(t0 + ChronoDuration::hours(3));
        assert!(!events
            .iter()
            .any(|e| matches!(e, TimerEvent::TimerAlert(_))));
    }

    #[test]
    fn alerts_every_thirty_minutes() {
        let (mut countdown, t0) = countdown();
        let mut alerts = 0;
        for minute in 0..120 {
            let events = countdown.evaluate(t0 + ChronoDuration::minutes(minute));
            alerts += events
                .iter()
                .filter(|e| matches!(e, TimerEvent::TimerAlert(_)))
                .count();
        }
        // 30, 60 and 90 minutes
        assert_eq!(alerts, 3);
    }

    #[test]
    fn long_pause_yields_a_single_alert() {
        let (mut countdown, t0) = countdown();
        let events = countdown.evaluate(t0 + ChronoDuration::minutes(95));
        let alerts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TimerEvent::TimerAlert(a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].elapsed, "01:35:00");
        assert_eq!(alerts[0].remaining, "00:25:00");

        // next crossing is at 120 minutes, which is expiry
        let events = countdown.evaluate(t0 + ChronoDuration::minutes(100));
        assert!(!events
            .iter()
            .any(|e| matches!(e, TimerEvent::TimerAlert(_))));
    }

    #[test]
    fn handle_cancel_is_idempotent() {
        let (tx, mut rx) = oneshot::channel();
        let mut handle = TimerHandle { cancel: Some(tx) };
        assert!(handle.is_armed());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.is_armed());
        assert!(rx.try_recv().is_ok());

        let mut idle = TimerHandle::idle();
        assert!(!idle.cancel());
    }
}
