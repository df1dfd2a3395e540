//! Cron-driven tick scheduling.
//!
//! Each service gets one tokio task that sleeps until the next fire time of
//! its cron expression (evaluated in the service's timezone) and then invokes
//! the tick callback. The callback is expected to return quickly; refresh work
//! is spawned by the caller so a slow fetch never shifts the schedule.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A parsed cron expression.
///
/// Accepts the six- and seven-field forms (leading seconds, optional
/// trailing year) and the classic five-field form, which fires at second 0.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let trimmed = expression.trim();
        let fields = trimmed.split_whitespace().count();
        let normalized = if fields == 5 { format!("0 {trimmed}") } else { trimmed.to_string() };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| format!("'{trimmed}': {e}"))?;
        Ok(Self { expression: trimmed.to_string(), schedule })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next fire time strictly after `after`, in UTC.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Parse an IANA timezone name (`America/Buenos_Aires`, `UTC`).
pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| format!("unknown timezone '{name}': {e}"))
}

/// Owns the per-service schedule tasks and the shared stop signal.
pub struct Scheduler {
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        let (stop_tx, _stop_rx) = watch::channel(false);
        Self { stop_tx, tasks: Mutex::new(Vec::new()) }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start invoking `on_tick` for `name` according to `schedule`.
    ///
    /// `on_complete` runs once when the schedule ends, either because the
    /// scheduler stopped or because the expression has no further fire times.
    /// Ignored once the scheduler has been stopped.
    pub fn schedule<F, Fut, C>(&self, name: &str, schedule: CronSchedule, tz: Tz, on_tick: F, on_complete: C)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        if self.is_stopped() {
            tracing::warn!(source = %name, "scheduler already stopped; not scheduling");
            return;
        }

        let mut stop_rx = self.stop_tx.subscribe();
        let task_name = name.to_string();

        tracing::info!(source = %name, cron = %schedule.expression(), timezone = %tz, "scheduling service");

        let handle = tokio::spawn(async move {
            let mut last_fire: Option<DateTime<Utc>> = None;
            loop {
                let now = Utc::now();
                // Never fire the same slot twice if the wall clock lags the timer.
                let from = last_fire.map_or(now, |last| last.max(now));
                let Some(next) = schedule.next_after(from, tz) else {
                    tracing::info!(source = %task_name, "schedule has no further fire times");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }

                last_fire = Some(next);
                tracing::debug!(source = %task_name, "tick");
                on_tick().await;
            }
            tracing::debug!(source = %task_name, "service schedule completed");
            on_complete();
        });

        self.tasks.lock().push((name.to_string(), handle));
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Prevent further ticks and wait for every schedule task to exit.
    ///
    /// Returns the names of the services whose schedules were stopped.
    pub async fn stop(&self) -> Vec<String> {
        self.stop_tx.send_replace(true);
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());

        let mut stopped = Vec::with_capacity(tasks.len());
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                tracing::warn!(source = %name, error = %e, "schedule task ended abnormally");
            }
            stopped.push(name);
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_parse_six_fields() {
        let schedule = CronSchedule::parse("* * * * * *").unwrap();
        assert_eq!(schedule.expression(), "* * * * * *");
    }

    #[test]
    fn test_parse_five_fields_fires_on_second_zero() {
        let schedule = CronSchedule::parse("*/10 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 3, 27).unwrap();
        let next = schedule.next_after(now, Tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CronSchedule::parse("every tuesday").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn test_next_after_respects_timezone() {
        // Midnight in Buenos Aires (UTC-3) is 03:00 UTC.
        let schedule = CronSchedule::parse("0 0 0 * * *").unwrap();
        let tz = parse_timezone("America/Buenos_Aires").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(now, tz).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("UTC").unwrap(), Tz::UTC);
        assert!(parse_timezone("Nowhere/Special").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_ticks_until_stopped() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let completed = Arc::new(AtomicBool::new(false));

        let counter = ticks.clone();
        let done = completed.clone();
        scheduler.schedule(
            "users",
            CronSchedule::parse("* * * * * *").unwrap(),
            Tz::UTC,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
            move || done.store(true, Ordering::SeqCst),
        );

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let stopped = scheduler.stop().await;
        assert_eq!(stopped, vec!["users".to_string()]);
        assert!(scheduler.is_stopped());
        assert!(completed.load(Ordering::SeqCst));

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 1, "expected at least one tick, saw {seen}");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_schedule_after_stop_is_ignored() {
        let scheduler = Scheduler::new();
        scheduler.stop().await;
        scheduler.schedule("late", CronSchedule::parse("* * * * * *").unwrap(), Tz::UTC, || async {}, || {});
        assert!(scheduler.tasks.lock().is_empty());
    }
}
