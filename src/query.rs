//! Averages over persisted readings, with an optional bounded wait for data.

use crate::ingest::normalize::round2;
use crate::service::SharedContext;
use crate::state::ClassLabel;
use crate::store::{AnalysisRow, StoreError, WindowAverage};
use chrono::NaiveDateTime;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(10),
        }
    }
}

pub async fn average_since(
    context: &SharedContext,
    since: &str,
) -> Result<WindowAverage, StoreError> {
    let mut guard = context.lock().await;
    guard.persistence.average_since(since).await
}

/// Repeats [`average_since`] until a non-null aggregate appears or the policy
/// runs out of attempts. The lock is only held for each query.
pub async fn average_since_with_wait(
    context: &SharedContext,
    since: &str,
    policy: PollPolicy,
) -> Result<WindowAverage, StoreError> {
    let mut latest = WindowAverage::empty(since);
    for attempt in 1..=policy.attempts {
        latest = average_since(context, since).await?;
        if latest.has_data() {
            debug!(since, attempt, "Window has data");
            return Ok(latest);
        }
        if attempt < policy.attempts {
            debug!(since, attempt, "Window still empty, waiting");
            tokio::time::sleep(policy.interval).await;
        }
    }
    info!(since, attempts = policy.attempts, "No data appeared within the polling budget");
    Ok(latest)
}

/// Relative change from `current` to `future` in percent.
pub fn percent_change(current: Option<f64>, future: Option<f64>) -> Option<f64> {
    let (current, future) = (current?, future?);
    if current == 0.0 {
        return None;
    }
    Some(round2((future - current) / current * 100.0))
}

pub fn analysis_row(
    timestamp: NaiveDateTime,
    current: WindowAverage,
    future: WindowAverage,
    decision: ClassLabel,
) -> AnalysisRow {
    AnalysisRow {
        timestamp,
        co2_change: percent_change(current.co2, future.co2),
        temperature_change: percent_change(current.temperature, future.temperature),
        humidity_change: percent_change(current.humidity, future.humidity),
        current,
        future,
        decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(co2: Option<f64>, temperature: Option<f64>) -> WindowAverage {
        WindowAverage {
            timestamp: "2024-05-06 10:15".to_string(),
            co2,
            temperature,
            humidity: None,
        }
    }

    #[test]
    fn percent_change_is_relative_to_current() {
        assert_eq!(percent_change(Some(1000.0), Some(800.0)), Some(-20.0));
        assert_eq!(percent_change(Some(20.0), Some(21.0)), Some(5.0));
    }

    #[test]
    fn percent_change_needs_both_sides_and_non_zero_base() {
        assert_eq!(percent_change(None, Some(800.0)), None);
        assert_eq!(percent_change(Some(800.0), None), None);
        assert_eq!(percent_change(Some(0.0), Some(800.0)), None);
    }

    #[test]
    fn analysis_row_carries_deltas_and_decision() {
        let row = analysis_row(
            NaiveDateTime::default(),
            window(Some(1200.0), Some(24.0)),
            window(Some(900.0), Some(22.8)),
            1,
        );

        assert_eq!(row.co2_change, Some(-25.0));
        assert_eq!(row.temperature_change, Some(-5.0));
        assert_eq!(row.humidity_change, None);
        assert_eq!(row.decision, 1);
    }
}
