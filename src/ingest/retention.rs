use chrono::{DateTime, DurationRound, TimeDelta, Utc};

pub const RETENTION_PERIOD: TimeDelta = TimeDelta::hours(1);

/// Hourly wall-clock boundary after which the epoch state is dropped.
///
/// The boundary only ever advances by one period per crossing so it stays on
/// whole hours regardless of when the check runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionClock {
    boundary: DateTime<Utc>,
}

impl RetentionClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            boundary: now.duration_trunc(RETENTION_PERIOD).unwrap_or(now),
        }
    }

    pub fn boundary(&self) -> DateTime<Utc> {
        self.boundary
    }

    /// Returns the new boundary when `now` reached the end of the epoch.
    pub fn check(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.boundary + RETENTION_PERIOD;
        if now >= next {
            self.boundary = next;
            Some(next)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, minute, second)
            .single()
            .unwrap_or_default()
    }

    #[test]
    fn boundary_starts_at_current_hour() {
        let clock = RetentionClock::starting_at(at(10, 42, 17));
        assert_eq!(clock.boundary(), at(10, 0, 0));
    }

    #[test]
    fn crossing_advances_by_exactly_one_hour() {
        let mut clock = RetentionClock::starting_at(at(10, 42, 17));

        assert_eq!(clock.check(at(10, 59, 59)), None);
        assert_eq!(clock.check(at(11, 0, 3)), Some(at(11, 0, 0)));
        assert_eq!(clock.boundary(), at(11, 0, 0));
        assert_eq!(clock.check(at(11, 30, 0)), None);
    }

    #[test]
    fn late_check_keeps_hourly_alignment() {
        let mut clock = RetentionClock::starting_at(at(10, 5, 0));

        assert_eq!(clock.check(at(13, 20, 0)), Some(at(11, 0, 0)));
        assert_eq!(clock.check(at(13, 20, 5)), Some(at(12, 0, 0)));
        assert_eq!(clock.check(at(13, 20, 9)), Some(at(13, 0, 0)));
        assert_eq!(clock.check(at(13, 21, 0)), None);
    }
}
