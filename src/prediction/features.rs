use crate::ingest::normalize::parse_time_key;
use crate::state::{Channel, Reading};
use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};

/// Stand-in for a TVOC channel that never reported.
pub const DEFAULT_TVOC: f64 = 100.0;

pub const PRIMARY_FEATURE_NAMES: [&str; 8] = [
    "co2",
    "temperature",
    "humidity",
    "tvoc",
    "ambient_temp",
    "hour",
    "day_of_week",
    "month",
];

pub const SECONDARY_FEATURE_NAMES: [&str; 2] = ["co2", "temperature"];

/// Epoch means plus calendar features of the mean timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub tvoc: f64,
    pub ambient_temp: f64,
    pub hour: f64,
    /// Monday is 0.
    pub day_of_week: f64,
    pub month: f64,
}

impl FeatureVector {
    /// Row for the primary model, ordered as [`PRIMARY_FEATURE_NAMES`].
    pub fn primary(&self) -> [f64; 8] {
        [
            self.co2,
            self.temperature,
            self.humidity,
            self.tvoc,
            self.ambient_temp,
            self.hour,
            self.day_of_week,
            self.month,
        ]
    }

    pub fn secondary(&self) -> [f64; 2] {
        [self.co2, self.temperature]
    }
}

fn channel_mean(history: &[Reading], channel: Channel) -> Option<f64> {
    let (sum, count) = history
        .iter()
        .filter_map(|reading| reading.value(channel))
        .fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / f64::from(count))
}

fn calendar_features(history: &[Reading]) -> Option<(f64, f64, f64)> {
    let seconds: Vec<i64> = history
        .iter()
        .filter_map(|reading| parse_time_key(reading.time.as_deref()?))
        .map(|time| time.and_utc().timestamp())
        .collect();
    if seconds.is_empty() {
        return None;
    }
    let mean = seconds.iter().sum::<i64>() / seconds.len() as i64;
    // Keys are local wall-clock values; reading them back as UTC keeps them unshifted.
    let mean = DateTime::from_timestamp(mean, 0)?.naive_utc();
    Some((
        f64::from(mean.hour()),
        f64::from(mean.weekday().num_days_from_monday()),
        f64::from(mean.month()),
    ))
}

/// Computes the feature vector of an epoch; `None` when the history is empty.
pub fn compute_features(history: &[Reading]) -> Option<FeatureVector> {
    if history.is_empty() {
        return None;
    }

    let temperature = channel_mean(history, Channel::Temperature).unwrap_or(0.0);
    let (hour, day_of_week, month) = calendar_features(history).unwrap_or_default();

    Some(FeatureVector {
        co2: channel_mean(history, Channel::Co2).unwrap_or(0.0),
        temperature,
        humidity: channel_mean(history, Channel::Humidity).unwrap_or(0.0),
        tvoc: channel_mean(history, Channel::Tvoc).unwrap_or(DEFAULT_TVOC),
        ambient_temp: channel_mean(history, Channel::AmbientTemp).unwrap_or(temperature),
        hour,
        day_of_week,
        month,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(time: &str, co2: Option<f64>, temperature: Option<f64>) -> Reading {
        Reading {
            time: Some(time.to_string()),
            co2,
            temperature,
            humidity: Some(40.0),
            ..Reading::default()
        }
    }

    #[test]
    fn empty_history_has_no_features() {
        assert_eq!(compute_features(&[]), None);
    }

    #[test]
    fn means_ignore_absent_values() {
        let history = vec![
            reading("2024-05-06 10:15", Some(800.0), Some(21.0)),
            reading("2024-05-06 10:16", None, Some(22.0)),
            reading("2024-05-06 10:17", Some(1000.0), None),
        ];

        let features = compute_features(&history).unwrap_or_default();

        assert_eq!(features.co2, 900.0);
        assert_eq!(features.temperature, 21.5);
        assert_eq!(features.humidity, 40.0);
    }

    #[test]
    fn missing_tvoc_and_ambient_take_defaults() {
        let history = vec![reading("2024-05-06 10:15", Some(800.0), Some(21.0))];

        let features = compute_features(&history).unwrap_or_default();

        assert_eq!(features.tvoc, DEFAULT_TVOC);
        assert_eq!(features.ambient_temp, 21.0);
    }

    #[test]
    fn calendar_features_use_mean_timestamp() {
        // Monday 2024-05-06; mean of 09:50 and 10:30 is 10:10
        let history = vec![
            reading("2024-05-06 09:50", Some(800.0), Some(21.0)),
            reading("2024-05-06 10:30", Some(800.0), Some(21.0)),
        ];

        let features = compute_features(&history).unwrap_or_default();

        assert_eq!(features.hour, 10.0);
        assert_eq!(features.day_of_week, 0.0);
        assert_eq!(features.month, 5.0);
    }

    #[test]
    fn history_without_time_keys_zeroes_calendar_features() {
        let history = vec![Reading {
            co2: Some(700.0),
            ..Reading::default()
        }];

        let features = compute_features(&history).unwrap_or_default();

        assert_eq!(features.co2, 700.0);
        assert_eq!(features.temperature, 0.0);
        assert_eq!((features.hour, features.day_of_week, features.month), (0.0, 0.0, 0.0));
    }

    #[test]
    fn rows_follow_fixed_order() {
        let features = FeatureVector {
            co2: 1.0,
            temperature: 2.0,
            humidity: 3.0,
            tvoc: 4.0,
            ambient_temp: 5.0,
            hour: 6.0,
            day_of_week: 7.0,
            month: 8.0,
        };

        assert_eq!(features.primary(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(features.secondary(), [1.0, 2.0]);
        assert_eq!(PRIMARY_FEATURE_NAMES.len(), features.primary().len());
    }
}
