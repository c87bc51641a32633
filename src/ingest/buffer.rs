//! Epoch-scoped accumulation of per-channel value sequences.
//!
//! Index `i` of every sequence refers to the same reading slot. A slot is
//! opened whenever a time marker different from the most recent one arrives;
//! channel values are placed into the latest slot, padding with `None`.

use crate::state::{Channel, PartialReading, Reading};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationBuffer {
    time: Vec<Option<String>>,
    temperature: Vec<Option<f64>>,
    humidity: Vec<Option<f64>>,
    co2: Vec<Option<f64>>,
    tvoc: Vec<Option<f64>>,
    ambient_temp: Vec<Option<f64>>,
}

impl AggregationBuffer {
    pub fn times(&self) -> &[Option<String>] {
        &self.time
    }

    pub fn channel(&self, channel: Channel) -> &[Option<f64>] {
        match channel {
            Channel::Temperature => &self.temperature,
            Channel::Humidity => &self.humidity,
            Channel::Co2 => &self.co2,
            Channel::Tvoc => &self.tvoc,
            Channel::AmbientTemp => &self.ambient_temp,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut Vec<Option<f64>> {
        match channel {
            Channel::Temperature => &mut self.temperature,
            Channel::Humidity => &mut self.humidity,
            Channel::Co2 => &mut self.co2,
            Channel::Tvoc => &mut self.tvoc,
            Channel::AmbientTemp => &mut self.ambient_temp,
        }
    }

    /// Most recently recorded time marker.
    pub fn latest_time(&self) -> Option<&str> {
        self.time.last().and_then(|t| t.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty() && Channel::ALL.iter().all(|c| self.channel(*c).is_empty())
    }

    /// True once any sensor channel holds data.
    pub fn is_materializable(&self) -> bool {
        Channel::ALL.iter().any(|c| !self.channel(*c).is_empty())
    }

    /// Length of the longest sequence.
    pub fn slots(&self) -> usize {
        Channel::ALL
            .iter()
            .map(|c| self.channel(*c).len())
            .chain(std::iter::once(self.time.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn merge(&mut self, partial: &PartialReading) {
        if let Some(time) = partial.time.as_deref()
            && self.latest_time() != Some(time)
        {
            self.time.push(Some(time.to_string()));
        }

        let slot = self.time.len().saturating_sub(1);
        for channel in Channel::ALL {
            if let Some(value) = partial.value(channel) {
                place(self.channel_mut(channel), slot, value);
            }
        }
    }

    /// Pads every written sequence to the same length and returns one
    /// [`Reading`] per slot. Channels never written stay empty and read as absent.
    pub fn materialize(&mut self) -> Vec<Reading> {
        let slots = self.slots();
        if !self.time.is_empty() {
            self.time.resize(slots, None);
        }
        for channel in Channel::ALL {
            let series = self.channel_mut(channel);
            if !series.is_empty() {
                series.resize(slots, None);
            }
        }

        (0..slots)
            .map(|index| Reading {
                time: self.time.get(index).cloned().flatten(),
                humidity: self.humidity.get(index).copied().flatten(),
                temperature: self.temperature.get(index).copied().flatten(),
                co2: self.co2.get(index).copied().flatten(),
                tvoc: self.tvoc.get(index).copied().flatten(),
                ambient_temp: self.ambient_temp.get(index).copied().flatten(),
            })
            .collect()
    }

    /// Empties every sequence in place.
    pub fn clear(&mut self) {
        self.time.clear();
        for channel in Channel::ALL {
            self.channel_mut(channel).clear();
        }
    }
}

// A later value for an already filled slot replaces it.
fn place(series: &mut Vec<Option<f64>>, slot: usize, value: f64) {
    if series.len() > slot {
        series[slot] = Some(value);
    } else {
        series.resize(slot, None);
        series.push(Some(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn climate(time: &str, temperature: f64, humidity: f64, co2: f64) -> PartialReading {
        PartialReading {
            time: Some(time.to_string()),
            temperature: Some(temperature),
            humidity: Some(humidity),
            co2: Some(co2),
            ..PartialReading::default()
        }
    }

    fn tvoc(time: Option<&str>, value: f64) -> PartialReading {
        PartialReading {
            time: time.map(str::to_string),
            tvoc: Some(value),
            ..PartialReading::default()
        }
    }

    fn ambient(time: Option<&str>, value: f64) -> PartialReading {
        PartialReading {
            time: time.map(str::to_string),
            ambient_temp: Some(value),
            ..PartialReading::default()
        }
    }

    fn written_lengths(buffer: &AggregationBuffer) -> Vec<usize> {
        let mut lengths: Vec<usize> = Channel::ALL
            .iter()
            .map(|c| buffer.channel(*c).len())
            .filter(|len| *len > 0)
            .collect();
        if !buffer.times().is_empty() {
            lengths.push(buffer.times().len());
        }
        lengths
    }

    #[test]
    fn three_topics_at_same_minute_yield_one_complete_reading() {
        let mut buffer = AggregationBuffer::default();
        buffer.merge(&climate("2024-05-06 10:15", 21.4, 45.0, 812.0));
        buffer.merge(&tvoc(Some("2024-05-06 10:15"), 120.0));
        buffer.merge(&ambient(Some("2024-05-06 10:15"), 14.2));

        let readings = buffer.materialize();

        assert_eq!(readings.len(), 1);
        let reading = &readings[0];
        assert!(reading.is_fully_qualified());
        assert_eq!(reading.tvoc, Some(120.0));
        assert_eq!(reading.ambient_temp, Some(14.2));
    }

    #[test]
    fn time_marker_is_deduplicated_against_latest_value() {
        let mut buffer = AggregationBuffer::default();
        buffer.merge(&climate("2024-05-06 10:15", 21.0, 45.0, 800.0));
        buffer.merge(&tvoc(Some("2024-05-06 10:15"), 100.0));
        buffer.merge(&climate("2024-05-06 10:16", 21.1, 45.2, 805.0));

        assert_eq!(
            buffer.times(),
            &[
                Some("2024-05-06 10:15".to_string()),
                Some("2024-05-06 10:16".to_string())
            ]
        );
    }

    #[test]
    fn late_channel_lands_in_current_slot() {
        let mut buffer = AggregationBuffer::default();
        buffer.merge(&climate("2024-05-06 10:15", 21.0, 45.0, 800.0));
        buffer.merge(&tvoc(None, 100.0));
        buffer.materialize();
        buffer.merge(&climate("2024-05-06 10:16", 21.1, 45.2, 805.0));
        buffer.materialize();
        buffer.merge(&tvoc(None, 140.0));

        let readings = buffer.materialize();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].tvoc, Some(100.0));
        assert_eq!(readings[1].tvoc, Some(140.0));
        assert_eq!(readings[1].time.as_deref(), Some("2024-05-06 10:16"));
    }

    #[test]
    fn missing_channels_materialize_as_absent() {
        let mut buffer = AggregationBuffer::default();
        buffer.merge(&tvoc(Some("2024-05-06 10:15"), 90.0));

        let readings = buffer.materialize();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].co2, None);
        assert_eq!(readings[0].temperature, None);
        assert_eq!(readings[0].humidity, None);
        assert!(!readings[0].is_fully_qualified());
        assert!(buffer.channel(Channel::Co2).is_empty());
    }

    #[test]
    fn sequences_have_equal_length_after_every_materialization() {
        let script = vec![
            climate("2024-05-06 10:15", 21.0, 45.0, 800.0),
            tvoc(None, 100.0),
            tvoc(None, 101.0),
            ambient(Some("2024-05-06 10:17"), 12.0),
            climate("2024-05-06 10:17", 21.2, 45.1, 820.0),
            climate("2024-05-06 10:18", 21.3, 45.3, 830.0),
            ambient(None, 12.5),
            tvoc(Some("2024-05-06 10:15"), 99.0),
            climate("2024-05-06 10:19", 21.4, 45.4, 840.0),
        ];

        let mut buffer = AggregationBuffer::default();
        for partial in &script {
            buffer.merge(partial);
            let readings = buffer.materialize();
            let lengths = written_lengths(&buffer);
            assert!(lengths.iter().all(|len| *len == readings.len()), "{lengths:?}");
        }
    }

    #[test]
    fn channel_without_any_time_still_materializes() {
        let mut buffer = AggregationBuffer::default();
        buffer.merge(&ambient(None, 11.0));
        assert!(buffer.is_materializable());

        let readings = buffer.materialize();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].time, None);
        assert_eq!(readings[0].ambient_temp, Some(11.0));
    }

    #[test]
    fn clear_empties_in_place() {
        let mut buffer = AggregationBuffer::default();
        buffer.merge(&climate("2024-05-06 10:15", 21.0, 45.0, 800.0));
        buffer.materialize();

        buffer.clear();

        assert!(buffer.is_empty());
        assert!(!buffer.is_materializable());
        assert!(buffer.materialize().is_empty());
    }
}
