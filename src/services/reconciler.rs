//! Dashboard reconciler - turns a stream of observations into chart samples
//!
//! Driven either by a fixed polling interval or by each pushed event. Both
//! modes feed `tick`, which:
//! - renders placeholders on a failed or empty fetch, leaving history alone
//! - appends a sample only for a real reading that differs from the last one
//! - always refreshes the immediate values and the CO₂ alert

use crate::domain::types::Measurements;
use std::collections::VecDeque;
use time::macros::format_description;
use time::OffsetDateTime;

/// Samples kept for the charts
pub const SAMPLE_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Wall-clock label (HH:MM:SS)
    pub label: String,
    pub measurements: Measurements,
}

/// Bounded FIFO of chart samples
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::with_capacity(SAMPLE_CAPACITY)
    }
}

impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// `(index, value)` points for one metric, oldest first
    pub fn series(&self, metric: impl Fn(&Measurements) -> f64) -> Vec<(f64, f64)> {
        self.samples
            .iter()
            .enumerate()
            .map(|(i, s)| (i as f64, metric(&s.measurements)))
            .collect()
    }
}

/// Immediate values shown on the dashboard cards
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub temperature: String,
    pub co2: String,
    pub humidity: String,
    pub co2_alert: bool,
    /// False while showing placeholders
    pub has_data: bool,
}

impl DisplayState {
    pub fn placeholder() -> Self {
        Self { has_data: false, ..Self::from_measurements(&Measurements::default()) }
    }

    pub fn from_measurements(m: &Measurements) -> Self {
        Self {
            temperature: format_temperature(m.temperature),
            co2: format_co2(m.co2),
            humidity: format_humidity(m.humidity),
            co2_alert: m.co2_alert(),
            has_data: true,
        }
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::placeholder()
    }
}

pub fn format_temperature(value: f64) -> String {
    format!("{value:.1} °C")
}

pub fn format_co2(value: f64) -> String {
    format!("{value:.0} ppm")
}

pub fn format_humidity(value: f64) -> String {
    format!("{value:.1} %")
}

/// HH:MM:SS label for a sample
pub fn time_label(now: OffsetDateTime) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    now.format(&format).unwrap_or_else(|_| "--:--:--".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fetch failed or nothing stored yet
    Placeholder,
    /// All-zero reading
    NotReal,
    /// Same values as the last appended sample
    Duplicate,
    Appended,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    last_seen: Option<Measurements>,
    buffer: SampleBuffer,
    display: DisplayState,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, observed: Option<Measurements>, now: OffsetDateTime) -> TickOutcome {
        let Some(m) = observed else {
            self.display = DisplayState::placeholder();
            return TickOutcome::Placeholder;
        };

        self.display = DisplayState::from_measurements(&m);

        if !m.is_real() {
            return TickOutcome::NotReal;
        }
        if self.last_seen == Some(m) {
            return TickOutcome::Duplicate;
        }

        self.buffer.push(Sample { label: time_label(now), measurements: m });
        self.last_seen = Some(m);
        TickOutcome::Appended
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn last_seen(&self) -> Option<Measurements> {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-05-01 14:03:09 UTC);

    fn m(temperature: f64, co2: f64, humidity: f64) -> Option<Measurements> {
        Some(Measurements::new(temperature, co2, humidity))
    }

    #[test]
    fn test_first_real_reading_is_appended() {
        let mut r = Reconciler::new();
        assert_eq!(r.tick(m(22.5, 650.0, 40.0), NOW), TickOutcome::Appended);
        assert_eq!(r.buffer().len(), 1);
        assert_eq!(r.buffer().last().unwrap().label, "14:03:09");
        assert_eq!(r.last_seen(), m(22.5, 650.0, 40.0));
    }

    #[test]
    fn test_identical_readings_append_once() {
        let mut r = Reconciler::new();
        r.tick(m(22.5, 650.0, 40.0), NOW);
        assert_eq!(r.tick(m(22.5, 650.0, 40.0), NOW), TickOutcome::Duplicate);
        assert_eq!(r.buffer().len(), 1);
    }

    #[test]
    fn test_zero_readings_never_append() {
        let mut r = Reconciler::new();
        for _ in 0..3 {
            assert_eq!(r.tick(m(0.0, 0.0, 0.0), NOW), TickOutcome::NotReal);
        }
        assert!(r.buffer().is_empty());
        assert!(r.last_seen().is_none());
    }

    #[test]
    fn test_failed_fetch_keeps_history() {
        let mut r = Reconciler::new();
        r.tick(m(22.5, 900.0, 40.0), NOW);
        assert!(r.display().co2_alert);

        assert_eq!(r.tick(None, NOW), TickOutcome::Placeholder);
        assert_eq!(r.buffer().len(), 1);
        assert_eq!(r.last_seen(), m(22.5, 900.0, 40.0));
        assert!(!r.display().has_data);
        assert!(!r.display().co2_alert);
        assert_eq!(r.display().co2, "0 ppm");
    }

    #[test]
    fn test_single_metric_change_is_new() {
        let mut r = Reconciler::new();
        r.tick(m(22.5, 650.0, 40.0), NOW);
        assert_eq!(r.tick(m(22.5, 650.0, 40.5), NOW), TickOutcome::Appended);
        assert_eq!(r.buffer().len(), 2);
    }

    #[test]
    fn test_buffer_is_bounded_fifo() {
        let mut r = Reconciler::new();
        for i in 1..=25 {
            r.tick(m(20.0, 400.0 + i as f64, 40.0), NOW);
        }
        assert_eq!(r.buffer().len(), SAMPLE_CAPACITY);
        assert_eq!(r.buffer().iter().next().unwrap().measurements.co2, 406.0);
        assert_eq!(r.buffer().last().unwrap().measurements.co2, 425.0);
    }

    #[test]
    fn test_alert_follows_latest_value_even_for_duplicates() {
        let mut r = Reconciler::new();
        r.tick(m(22.5, 650.0, 40.0), NOW);
        assert!(!r.display().co2_alert);

        r.tick(m(22.5, 900.0, 40.0), NOW);
        assert!(r.display().co2_alert);
        r.tick(m(22.5, 900.0, 40.0), NOW);
        assert!(r.display().co2_alert);
    }

    #[test]
    fn test_display_formatting() {
        let d = DisplayState::from_measurements(&Measurements::new(22.5, 650.0, 40.0));
        assert_eq!(d.temperature, "22.5 °C");
        assert_eq!(d.co2, "650 ppm");
        assert_eq!(d.humidity, "40.0 %");
    }

    #[test]
    fn test_series_is_indexed_oldest_first() {
        let mut r = Reconciler::new();
        r.tick(m(20.0, 500.0, 40.0), NOW);
        r.tick(m(21.0, 510.0, 41.0), NOW);
        assert_eq!(r.buffer().series(|m| m.temperature), vec![(0.0, 20.0), (1.0, 21.0)]);
    }
}
