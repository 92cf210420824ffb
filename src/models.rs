use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Accepted range for the configured average cycle length.
pub const CYCLE_LENGTH_RANGE: RangeInclusive<u32> = 21..=35;
/// Accepted range for the configured average period length.
pub const PERIOD_LENGTH_RANGE: RangeInclusive<u32> = 3..=8;
/// Number of day slots in every symptom and mood curve.
pub const PATTERN_DAYS: usize = 35;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("average cycle length {0} is outside 21-35 days")]
    CycleLength(u32),
    #[error("average period length {0} is outside 3-8 days")]
    PeriodLength(u32),
}

/// The three scalars all cycle math is derived from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CycleConfig {
    pub anchor_date: NaiveDate,
    pub average_cycle_length_days: u32,
    pub average_period_length_days: u32,
}

impl CycleConfig {
    pub fn new(anchor_date: NaiveDate, cycle_length: u32, period_length: u32) -> Self {
        Self {
            anchor_date,
            average_cycle_length_days: cycle_length,
            average_period_length_days: period_length,
        }
    }

    /// Range checks applied by the setup form before a config is stored.
    /// The cycle computations never call this.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !CYCLE_LENGTH_RANGE.contains(&self.average_cycle_length_days) {
            return Err(ConfigError::CycleLength(self.average_cycle_length_days));
        }
        if !PERIOD_LENGTH_RANGE.contains(&self.average_period_length_days) {
            return Err(ConfigError::PeriodLength(self.average_period_length_days));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum PhaseLabel {
    Menstrual,
    PostMenstrual,
    Fertile,
    Ovulation,
    PreMenstrual,
}

impl PhaseLabel {
    pub fn display_name(self) -> &'static str {
        match self {
            PhaseLabel::Menstrual => "Menstrual",
            PhaseLabel::PostMenstrual => "Post-menstrual",
            PhaseLabel::Fertile => "Fertile",
            PhaseLabel::Ovulation => "Ovulation",
            PhaseLabel::PreMenstrual => "Pre-menstrual",
        }
    }

    /// Accent colour the UI theme shifts to while in this phase.
    pub fn accent_color(self) -> &'static str {
        match self {
            PhaseLabel::Menstrual => "#E57373",
            PhaseLabel::PostMenstrual => "#F8BBD0",
            PhaseLabel::Fertile => "#81C784",
            PhaseLabel::Ovulation => "#4DB6AC",
            PhaseLabel::PreMenstrual => "#B39DDB",
        }
    }
}

/// Derived view of where a date falls in the configured cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleState {
    pub day_of_cycle: u32,
    pub phase: PhaseLabel,
    pub next_period_date: NaiveDate,
    pub ovulation_date: NaiveDate,
    pub days_until_next_period: u32,
    pub days_until_ovulation: u32,
    pub pregnancy_chance_percent: u8,
    pub in_fertile_window: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowLevel {
    #[default]
    #[serde(rename = "")]
    Unset,
    None,
    Light,
    Moderate,
    Heavy,
}

impl FlowLevel {
    /// Whether this level counts as bleeding for cycle detection.
    pub fn is_flow(self) -> bool {
        matches!(self, FlowLevel::Light | FlowLevel::Moderate | FlowLevel::Heavy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub flow: FlowLevel,
    #[serde(default)]
    pub notes: String,
}

impl DailyRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            symptoms: Vec::new(),
            mood: String::new(),
            flow: FlowLevel::Unset,
            notes: String::new(),
        }
    }
}

/// One completed cycle recovered from the daily log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalCycle {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub length_days: u32,
    pub period_length_days: u32,
    pub symptoms: Vec<String>,
    pub dominant_mood: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionModel {
    /// Gaussian weights for mean - 2σ .. mean + 2σ, summing to 1.
    pub cycle_length_weights: [f64; 5],
    /// Per-symptom probability over [`PATTERN_DAYS`] day slots.
    pub symptom_patterns: BTreeMap<String, Vec<f64>>,
    /// Per-mood probability over [`PATTERN_DAYS`] day slots.
    pub mood_patterns: BTreeMap<String, Vec<f64>>,
    /// Spring, summer, autumn, winter.
    pub seasonal_factors: [f64; 4],
    pub accuracy_percent: u8,
    pub trained_at: DateTime<Utc>,
    pub cycle_count: usize,
    /// `None` for the cold-start model, which defers to the configured length.
    pub mean_cycle_length: Option<f64>,
    pub cycle_length_std_dev: f64,
}

impl PredictionModel {
    pub fn is_basic(&self) -> bool {
        self.mean_cycle_length.is_none()
    }
}

/// Coarse four-way split used for mood forecasts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CoarsePhase {
    Menstrual,
    Follicular,
    Ovulatory,
    Luteal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SymptomForecast {
    pub symptom: String,
    /// 1-based days of cycle where the curve exceeds half its peak.
    pub days_of_cycle: Vec<u32>,
    pub peak_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseMood {
    pub phase: CoarsePhase,
    pub mood: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub predicted_cycle_length: u32,
    pub next_period_date: NaiveDate,
    pub ovulation_date: NaiveDate,
    pub fertile_window_start: NaiveDate,
    pub fertile_window_end: NaiveDate,
    pub symptom_forecast: Vec<SymptomForecast>,
    pub mood_forecast: Vec<PhaseMood>,
    pub accuracy_percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub total_cycles: usize,
    pub avg_cycle_length: Option<f32>,
    pub avg_period_length: Option<f32>,
    pub shortest_cycle: Option<u32>,
    pub longest_cycle: Option<u32>,
    pub last_period_start: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub show_fertility: bool,
    #[serde(default = "default_true")]
    pub reminders_enabled: bool,
    #[serde(default = "default_reminder_days")]
    pub period_reminder_days_before: u32,
    #[serde(default)]
    pub daily_log_reminder: bool,
}

fn default_true() -> bool {
    true
}

fn default_reminder_days() -> u32 {
    2
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            show_fertility: false,
            reminders_enabled: true,
            period_reminder_days_before: 2,
            daily_log_reminder: false,
        }
    }
}

/// One cell of the calendar screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day_of_cycle: u32,
    pub phase: PhaseLabel,
    pub is_period: bool,
    pub is_fertile: bool,
    pub is_ovulation: bool,
}

/// Data returned to the UI for a month view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub days: Vec<CalendarDay>,
    pub records: Vec<DailyRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_out_of_range_lengths() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(CycleConfig::new(date, 28, 5).validate().is_ok());
        assert_eq!(
            CycleConfig::new(date, 20, 5).validate(),
            Err(ConfigError::CycleLength(20))
        );
        assert_eq!(
            CycleConfig::new(date, 28, 9).validate(),
            Err(ConfigError::PeriodLength(9))
        );
    }

    #[test]
    fn flow_level_uses_lowercase_and_empty_string() {
        let json = r#"{"date":"2024-03-02","flow":"","mood":"calm"}"#;
        let record: DailyRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.flow, FlowLevel::Unset);
        assert!(record.symptoms.is_empty());

        let heavy: FlowLevel = serde_json::from_str("\"heavy\"").unwrap();
        assert!(heavy.is_flow());
        assert!(!FlowLevel::None.is_flow());
    }

    #[test]
    fn phase_labels_serialize_camel_case() {
        let json = serde_json::to_string(&PhaseLabel::PostMenstrual).unwrap();
        assert_eq!(json, "\"postMenstrual\"");
    }
}
