use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::cycle;
use crate::models::{
    CoarsePhase, CycleConfig, CycleStats, DailyRecord, HistoricalCycle, PhaseMood,
    PredictionModel, PredictionResult, SymptomForecast, PATTERN_DAYS,
};

/// Spans outside this range are treated as missed logging, not cycles.
const MIN_CYCLE_DAYS: u32 = 21;
const MAX_CYCLE_DAYS: u32 = 40;
/// Below this many cycles the fixed basic model is used.
const MIN_TRAINING_CYCLES: usize = 3;
const BASIC_MODEL_ACCURACY: u8 = 65;
/// Flow days at most this far apart belong to the same period.
const PERIOD_GAP_TOLERANCE_DAYS: i64 = 2;
const REFERENCE_CYCLE_DAYS: f64 = 28.0;
const LUTEAL_PHASE_DAYS: i64 = 14;
/// Symptoms peak at this fraction of the cycle length.
const SYMPTOM_PEAK_FRACTION: f64 = 0.8;
const SYMPTOM_DECAY_DAYS: f64 = 5.0;

/// Mood forecast phases as fractions of the predicted cycle length.
const COARSE_PHASES: [(CoarsePhase, f64, f64); 4] = [
    (CoarsePhase::Menstrual, 0.0, 0.2),
    (CoarsePhase::Follicular, 0.2, 0.45),
    (CoarsePhase::Ovulatory, 0.45, 0.6),
    (CoarsePhase::Luteal, 0.6, 1.0),
];

/// Recover completed cycles from the daily log.
///
/// A run of flow days (gaps of up to two days allowed) marks a period;
/// a cycle runs from one period start to the next. Only cycles of
/// 21-40 days are returned.
pub fn extract_cycles(records: &[DailyRecord]) -> Vec<HistoricalCycle> {
    let mut sorted: Vec<&DailyRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.date);

    let mut periods: Vec<(NaiveDate, NaiveDate)> = Vec::new();
    for record in sorted.iter().filter(|r| r.flow.is_flow()) {
        match periods.last_mut() {
            Some((_, end)) if (record.date - *end).num_days() <= PERIOD_GAP_TOLERANCE_DAYS => {
                *end = record.date.max(*end);
            }
            _ => periods.push((record.date, record.date)),
        }
    }

    periods
        .windows(2)
        .filter_map(|w| {
            let (start, end) = w[0];
            let next_start = w[1].0;
            let length = (next_start - start).num_days() as u32;
            if !(MIN_CYCLE_DAYS..=MAX_CYCLE_DAYS).contains(&length) {
                return None;
            }

            let span: Vec<&DailyRecord> = sorted
                .iter()
                .filter(|r| r.date >= start && r.date < next_start)
                .copied()
                .collect();

            let symptoms: BTreeSet<&str> = span
                .iter()
                .flat_map(|r| r.symptoms.iter().map(String::as_str))
                .filter(|s| !s.is_empty())
                .collect();

            Some(HistoricalCycle {
                id: Uuid::new_v4(),
                start_date: start,
                length_days: length,
                period_length_days: (end - start).num_days() as u32 + 1,
                symptoms: symptoms.into_iter().map(str::to_owned).collect(),
                dominant_mood: dominant_mood(&span),
            })
        })
        .collect()
}

/// Most frequent non-empty mood; ties go to the alphabetically first.
fn dominant_mood(records: &[&DailyRecord]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records.iter().filter(|r| !r.mood.is_empty()) {
        *counts.entry(record.mood.as_str()).or_default() += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (mood, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((mood, count));
        }
    }
    best.map(|(mood, _)| mood.to_owned()).unwrap_or_default()
}

/// Build a prediction model from the full daily log.
pub fn train(history: &[DailyRecord]) -> PredictionModel {
    train_at(history, Utc::now())
}

/// Build a prediction model, stamping it with `trained_at`.
pub fn train_at(history: &[DailyRecord], trained_at: DateTime<Utc>) -> PredictionModel {
    let cycles = extract_cycles(history);
    if cycles.len() < MIN_TRAINING_CYCLES {
        let mut model = basic_model(trained_at);
        model.cycle_count = cycles.len();
        return model;
    }

    let lengths: Vec<f64> = cycles.iter().map(|c| f64::from(c.length_days)).collect();
    let avg = mean(&lengths);
    let std_dev = std_deviation(&lengths);

    PredictionModel {
        cycle_length_weights: cycle_length_weights(),
        symptom_patterns: symptom_patterns(&cycles),
        mood_patterns: mood_patterns(&cycles),
        seasonal_factors: seasonal_factors(&cycles),
        accuracy_percent: accuracy_percent(avg, std_dev, cycles.len()),
        trained_at,
        cycle_count: cycles.len(),
        mean_cycle_length: Some(avg),
        cycle_length_std_dev: std_dev,
    }
}

/// Cold-start model used until three cycles have been logged.
pub fn basic_model(trained_at: DateTime<Utc>) -> PredictionModel {
    let symptom_patterns = [
        ("cramps", 1.5, 2.0),
        ("fatigue", 2.0, 3.0),
        ("breast tenderness", 23.0, 3.0),
        ("bloating", 24.0, 3.0),
        ("acne", 25.0, 3.0),
        ("headache", 26.0, 3.0),
    ];
    let mood_patterns = [
        ("happy", 10.0, 4.0),
        ("energetic", 13.0, 3.0),
        ("calm", 18.0, 8.0),
        ("irritated", 25.0, 3.0),
        ("anxious", 26.0, 3.0),
    ];

    let to_map = |specs: &[(&str, f64, f64)]| -> BTreeMap<String, Vec<f64>> {
        specs
            .iter()
            .map(|(name, center, spread)| ((*name).to_owned(), peaked_curve(*center, *spread)))
            .collect()
    };

    PredictionModel {
        cycle_length_weights: cycle_length_weights(),
        symptom_patterns: to_map(&symptom_patterns),
        mood_patterns: to_map(&mood_patterns),
        seasonal_factors: [1.0; 4],
        accuracy_percent: BASIC_MODEL_ACCURACY,
        trained_at,
        cycle_count: 0,
        mean_cycle_length: None,
        cycle_length_std_dev: 0.0,
    }
}

fn peaked_curve(center_day: f64, spread: f64) -> Vec<f64> {
    let mut curve: Vec<f64> = (1..=PATTERN_DAYS)
        .map(|day| (-(day as f64 - center_day).abs() / spread).exp())
        .collect();
    normalize(&mut curve);
    curve
}

/// Gaussian weights at -2σ..+2σ around the mean, normalised to sum to 1.
fn cycle_length_weights() -> [f64; 5] {
    let mut weights = [0.0; 5];
    for (slot, step) in weights.iter_mut().zip(-2i32..=2) {
        *slot = (-f64::from(step * step) / 2.0).exp();
    }
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    weights
}

fn symptom_patterns(cycles: &[HistoricalCycle]) -> BTreeMap<String, Vec<f64>> {
    let mut patterns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for cycle in cycles {
        let peak_day = f64::from(cycle.length_days) * SYMPTOM_PEAK_FRACTION;
        for symptom in &cycle.symptoms {
            let curve = patterns
                .entry(symptom.clone())
                .or_insert_with(|| vec![0.0; PATTERN_DAYS]);
            for (idx, slot) in curve.iter_mut().enumerate() {
                let distance = ((idx + 1) as f64 - peak_day).abs();
                *slot += (-distance / SYMPTOM_DECAY_DAYS).exp();
            }
        }
    }
    for curve in patterns.values_mut() {
        normalize(curve);
    }
    patterns
}

fn mood_weight(mood: &str, position: f64) -> f64 {
    match mood.to_lowercase().as_str() {
        "irritated" | "anxious" => 0.5 + position,
        "happy" | "energetic" => 1.5 - position,
        _ => 1.0,
    }
}

fn mood_patterns(cycles: &[HistoricalCycle]) -> BTreeMap<String, Vec<f64>> {
    let mut patterns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for cycle in cycles.iter().filter(|c| !c.dominant_mood.is_empty()) {
        let len = f64::from(cycle.length_days);
        let curve = patterns
            .entry(cycle.dominant_mood.clone())
            .or_insert_with(|| vec![0.0; PATTERN_DAYS]);
        for (idx, slot) in curve.iter_mut().enumerate() {
            let day = (idx + 1) as f64;
            if day > len {
                break;
            }
            *slot += mood_weight(&cycle.dominant_mood, day / len);
        }
    }
    for curve in patterns.values_mut() {
        normalize(curve);
    }
    patterns
}

/// Spring, summer, autumn, winter by month of cycle start.
fn season_index(month: u32) -> usize {
    match month {
        3..=5 => 0,
        6..=8 => 1,
        9..=11 => 2,
        _ => 3,
    }
}

fn seasonal_factors(cycles: &[HistoricalCycle]) -> [f64; 4] {
    let mut buckets: [Vec<f64>; 4] = Default::default();
    for cycle in cycles {
        buckets[season_index(cycle.start_date.month())].push(f64::from(cycle.length_days));
    }

    let mut factors = [1.0; 4];
    for (factor, lengths) in factors.iter_mut().zip(buckets.iter()) {
        if !lengths.is_empty() {
            *factor = mean(lengths) / REFERENCE_CYCLE_DAYS;
        }
    }
    factors
}

/// Ad hoc score: 70 + 25 * consistency + one point per cycle (max 10), capped at 95.
fn accuracy_percent(avg: f64, std_dev: f64, cycle_count: usize) -> u8 {
    let consistency = if avg > 0.0 {
        (1.0 - std_dev / avg).max(0.0)
    } else {
        0.0
    };
    let bonus = cycle_count.min(10) as f64;
    (70.0 + 25.0 * consistency + bonus).round().min(95.0) as u8
}

/// Weighted average of the five cycle lengths the weights cover,
/// or `None` for the basic model.
pub fn weighted_cycle_length(model: &PredictionModel) -> Option<f64> {
    let avg = model.mean_cycle_length?;
    let weighted = model
        .cycle_length_weights
        .iter()
        .zip(-2i32..=2)
        .map(|(w, step)| w * (avg + f64::from(step) * model.cycle_length_std_dev))
        .sum();
    Some(weighted)
}

/// Forecast the next cycle from a trained model and the current config.
pub fn predict(
    model: &PredictionModel,
    config: &CycleConfig,
    reference: NaiveDate,
) -> PredictionResult {
    let base = weighted_cycle_length(model)
        .unwrap_or_else(|| f64::from(config.average_cycle_length_days));
    let factor = model.seasonal_factors[season_index(reference.month())];
    let predicted_length = (base * factor)
        .round()
        .clamp(f64::from(MIN_CYCLE_DAYS), f64::from(MAX_CYCLE_DAYS)) as i64;

    let offset = i64::from(cycle::day_of_cycle(config, reference)) - 1;
    let last_start = reference - Duration::days(offset);
    let mut next_period_date = last_start + Duration::days(predicted_length);
    while next_period_date < reference {
        next_period_date += Duration::days(predicted_length);
    }

    let ovulation_date = next_period_date - Duration::days(LUTEAL_PHASE_DAYS);

    PredictionResult {
        predicted_cycle_length: predicted_length as u32,
        next_period_date,
        ovulation_date,
        fertile_window_start: ovulation_date - Duration::days(3),
        fertile_window_end: ovulation_date + Duration::days(1),
        symptom_forecast: symptom_forecast(model),
        mood_forecast: mood_forecast(model, predicted_length as f64),
        accuracy_percent: model.accuracy_percent,
    }
}

fn symptom_forecast(model: &PredictionModel) -> Vec<SymptomForecast> {
    model
        .symptom_patterns
        .iter()
        .filter_map(|(symptom, curve)| {
            let peak = curve.iter().copied().fold(0.0, f64::max);
            if peak <= 0.0 {
                return None;
            }
            let days_of_cycle = curve
                .iter()
                .enumerate()
                .filter(|(_, p)| **p > peak / 2.0)
                .map(|(idx, _)| idx as u32 + 1)
                .collect();
            Some(SymptomForecast {
                symptom: symptom.clone(),
                days_of_cycle,
                peak_probability: peak,
            })
        })
        .collect()
}

fn mood_forecast(model: &PredictionModel, cycle_length: f64) -> Vec<PhaseMood> {
    COARSE_PHASES
        .iter()
        .map(|(phase, from, to)| {
            let start = ((from * cycle_length).round() as usize).min(PATTERN_DAYS);
            let end = ((to * cycle_length).round() as usize).min(PATTERN_DAYS);

            let mut best: Option<(&String, f64)> = None;
            for (mood, curve) in &model.mood_patterns {
                let mass: f64 = curve.get(start..end).map_or(0.0, |s| s.iter().sum());
                if mass > 0.0 && best.map_or(true, |(_, m)| mass > m) {
                    best = Some((mood, mass));
                }
            }

            PhaseMood {
                phase: *phase,
                mood: best.map(|(mood, _)| mood.clone()),
            }
        })
        .collect()
}

/// Compute cycle statistics for the analytics view.
pub fn cycle_stats(cycles: &[HistoricalCycle]) -> CycleStats {
    let mut sorted: Vec<&HistoricalCycle> = cycles.iter().collect();
    sorted.sort_by_key(|c| c.start_date);

    let Some(last) = sorted.last() else {
        return CycleStats {
            total_cycles: 0,
            avg_cycle_length: None,
            avg_period_length: None,
            shortest_cycle: None,
            longest_cycle: None,
            last_period_start: None,
        };
    };

    let cycle_lengths: Vec<f64> = sorted.iter().map(|c| f64::from(c.length_days)).collect();
    let period_lengths: Vec<f64> = sorted
        .iter()
        .map(|c| f64::from(c.period_length_days))
        .collect();

    CycleStats {
        total_cycles: sorted.len(),
        avg_cycle_length: Some(mean(&cycle_lengths) as f32),
        avg_period_length: Some(mean(&period_lengths) as f32),
        shortest_cycle: sorted.iter().map(|c| c.length_days).min(),
        longest_cycle: sorted.iter().map(|c| c.length_days).max(),
        last_period_start: Some(last.start_date),
    }
}

fn normalize(curve: &mut [f64]) {
    let total: f64 = curve.iter().sum();
    if total > 0.0 {
        for v in curve.iter_mut() {
            *v /= total;
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance =
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlowLevel;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(day: NaiveDate, flow: FlowLevel, symptoms: &[&str], mood: &str) -> DailyRecord {
        DailyRecord {
            date: day,
            symptoms: symptoms.iter().map(|s| (*s).to_owned()).collect(),
            mood: mood.to_owned(),
            flow,
            notes: String::new(),
        }
    }

    /// Period on days 1-3, bloating on day 22, irritated late, happy early.
    fn history(starts: &[&str]) -> Vec<DailyRecord> {
        let mut records = Vec::new();
        for start in starts {
            let start = date(start);
            records.push(record(start, FlowLevel::Heavy, &["cramps"], ""));
            records.push(record(start + Duration::days(1), FlowLevel::Moderate, &[], ""));
            records.push(record(start + Duration::days(2), FlowLevel::Light, &[], ""));
            for d in 5..8 {
                records.push(record(start + Duration::days(d), FlowLevel::None, &[], "happy"));
            }
            for d in 19..25 {
                let symptoms: &[&str] = if d == 21 { &["bloating"] } else { &[] };
                records.push(record(start + Duration::days(d), FlowLevel::None, symptoms, "irritated"));
            }
        }
        records
    }

    #[test]
    fn extracts_cycles_between_period_starts() {
        let cycles = extract_cycles(&history(&["2024-01-01", "2024-01-29", "2024-02-26"]));
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].start_date, date("2024-01-01"));
        assert_eq!(cycles[0].length_days, 28);
        assert_eq!(cycles[0].period_length_days, 3);
        assert_eq!(cycles[0].symptoms, vec!["bloating".to_owned(), "cramps".to_owned()]);
        assert_eq!(cycles[0].dominant_mood, "irritated");
    }

    #[test]
    fn discards_spans_outside_training_range() {
        let records = vec![
            record(date("2024-01-01"), FlowLevel::Heavy, &[], ""),
            record(date("2024-01-03"), FlowLevel::Light, &[], ""),
            record(date("2024-01-05"), FlowLevel::Light, &[], ""),
            record(date("2024-02-26"), FlowLevel::Heavy, &[], ""),
            record(date("2024-03-25"), FlowLevel::Heavy, &[], ""),
        ];
        let cycles = extract_cycles(&records);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].start_date, date("2024-02-26"));

        let first_period = extract_cycles(&[
            records[0].clone(),
            records[1].clone(),
            records[2].clone(),
            record(date("2024-01-29"), FlowLevel::Heavy, &[], ""),
        ]);
        assert_eq!(first_period[0].period_length_days, 5);
    }

    #[test]
    fn trains_on_regular_cycles() {
        let starts = ["2024-01-01", "2024-01-29", "2024-02-26", "2024-03-25"];
        let model = train(&history(&starts));

        assert!(!model.is_basic());
        assert_eq!(model.cycle_count, 3);
        let sum: f64 = model.cycle_length_weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((70..=95).contains(&model.accuracy_percent));
        assert_eq!(model.seasonal_factors, [1.0, 1.0, 1.0, 1.0]);

        let bloating = &model.symptom_patterns["bloating"];
        assert_eq!(bloating.len(), PATTERN_DAYS);
        assert!((bloating.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let peak_idx = bloating
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc })
            .0;
        assert_eq!(peak_idx + 1, 22);
    }

    #[test]
    fn two_cycles_fall_back_to_basic_model() {
        let model = train(&history(&["2024-01-01", "2024-01-29", "2024-02-26"]));
        assert!(model.is_basic());
        assert_eq!(model.accuracy_percent, 65);
        assert_eq!(model.cycle_count, 2);
        assert!(model.symptom_patterns.contains_key("cramps"));
    }

    #[test]
    fn accuracy_rewards_consistency() {
        assert_eq!(accuracy_percent(28.0, 0.0, 3), 95);
        assert_eq!(accuracy_percent(30.0, 30.0, 3), 73);
        assert_eq!(accuracy_percent(28.0, 7.0, 10), 95);
    }

    #[test]
    fn seasonal_factor_scales_by_quarter() {
        let starts = ["2024-06-01", "2024-07-01", "2024-07-31", "2024-08-30"];
        let model = train(&history(&starts));
        assert_eq!(model.seasonal_factors[0], 1.0);
        assert!((model.seasonal_factors[1] - 30.0 / 28.0).abs() < 1e-9);
    }

    #[test]
    fn predicts_next_cycle_from_model() {
        let starts = ["2024-01-01", "2024-01-29", "2024-02-26", "2024-03-25"];
        let model = train(&history(&starts));
        let config = CycleConfig::new(date("2024-01-01"), 28, 5);

        let result = predict(&model, &config, date("2024-01-10"));
        assert_eq!(result.predicted_cycle_length, 28);
        assert_eq!(result.next_period_date, date("2024-01-29"));
        assert_eq!(result.ovulation_date, date("2024-01-15"));
        assert_eq!(result.fertile_window_start, date("2024-01-12"));
        assert_eq!(result.fertile_window_end, date("2024-01-16"));

        let bloating = result
            .symptom_forecast
            .iter()
            .find(|f| f.symptom == "bloating")
            .unwrap();
        assert!(bloating.days_of_cycle.contains(&22));
        assert!(!bloating.days_of_cycle.contains(&1));

        let luteal = result
            .mood_forecast
            .iter()
            .find(|m| m.phase == CoarsePhase::Luteal)
            .unwrap();
        assert_eq!(luteal.mood.as_deref(), Some("irritated"));
    }

    #[test]
    fn basic_model_defers_to_configured_length() {
        let model = basic_model(Utc::now());
        let config = CycleConfig::new(date("2024-01-01"), 30, 5);
        let result = predict(&model, &config, date("2024-01-03"));
        assert_eq!(result.predicted_cycle_length, 30);
        assert_eq!(result.next_period_date, date("2024-01-31"));
        assert_eq!(result.accuracy_percent, 65);
        assert_eq!(result.mood_forecast.len(), 4);
    }

    #[test]
    fn cycle_stats_computed() {
        let cycles = extract_cycles(&history(&["2024-01-01", "2024-01-29", "2024-02-28"]));
        let stats = cycle_stats(&cycles);
        assert_eq!(stats.total_cycles, 2);
        assert_eq!(stats.avg_cycle_length, Some(29.0));
        assert_eq!(stats.avg_period_length, Some(3.0));
        assert_eq!(stats.shortest_cycle, Some(28));
        assert_eq!(stats.longest_cycle, Some(30));
        assert_eq!(stats.last_period_start, Some(date("2024-01-29")));

        assert_eq!(cycle_stats(&[]).total_cycles, 0);
    }
}
