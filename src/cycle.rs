use std::ops::RangeInclusive;

use chrono::{Duration, NaiveDate};
use rand::Rng;

use crate::models::{CalendarDay, CycleConfig, CycleState, PhaseLabel};

/// Days from ovulation to the next period start.
const LUTEAL_PHASE_DAYS: i64 = 14;
/// Last day of cycle still considered post-menstrual for pregnancy chance.
const POST_MENSTRUAL_LAST_DAY: i64 = 11;

fn cycle_length(config: &CycleConfig) -> i64 {
    i64::from(config.average_cycle_length_days.max(1))
}

fn period_length(config: &CycleConfig) -> i64 {
    i64::from(config.average_period_length_days)
}

/// 1-based day of cycle on which ovulation is expected.
///
/// `cycle_length - 13`, clamped so that it never lands inside the period
/// and never past the end of the cycle.
pub fn ovulation_day(config: &CycleConfig) -> u32 {
    let len = cycle_length(config);
    let raw = len - LUTEAL_PHASE_DAYS + 1;
    raw.max(period_length(config) + 1).min(len).max(1) as u32
}

/// 1-based position of `date` in the cycle anchored at `config.anchor_date`.
/// Dates before the anchor wrap backwards.
pub fn day_of_cycle(config: &CycleConfig, date: NaiveDate) -> u32 {
    let elapsed = (date - config.anchor_date).num_days();
    (elapsed.rem_euclid(cycle_length(config)) + 1) as u32
}

/// Map a day of cycle to its phase.
///
/// Rules are checked in order; the post-menstrual, ovulation and fertile
/// ranges overlap around the ovulation day and the first match wins.
pub fn classify_phase(day_of_cycle: u32, config: &CycleConfig) -> PhaseLabel {
    let day = i64::from(day_of_cycle);
    let period = period_length(config);
    let ovulation = i64::from(ovulation_day(config));

    if (1..=period).contains(&day) {
        PhaseLabel::Menstrual
    } else if day > period && day < ovulation - 2 {
        PhaseLabel::PostMenstrual
    } else if day == ovulation {
        PhaseLabel::Ovulation
    } else if (ovulation - 2..=ovulation + 2).contains(&day) {
        PhaseLabel::Fertile
    } else {
        PhaseLabel::PreMenstrual
    }
}

/// Whether a day of cycle is inside the fertile window (ovulation -5 to +1).
pub fn in_fertile_window(day_of_cycle: u32, config: &CycleConfig) -> bool {
    let day = i64::from(day_of_cycle);
    let ovulation = i64::from(ovulation_day(config));
    (ovulation - 5..=ovulation + 1).contains(&day)
}

/// Inclusive band the displayed pregnancy chance is drawn from for a day.
pub fn pregnancy_chance_band(day_of_cycle: u32, config: &CycleConfig) -> RangeInclusive<u32> {
    let day = i64::from(day_of_cycle);
    let distance = (day - i64::from(ovulation_day(config))).abs();

    if distance == 0 {
        30..=40
    } else if in_fertile_window(day_of_cycle, config) {
        let base = (25 - 3 * distance).max(15) as u32;
        base..=base + 8
    } else if day <= period_length(config) {
        1..=5
    } else if day <= POST_MENSTRUAL_LAST_DAY {
        5..=15
    } else {
        3..=10
    }
}

/// Compute the cycle state for `reference` using the thread-local RNG for
/// the pregnancy chance jitter.
pub fn compute_cycle_state(config: &CycleConfig, reference: NaiveDate) -> CycleState {
    compute_cycle_state_with_rng(config, reference, &mut rand::thread_rng())
}

/// Compute the cycle state for `reference`, drawing the pregnancy chance
/// jitter from `rng`. Every other field depends only on the inputs.
pub fn compute_cycle_state_with_rng<R: Rng + ?Sized>(
    config: &CycleConfig,
    reference: NaiveDate,
    rng: &mut R,
) -> CycleState {
    let len = cycle_length(config);
    let elapsed = (reference - config.anchor_date).num_days();
    let offset = elapsed.rem_euclid(len);
    let day = (offset + 1) as u32;
    let period_start = reference - Duration::days(offset);

    let next_period_date = if offset == 0 {
        reference
    } else {
        period_start + Duration::days(len)
    };

    let ovulation = ovulation_day(config);
    let mut ovulation_date = period_start + Duration::days(i64::from(ovulation) - 1);
    if ovulation_date < reference {
        ovulation_date += Duration::days(len);
    }

    let band = pregnancy_chance_band(day, config);
    let chance = rng.gen_range(band).min(100) as u8;

    CycleState {
        day_of_cycle: day,
        phase: classify_phase(day, config),
        next_period_date,
        ovulation_date,
        days_until_next_period: (next_period_date - reference).num_days() as u32,
        days_until_ovulation: (ovulation_date - reference).num_days() as u32,
        pregnancy_chance_percent: chance,
        in_fertile_window: in_fertile_window(day, config),
    }
}

/// Per-day phase markers for a calendar month, or `None` for an invalid month.
pub fn month_days(config: &CycleConfig, year: i32, month: u32) -> Option<Vec<CalendarDay>> {
    let first_day = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;

    let ovulation = ovulation_day(config);
    let days = first_day
        .iter_days()
        .take_while(|d| *d < next_month)
        .map(|date| {
            let day = day_of_cycle(config, date);
            let phase = classify_phase(day, config);
            CalendarDay {
                date,
                day_of_cycle: day,
                phase,
                is_period: phase == PhaseLabel::Menstrual,
                is_fertile: in_fertile_window(day, config),
                is_ovulation: day == ovulation,
            }
        })
        .collect();

    Some(days)
}
