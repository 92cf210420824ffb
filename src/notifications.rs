use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AppSettings, CycleState};

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("scheduler error: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReminderKind {
    PeriodApproaching,
    PeriodDue,
    FertileWindow,
    Ovulation,
    DailyLog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: Uuid,
    pub kind: ReminderKind,
    pub fire_on: NaiveDate,
    pub title: String,
    pub body: String,
}

impl Reminder {
    fn new(kind: ReminderKind, fire_on: NaiveDate, title: &str, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            fire_on,
            title: title.to_owned(),
            body,
        }
    }
}

/// Platform notification API. Delivery is entirely the implementor's concern.
pub trait ReminderScheduler {
    fn schedule(&self, reminder: &Reminder) -> Result<(), NotificationError>;

    fn cancel_all(&self) -> Result<(), NotificationError>;
}

/// Reminders to schedule from `today` given the current cycle state.
/// Nothing is planned in the past; the result is ordered by date.
pub fn plan_reminders(state: &CycleState, settings: &AppSettings, today: NaiveDate) -> Vec<Reminder> {
    if !settings.reminders_enabled {
        return Vec::new();
    }

    let mut reminders = Vec::new();
    let days_before = i64::from(settings.period_reminder_days_before);

    if days_before > 0 {
        let warn_on = state.next_period_date - Duration::days(days_before);
        if warn_on >= today {
            reminders.push(Reminder::new(
                ReminderKind::PeriodApproaching,
                warn_on,
                "Period coming up",
                format!("Your period is expected in {days_before} days."),
            ));
        }
    }

    if state.next_period_date >= today {
        reminders.push(Reminder::new(
            ReminderKind::PeriodDue,
            state.next_period_date,
            "Period expected today",
            "Log your flow to keep predictions accurate.".to_owned(),
        ));
    }

    if settings.show_fertility {
        let window_opens = state.ovulation_date - Duration::days(5);
        if window_opens >= today {
            reminders.push(Reminder::new(
                ReminderKind::FertileWindow,
                window_opens,
                "Fertile window starting",
                "Your estimated fertile window begins today.".to_owned(),
            ));
        }
        if state.ovulation_date >= today {
            reminders.push(Reminder::new(
                ReminderKind::Ovulation,
                state.ovulation_date,
                "Estimated ovulation",
                "Today is your estimated ovulation day.".to_owned(),
            ));
        }
    }

    if settings.daily_log_reminder {
        reminders.push(Reminder::new(
            ReminderKind::DailyLog,
            today,
            "How are you today?",
            "Take a moment to log symptoms and mood.".to_owned(),
        ));
    }

    reminders.sort_by_key(|r| r.fire_on);
    reminders
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::compute_cycle_state;
    use crate::models::CycleConfig;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn kinds(reminders: &[Reminder]) -> Vec<ReminderKind> {
        reminders.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn plans_period_reminders_by_default() {
        let config = CycleConfig::new(date("2024-01-01"), 28, 5);
        let today = date("2024-01-20");
        let state = compute_cycle_state(&config, today);

        let reminders = plan_reminders(&state, &AppSettings::default(), today);
        assert_eq!(
            kinds(&reminders),
            vec![ReminderKind::PeriodApproaching, ReminderKind::PeriodDue]
        );
        assert_eq!(reminders[0].fire_on, date("2024-01-27"));
        assert_eq!(reminders[1].fire_on, date("2024-01-29"));
    }

    #[test]
    fn fertility_reminders_are_opt_in_and_never_in_the_past() {
        let config = CycleConfig::new(date("2024-01-01"), 28, 5);
        let today = date("2024-01-12");
        let state = compute_cycle_state(&config, today);
        let settings = AppSettings {
            show_fertility: true,
            daily_log_reminder: true,
            ..AppSettings::default()
        };

        let reminders = plan_reminders(&state, &settings, today);
        assert_eq!(
            kinds(&reminders),
            vec![
                ReminderKind::DailyLog,
                ReminderKind::Ovulation,
                ReminderKind::PeriodApproaching,
                ReminderKind::PeriodDue,
            ]
        );
    }

    #[test]
    fn disabled_reminders_plan_nothing() {
        let config = CycleConfig::new(date("2024-01-01"), 28, 5);
        let state = compute_cycle_state(&config, date("2024-01-05"));
        let settings = AppSettings {
            reminders_enabled: false,
            ..AppSettings::default()
        };
        assert!(plan_reminders(&state, &settings, date("2024-01-05")).is_empty());
    }
}
