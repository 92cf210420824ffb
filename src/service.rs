use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backup::{self, BackupError, ExportCapability};
use crate::cache::{CacheLayer, CacheStats, Clock, SetOptions, SystemClock};
use crate::config::ServiceConfig;
use crate::cycle;
use crate::models::*;
use crate::notifications::{self, NotificationError, Reminder, ReminderScheduler};
use crate::prediction;
use crate::storage::{FileStore, KeyValueStore, StorageError};

pub const CONFIG_KEY: &str = "flowcast.config";
pub const RECORDS_KEY: &str = "flowcast.records";
pub const MODEL_KEY: &str = "flowcast.model";
pub const SETTINGS_KEY: &str = "flowcast.settings";
const APP_KEY_PREFIX: &str = "flowcast.";
const PREDICTION_CACHE_KEY: &str = "prediction";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid cycle configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),
    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// A prediction is only reused for the reference date it was made for.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPrediction {
    reference: NaiveDate,
    result: PredictionResult,
}

/// Everything the screens call into. The store is injected so tests and
/// platform builds each pick their own backend.
pub struct CycleService<S: KeyValueStore + Clone> {
    store: S,
    cache: CacheLayer<S>,
    prediction_ttl: Duration,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl CycleService<Arc<FileStore>> {
    /// Open the on-disk store named by `config`, encrypted when a passphrase
    /// is given.
    pub fn open(config: &ServiceConfig, passphrase: Option<String>) -> Result<Self, ServiceError> {
        let path = config.store_path()?;
        let store = match passphrase {
            Some(p) => FileStore::encrypted(path, p)?,
            None => FileStore::open(path)?,
        };
        Ok(Self::new(Arc::new(store), config))
    }
}

impl<S: KeyValueStore + Clone> CycleService<S> {
    pub fn new(store: S, config: &ServiceConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: &ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: CacheLayer::with_clock(store.clone(), config.cache.clone(), clock),
            store,
            prediction_ttl: config.prediction_ttl,
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
        }
    }

    /// Replace the source of pregnancy-chance jitter.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    /// Read a JSON value. Unreadable values are deleted and reported as absent.
    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "storage read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding corrupt stored value");
                if let Err(e) = self.store.remove_item(key) {
                    tracing::warn!(key, error = %e, "could not remove corrupt value");
                }
                None
            }
        }
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ServiceError> {
        let json = serde_json::to_string(value)?;
        self.store.set_item(key, &json)?;
        Ok(())
    }

    fn invalidate_predictions(&self) {
        self.cache.remove(PREDICTION_CACHE_KEY);
    }

    pub fn is_configured(&self) -> bool {
        self.load_config().is_some()
    }

    pub fn load_config(&self) -> Option<CycleConfig> {
        self.load(CONFIG_KEY)
    }

    /// Validate and store a new configuration, replacing the old one.
    pub fn save_config(&self, config: &CycleConfig) -> Result<(), ServiceError> {
        config.validate()?;
        self.save(CONFIG_KEY, config)?;
        self.invalidate_predictions();
        tracing::info!(
            cycle_length = config.average_cycle_length_days,
            period_length = config.average_period_length_days,
            "cycle configuration saved"
        );
        Ok(())
    }

    /// Cycle state for `reference`, or `None` before setup.
    pub fn cycle_state(&self, reference: NaiveDate) -> Option<CycleState> {
        let config = self.load_config()?;
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(cycle::compute_cycle_state_with_rng(
            &config,
            reference,
            &mut **rng,
        ))
    }

    pub fn records(&self) -> Vec<DailyRecord> {
        self.load(RECORDS_KEY).unwrap_or_default()
    }

    /// Insert or replace the record for `record.date`.
    pub fn log_day(&self, record: DailyRecord) -> Result<(), ServiceError> {
        let mut records = self.records();
        match records.iter_mut().find(|r| r.date == record.date) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        records.sort_by_key(|r| r.date);

        self.save(RECORDS_KEY, &records)?;
        self.invalidate_predictions();
        Ok(())
    }

    pub fn month_view(&self, year: i32, month: u32) -> Option<MonthView> {
        let config = self.load_config()?;
        let days = cycle::month_days(&config, year, month)?;
        let records = self
            .records()
            .into_iter()
            .filter(|r| r.date.year() == year && r.date.month() == month)
            .collect();
        Some(MonthView {
            year,
            month,
            days,
            records,
        })
    }

    /// Rebuild the prediction model from the full log and persist it.
    pub fn retrain(&self) -> Result<PredictionModel, ServiceError> {
        let model = prediction::train(&self.records());
        self.save(MODEL_KEY, &model)?;
        self.invalidate_predictions();
        tracing::info!(
            cycles = model.cycle_count,
            accuracy = model.accuracy_percent,
            "prediction model retrained"
        );
        Ok(model)
    }

    pub fn model(&self) -> Option<PredictionModel> {
        self.load(MODEL_KEY)
    }

    /// Forecast from the stored model, training one first if none exists.
    pub fn predictions(&self, reference: NaiveDate) -> Option<PredictionResult> {
        let config = self.load_config()?;

        if let Some(cached) = self.cache.get::<CachedPrediction>(PREDICTION_CACHE_KEY) {
            if cached.reference == reference {
                return Some(cached.result);
            }
        }

        let model = match self.model() {
            Some(model) => model,
            None => self.retrain().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not persist model, using it unsaved");
                prediction::train(&self.records())
            }),
        };

        let result = prediction::predict(&model, &config, reference);
        self.cache.set(
            PREDICTION_CACHE_KEY,
            &CachedPrediction {
                reference,
                result: result.clone(),
            },
            SetOptions::with_ttl(self.prediction_ttl),
        );
        Some(result)
    }

    pub fn stats(&self) -> CycleStats {
        prediction::cycle_stats(&prediction::extract_cycles(&self.records()))
    }

    pub fn settings(&self) -> AppSettings {
        self.load(SETTINGS_KEY).unwrap_or_default()
    }

    pub fn update_settings(&self, settings: &AppSettings) -> Result<(), ServiceError> {
        let mut settings = settings.clone();
        settings.period_reminder_days_before = settings.period_reminder_days_before.clamp(0, 7);
        self.save(SETTINGS_KEY, &settings)
    }

    /// Cancel every pending reminder and schedule a fresh set from today.
    pub fn sync_reminders<N: ReminderScheduler + ?Sized>(
        &self,
        scheduler: &N,
        today: NaiveDate,
    ) -> Result<Vec<Reminder>, ServiceError> {
        scheduler.cancel_all()?;
        let Some(state) = self.cycle_state(today) else {
            return Ok(Vec::new());
        };

        let reminders = notifications::plan_reminders(&state, &self.settings(), today);
        for reminder in &reminders {
            scheduler.schedule(reminder)?;
        }
        tracing::debug!(count = reminders.len(), "reminders scheduled");
        Ok(reminders)
    }

    pub fn export_backup<E: ExportCapability + ?Sized>(
        &self,
        exporter: &E,
        passphrase: &str,
    ) -> Result<Uuid, ServiceError> {
        Ok(backup::export_backup(&self.store, exporter, passphrase)?)
    }

    pub fn import_backup(&self, sealed: &[u8], passphrase: &str) -> Result<usize, ServiceError> {
        let restored = backup::import_backup(&self.store, sealed, passphrase)?;
        self.cache.clear();
        Ok(restored)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Delete every key this crate owns, cache included.
    pub fn wipe_all_data(&self) -> Result<(), ServiceError> {
        let keys: Vec<String> = self
            .store
            .get_all_keys()?
            .into_iter()
            .filter(|k| k.starts_with(APP_KEY_PREFIX))
            .collect();
        self.store.multi_remove(&keys)?;
        tracing::info!(keys = keys.len(), "all data wiped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::ManualClock;
    use crate::storage::MemoryStore;
    use chrono::Duration as Days;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn service() -> (Arc<MemoryStore>, CycleService<Arc<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        let service = CycleService::with_clock(
            store.clone(),
            &ServiceConfig::default(),
            ManualClock::at(1_700_000_000_000),
        )
        .with_rng(StdRng::seed_from_u64(3));
        (store, service)
    }

    fn configured() -> (Arc<MemoryStore>, CycleService<Arc<MemoryStore>>) {
        let (store, service) = service();
        service
            .save_config(&CycleConfig::new(date("2024-01-01"), 28, 5))
            .unwrap();
        (store, service)
    }

    fn flow_day(day: NaiveDate) -> DailyRecord {
        DailyRecord {
            flow: FlowLevel::Heavy,
            ..DailyRecord::new(day)
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        calls: Mutex<Vec<String>>,
    }

    impl ReminderScheduler for RecordingScheduler {
        fn schedule(&self, reminder: &Reminder) -> Result<(), NotificationError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("schedule {}", reminder.fire_on));
            Ok(())
        }

        fn cancel_all(&self) -> Result<(), NotificationError> {
            self.calls.lock().unwrap().push("cancel".to_owned());
            Ok(())
        }
    }

    #[test]
    fn unconfigured_service_reports_absence() {
        let (_, service) = service();
        assert!(!service.is_configured());
        assert!(service.cycle_state(date("2024-01-01")).is_none());
        assert!(service.predictions(date("2024-01-01")).is_none());
        assert!(service.month_view(2024, 1).is_none());
    }

    #[test]
    fn save_config_validates_ranges() {
        let (_, service) = service();
        let err = service
            .save_config(&CycleConfig::new(date("2024-01-01"), 40, 5))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfig(ConfigError::CycleLength(40))));
        assert!(!service.is_configured());
    }

    #[test]
    fn corrupt_config_is_discarded() {
        let (store, service) = service();
        store.set_item(CONFIG_KEY, "{\"anchorDate\":").unwrap();
        assert!(service.load_config().is_none());
        assert!(store.get_item(CONFIG_KEY).unwrap().is_none());
    }

    #[test]
    fn cycle_state_uses_stored_config() {
        let (_, service) = configured();
        let state = service.cycle_state(date("2024-01-15")).unwrap();
        assert_eq!(state.day_of_cycle, 15);
        assert_eq!(state.phase, PhaseLabel::Ovulation);
        assert!((30..=40).contains(&state.pregnancy_chance_percent));
    }

    #[test]
    fn log_day_upserts_by_date() {
        let (_, service) = configured();
        service.log_day(DailyRecord::new(date("2024-01-02"))).unwrap();
        service.log_day(flow_day(date("2024-01-01"))).unwrap();
        service
            .log_day(DailyRecord {
                mood: "calm".to_owned(),
                ..flow_day(date("2024-01-02"))
            })
            .unwrap();

        let records = service.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, date("2024-01-01"));
        assert_eq!(records[1].mood, "calm");
        assert_eq!(records[1].flow, FlowLevel::Heavy);

        let view = service.month_view(2024, 1).unwrap();
        assert_eq!(view.records.len(), 2);
        assert_eq!(view.days.len(), 31);
    }

    #[test]
    fn predictions_are_cached_until_a_day_is_logged() {
        let (store, service) = configured();
        let reference = date("2024-01-10");

        let first = service.predictions(reference).unwrap();
        assert_eq!(first.accuracy_percent, 65);
        assert!(service.model().is_some());

        let second = service.predictions(reference).unwrap();
        assert_eq!(first.next_period_date, second.next_period_date);
        assert_eq!(first.symptom_forecast.len(), second.symptom_forecast.len());
        assert_eq!(service.cache_stats().hits, 1);

        service.log_day(flow_day(reference)).unwrap();
        assert!(store.get_item("flowcast.cache.prediction").unwrap().is_none());
    }

    #[test]
    fn retrain_uses_logged_cycles() {
        let (_, service) = configured();
        let start = date("2024-01-01");
        for cycle in 0..4 {
            service.log_day(flow_day(start + Days::days(28 * cycle))).unwrap();
        }

        let model = service.retrain().unwrap();
        assert!(!model.is_basic());
        assert_eq!(model.cycle_count, 3);
        let stored = service.model().unwrap();
        assert_eq!(stored.cycle_count, model.cycle_count);
        assert_eq!(stored.accuracy_percent, model.accuracy_percent);
        assert_eq!(service.stats().total_cycles, 3);
    }

    #[test]
    fn sync_reminders_cancels_before_scheduling() {
        let (_, service) = configured();
        let scheduler = RecordingScheduler::default();

        let reminders = service
            .sync_reminders(&scheduler, date("2024-01-20"))
            .unwrap();
        assert_eq!(reminders.len(), 2);
        assert_eq!(
            *scheduler.calls.lock().unwrap(),
            vec![
                "cancel".to_owned(),
                "schedule 2024-01-27".to_owned(),
                "schedule 2024-01-29".to_owned(),
            ]
        );
    }

    #[test]
    fn settings_roundtrip_and_clamp() {
        let (_, service) = service();
        assert_eq!(service.settings(), AppSettings::default());

        let settings = AppSettings {
            period_reminder_days_before: 30,
            show_fertility: true,
            ..AppSettings::default()
        };
        service.update_settings(&settings).unwrap();
        let stored = service.settings();
        assert_eq!(stored.period_reminder_days_before, 7);
        assert!(stored.show_fertility);
    }

    #[test]
    fn wipe_removes_app_and_cache_keys() {
        let (store, service) = configured();
        service.predictions(date("2024-01-10")).unwrap();
        store.set_item("other.app", "kept").unwrap();

        service.wipe_all_data().unwrap();
        assert_eq!(store.get_all_keys().unwrap(), vec!["other.app".to_owned()]);
        assert!(!service.is_configured());
    }
}
