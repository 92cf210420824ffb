//! Flowcast - on-device cycle phase, fertility and prediction core
//!
//! Screens call into [`CycleService`]; the pure computations live in
//! [`cycle`] (phase and fertility from three scalars) and [`prediction`]
//! (a small statistical model trained on the daily log). Persistence goes
//! through the [`storage::KeyValueStore`] boundary, with [`cache`] layered
//! on top for derived results.

pub mod backup;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod cycle;
pub mod logging;
pub mod models;
pub mod notifications;
pub mod prediction;
pub mod service;
pub mod storage;

pub use cache::{CacheLayer, SetOptions};
pub use config::{CacheConfig, ServiceConfig};
pub use cycle::{classify_phase, compute_cycle_state, compute_cycle_state_with_rng};
pub use models::{CycleConfig, CycleState, DailyRecord, PhaseLabel, PredictionModel, PredictionResult};
pub use prediction::{predict, train};
pub use service::{CycleService, ServiceError};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

/// Crate version, embedded in CLI output
pub const FLOWCAST_VERSION: &str = env!("CARGO_PKG_VERSION");
