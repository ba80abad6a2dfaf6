//! Network idleness tracking for UI test harnesses.
//!
//! This crate provides:
//! - [`UriIdlingResource`]: counts in-flight loads and reports idle once the
//!   count has stayed at zero for a settle timeout
//! - Scheduling: [`TokioScheduler`] for real time, [`ManualScheduler`] for tests
//! - Ignore patterns: whole-string URI regexes excluded from counting
//! - Configuration: [`TrackerConfig`] loaded from TOML files and the environment

pub mod config;
mod error;
pub mod pattern;
pub mod resource;
pub mod scheduler;
pub mod tracker;
pub mod types;

pub use config::TrackerConfig;
pub use error::IdleError;
pub use pattern::{IgnoreList, UriPattern};
pub use resource::{IdlingResource, LoadListener, ResourceCallback};
pub use scheduler::{Action, ManualScheduler, Scheduler, TaskId, TokioScheduler};
pub use tracker::{LoadGuard, UriIdlingResource};
pub use types::{SettleTimeout, ValidationError};
