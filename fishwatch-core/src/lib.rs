//! Core shared library for the fishwatch rules module.
//!
//! This crate exposes the ambient primitives every other fishwatch crate
//! depends on: the canonical error type, environment-driven configuration
//! and the tracing subscriber setup.

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{load_rules_config, Environment, RulesConfig};
pub use errors::{ConfigError, FishwatchError, Result as CoreResult};
pub use logging::init_tracing;
