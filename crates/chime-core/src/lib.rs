//! `chime-core` — shared foundation for the chime scheduler.
//!
//! Holds the pieces every other crate needs: configuration loading
//! (`chime.toml` + `CHIME_*` env overrides) and the top-level error type.

pub mod config;
pub mod error;

pub use config::{ChimeConfig, DatabaseConfig, SchedulerConfig};
pub use error::{ChimeError, Result};
