//! Engine context for tidewal
//!
//! This crate wires the lower layers into one owned object per environment:
//! - `EngineConfig`: settings persisted as `tidewal.toml`
//! - `Engine`: startup upgrade check, logger, checkpoints, rollback node
//!   pool and transaction manager, clean close
//!
//! Nothing here is process-global. Two environments in one process are two
//! independent `Engine` values.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;

pub use config::{ConfigError, EngineConfig, CONFIG_FILE_NAME};
pub use engine::{Engine, EngineError, EngineParts, LOCK_FILE_NAME};
