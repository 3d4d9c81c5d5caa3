//! # edgeclock Common Library
//!
//! Shared code for the edgeclock crates:
//! - Engine configuration (TOML loading and validation)
//! - Diagnostic event types and the `EventBus`
//! - Wall-clock abstraction
//! - Human-readable offset formatting

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod time;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{DiagnosticEvent, EventBus};
pub use time::{ManualClock, SystemClock, WallClock};
