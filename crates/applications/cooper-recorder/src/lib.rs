//! # Cooper Recorder
//!
//! Drives a [`cooper_core`] recording session from outside a live engine and
//! delivers the result.
//!
//! ```text
//! trace.json ──► trace::replay ─────┐
//!                                   ├──► SessionSnapshot ──► output::deliver ──► session.json
//! synthetic::SyntheticEngine ──► run┘                                       └──► SqliteSink
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod output;
pub mod sqlite;
pub mod synthetic;
pub mod trace;

pub use config::{AppConfig, CONFIG_ENV, DEFAULT_CONFIG_PATH};
pub use error::{AppError, Result};
pub use sqlite::SqliteSink;
pub use synthetic::{SyntheticConfig, SyntheticEngine, SyntheticSummary};
pub use trace::{ReplaySummary, TickStep, Trace, TraceStep};
