//! Decision-and-safety engine for Sentinel
//!
//! Classifies files into a folder taxonomy, learns from corrections and
//! manual moves, observes watched directories through a cooldown, finds
//! duplicates, and routes every filesystem change through an append-only
//! rollback log so it can be undone.
//!
//! ```no_run
//! use sentinel_core::{EngineConfig, FileDescriptor, Sentinel};
//! use std::path::Path;
//!
//! # async fn run() -> sentinel_core::Result<()> {
//! sentinel_core::init_tracing();
//! let engine = Sentinel::open(EngineConfig::from_env()?).await?;
//! let file = FileDescriptor::from_path(Path::new("/home/me/Downloads/lease agreement.pdf"))?;
//! let outcome = engine.organize(&file, Vec::new()).await?;
//! if let Some(id) = outcome.operation_id {
//!     engine.undo(id)?;
//! }
//! engine.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod learning;
pub mod logging;
pub mod models;
pub mod observer;
pub mod rollback;
pub mod security;
pub mod storage;

pub use classify::{Action, Analyzer, ConfidenceGate};
pub use config::{ConfidenceMode, EngineConfig, ModeThresholds};
pub use dedup::{CleanResult, DuplicateGroup, ScanScope};
pub use engine::{plan_destination, OrganizeOutcome, Sentinel};
pub use error::{Result, SentinelError};
pub use logging::init_tracing;
pub use models::*;
pub use observer::{Clock, WatchRole};
pub use rollback::OperationDrift;
