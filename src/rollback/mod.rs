//! Rollback log
//!
//! Every move, rename and duplicate removal goes through [`RollbackLog`]. The
//! filesystem move happens first and the log entry is appended second, so the
//! presence of an entry is the source of truth for "this happened". Undo never
//! rewrites history: it flips the entry to `undone` and appends a `restore`
//! entry for the inverse move.
//!
//! Module layout:
//! - `io`: crash-safe file primitives (atomic writes, non-clobbering moves)
//! - `locks`: per-path mutual exclusion
//! - `pending`: intent files for moves in flight
//! - `log`: the log itself

pub mod io;
pub mod locks;
pub mod log;
pub mod pending;

pub use log::{OperationDrift, RollbackLog};
