//! Data model shared by every component

pub mod classification;
pub mod file;
pub mod operation;
pub mod pattern;
pub mod watch;

pub use classification::*;
pub use file::*;
pub use operation::*;
pub use pattern::*;
pub use watch::*;
