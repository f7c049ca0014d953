//! Watched-directory observer
//!
//! Files dropped into a watched path are tracked through a mandatory 7-day
//! cooldown before the engine may organize them unattended, and then only at
//! a confidence of at least 0.85. Files the user moves from a watched path
//! into the library are reported to the learner as verified examples.
//!
//! One independent monitor task runs per watched path, plus one for the
//! library root that only looks for arrivals.

pub mod backend;
pub mod monitor;
pub mod state;
pub mod tracker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub use backend::{create_backend, NotifyBackend, PollingBackend, WatchBackend, WatchEvent};
pub use monitor::{category_for, system_clock, Clock, ObserverContext, WatchRole};
pub use state::FileStamp;

use monitor::{MonitorHandle, PathMonitor};

pub struct Observer {
    monitors: Vec<MonitorHandle>,
}

impl Observer {
    /// Spawn the monitors. Must be called inside a Tokio runtime.
    ///
    /// A watch path that does not exist yet is not an error: its monitor
    /// keeps retrying until the directory shows up.
    pub fn start(ctx: Arc<ObserverContext>) -> Self {
        let mut monitors = Vec::new();
        let mut seen: Vec<&Path> = Vec::new();

        for watch in &ctx.config.watch_paths {
            if seen.contains(&watch.path.as_path()) {
                continue;
            }
            seen.push(&watch.path);
            monitors.push(PathMonitor::spawn(
                Arc::clone(&ctx),
                watch.path.clone(),
                watch.recursive,
                WatchRole::Inbox,
            ));
        }

        if !monitors.is_empty() {
            monitors.push(PathMonitor::spawn(
                Arc::clone(&ctx),
                ctx.library_root.clone(),
                true,
                WatchRole::Library,
            ));
        }

        info!(paths = monitors.len(), "Observer started");
        Self { monitors }
    }

    pub fn watched(&self) -> Vec<(PathBuf, WatchRole)> {
        self.monitors.iter().map(|m| (m.root.clone(), m.role)).collect()
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.monitors.iter().any(|m| m.root == path)
    }

    /// Stop one watched path without touching the others
    pub async fn stop_path(&mut self, path: &Path) -> bool {
        match self.monitors.iter().position(|m| m.root == path) {
            Some(index) => {
                self.monitors.remove(index).stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every monitor. Each persists its watch state before exiting.
    pub async fn stop(self) {
        for monitor in self.monitors {
            monitor.stop().await;
        }
        info!("Observer stopped");
    }
}
