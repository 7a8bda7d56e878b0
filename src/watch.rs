//! Incremental rebuild coordination.
//!
//! A [`WatchSession`] owns the file-system watcher, the event channel, and
//! one [`WatchBinding`] per watch-eligible asset class. A change event is
//! routed to the single stage bound to the first matching pattern and that
//! stage alone is re-run; a failing re-run is reported and watching
//! continues. The session never invokes the clean stage or the font style
//! generator, and it is torn down only by dropping the value.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::PipelineError;
use crate::paths::{AssetClass, PathTable};
use crate::scanner;
use crate::server::ReloadNotifier;
use crate::stage::{run_stage, BuildStats, StageStatus};

/// Poll interval for the shutdown flag while waiting on watch events
const POLL_MS: u64 = 50;

/// Immutable association between one watch pattern and the stage it
/// re-triggers. Built once at session start.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub pattern: String,
    pub class: AssetClass,
}

/// Events reported by the watch loop
#[derive(Debug)]
pub enum WatchEvent {
    Started { root: PathBuf },
    Changed { path: PathBuf, class: AssetClass },
    StageDone { class: AssetClass, files: u64 },
    StageError { class: AssetClass, message: String },
    Shutdown,
}

/// Long-lived watch state: bindings plus the underlying watcher and its
/// event channel. Dropping the session stops the watcher.
pub struct WatchSession {
    bindings: Vec<WatchBinding>,
    root: PathBuf,
    rx: Receiver<PathBuf>,
    // Held for its Drop; deregisters the OS watches
    _watcher: RecommendedWatcher,
}

impl WatchSession {
    /// Register a recursive watch on `root` and build the bindings from the
    /// path table. Fonts never get a binding.
    pub fn start(table: &PathTable, root: &Path) -> Result<Self, PipelineError> {
        let bindings: Vec<WatchBinding> = AssetClass::ALL
            .iter()
            .filter_map(|&class| {
                table
                    .resolve(class)
                    .watch_pattern
                    .as_ref()
                    .map(|pattern| WatchBinding {
                        pattern: pattern.clone(),
                        class,
                    })
            })
            .collect();

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| PipelineError::WatchInit {
            message: e.to_string(),
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| PipelineError::WatchInit {
                message: e.to_string(),
            })?;

        Ok(Self {
            bindings,
            root: root.to_path_buf(),
            rx,
            _watcher: watcher,
        })
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// The stage responsible for a changed path: first binding whose pattern
    /// matches, if any.
    pub fn binding_for(&self, path: &Path) -> Option<AssetClass> {
        self.bindings
            .iter()
            .find(|b| scanner::matches(&b.pattern, path))
            .map(|b| b.class)
    }

    /// Route one change event: re-run the bound stage exactly once. Returns
    /// `None` for paths no binding matches.
    pub fn handle_event(
        &self,
        path: &Path,
        table: &PathTable,
        notifier: &dyn ReloadNotifier,
        stats: &BuildStats,
        on_event: &dyn Fn(WatchEvent),
    ) -> Option<AssetClass> {
        let class = self.binding_for(path)?;
        on_event(WatchEvent::Changed {
            path: path.to_path_buf(),
            class,
        });

        let outcome = run_stage(class, table, notifier, stats);
        match outcome.status {
            StageStatus::Success => on_event(WatchEvent::StageDone {
                class,
                files: outcome.files_written,
            }),
            // Isolated to this re-trigger; the session keeps watching
            StageStatus::Failed(e) => on_event(WatchEvent::StageError {
                class,
                message: e.to_string(),
            }),
        }
        Some(class)
    }

    /// Block on watch events until `running` is cleared.
    pub fn run(
        &self,
        table: &PathTable,
        notifier: &dyn ReloadNotifier,
        stats: &BuildStats,
        running: &AtomicBool,
        on_event: &dyn Fn(WatchEvent),
    ) {
        on_event(WatchEvent::Started {
            root: self.root.clone(),
        });

        while running.load(Ordering::SeqCst) {
            if let Ok(path) = self.rx.recv_timeout(Duration::from_millis(POLL_MS)) {
                self.handle_event(&path, table, notifier, stats, on_event);
            }
        }

        on_event(WatchEvent::Shutdown);
    }
}
