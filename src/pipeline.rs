//! Full-build orchestration.
//!
//! A build moves strictly forward through
//! `Idle → Cleaning → BuildingParallel → Finalizing → Done | Failed`:
//! the output root is removed, the six class stages run concurrently on the
//! rayon pool, then the font style generator and the reload collaborator's
//! startup run as finalizers. Configuration and clean errors are fatal and
//! stop the build before any stage starts; stage errors are recorded in the
//! report and never cancel siblings.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::error::PipelineError;
use crate::fonts;
use crate::paths::{AssetClass, PathTable};
use crate::server::ReloadNotifier;
use crate::stage::{run_stage, BuildStats, StageOutcome};

/// Build lifecycle states. Transitions are strictly forward; there are no
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Idle,
    Cleaning,
    BuildingParallel,
    Finalizing,
    Done,
    Failed,
}

/// Everything a finished (or aborted) build reports back.
#[derive(Debug)]
pub struct BuildReport {
    /// Final phase: `Done`, or `Failed` for fatal errors
    pub phase: BuildPhase,
    /// One outcome per stage that ran
    pub outcomes: Vec<StageOutcome>,
    /// Configuration or clean error that aborted the build
    pub fatal: Option<PipelineError>,
    /// Non-fatal finalizer failures (font style generation, server startup)
    pub finalizer_errors: Vec<PipelineError>,
    pub duration: Duration,
}

impl BuildReport {
    pub fn has_stage_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_success())
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

/// Remove the output root recursively. An absent directory is success.
pub fn clean_output(output_root: &Path) -> Result<(), PipelineError> {
    match fs::remove_dir_all(output_root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::CleanFailed {
            path: output_root.to_path_buf(),
            source: e,
        }),
    }
}

/// Run one full build. `on_stage` is invoked as each stage outcome lands,
/// from worker threads.
pub fn run_full_build(
    table: &PathTable,
    notifier: &dyn ReloadNotifier,
    stats: &BuildStats,
    on_stage: &(dyn Fn(&StageOutcome) + Sync),
) -> BuildReport {
    let start = Instant::now();

    // Configuration errors fail before any stage runs
    if let Err(e) = table.validate() {
        return BuildReport {
            phase: BuildPhase::Failed,
            outcomes: Vec::new(),
            fatal: Some(e),
            finalizer_errors: Vec::new(),
            duration: start.elapsed(),
        };
    }

    // Cleaning: failure here is fatal, no stage has started yet
    if let Err(e) = clean_output(table.output_root()) {
        return BuildReport {
            phase: BuildPhase::Failed,
            outcomes: Vec::new(),
            fatal: Some(e),
            finalizer_errors: Vec::new(),
            duration: start.elapsed(),
        };
    }

    // BuildingParallel: the group completes when all six stages finish
    let outcomes: Vec<StageOutcome> = AssetClass::ALL
        .par_iter()
        .map(|&class| {
            let outcome = run_stage(class, table, notifier, stats);
            on_stage(&outcome);
            outcome
        })
        .collect();

    // Finalizing: the style generator must not race the styles stage, so it
    // runs only after the parallel group has completed
    let fonts_out = table.resolve(AssetClass::Fonts).output_dir.clone();
    let (style_result, server_result) = rayon::join(
        || fonts::generate_font_styles(table.font_style_include(), &fonts_out),
        || notifier.start(table.output_root()),
    );

    let mut finalizer_errors = Vec::new();
    if let Err(e) = style_result {
        finalizer_errors.push(e);
    }
    if let Err(e) = server_result {
        finalizer_errors.push(e);
    }

    BuildReport {
        phase: BuildPhase::Done,
        outcomes,
        fatal: None,
        finalizer_errors,
        duration: start.elapsed(),
    }
}

/// Aggregate outcomes into (has_success, has_failure)
pub fn collect_outcomes(outcomes: &[StageOutcome]) -> (bool, bool) {
    let mut has_success = false;
    let mut has_failure = false;
    for outcome in outcomes {
        if outcome.is_success() {
            has_success = true;
        } else {
            has_failure = true;
        }
    }
    (has_success, has_failure)
}
