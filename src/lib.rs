//! # assetpipe
//!
//! Fast front-end asset build pipeline: transforms a source tree of markup,
//! stylesheets, scripts, images, fonts, and raw assets into a deployable
//! output tree, with an incremental watch mode that re-runs only the stage
//! responsible for a changed file and pushes a live-reload notification to
//! connected browsers.
//!
//! ## Features
//!
//! - Declarative path table mapping six asset classes to glob sources,
//!   watch patterns, and output directories
//! - Clean → parallel transform stages → finalizers build orchestration
//! - Per-stage failure isolation: one broken stylesheet never stops the
//!   other stages
//! - Watch bindings that map a changed file back to exactly one stage
//! - Local preview server with server-sent-events live reload
//!
//! ## Usage
//!
//! ```ignore
//! use assetpipe::paths::PathTable;
//! use assetpipe::pipeline::run_full_build;
//! use assetpipe::server::NullNotifier;
//! use assetpipe::stage::BuildStats;
//!
//! let table = PathTable::for_project(project_root, "src", "dist");
//! let stats = BuildStats::new();
//! let report = run_full_build(&table, &NullNotifier, &stats, &|_| {});
//! ```

/// CLI surface and runtime configuration
pub mod config;

/// Pipeline error types
pub mod error;

/// Font conversion and the generated font-face include
pub mod fonts;

/// Asset classes and the path table
pub mod paths;

/// Clean stage and full-build orchestration
pub mod pipeline;

/// Source file enumeration from glob patterns
pub mod scanner;

/// Live reload notification and the local preview server
pub mod server;

/// The per-class transform stage shell
pub mod stage;

/// Content transforms applied by the stages
pub mod transforms;

/// Watch bindings and the incremental rebuild loop
pub mod watch;

// Re-exports for convenience
pub use error::PipelineError;
pub use paths::{AssetClass, PathSpec, PathTable};
pub use pipeline::{run_full_build, BuildPhase, BuildReport};
pub use stage::{run_stage, BuildStats, StageOutcome, StageStatus};
pub use watch::{WatchBinding, WatchSession};
