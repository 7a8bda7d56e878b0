//! The transform stage shell shared by all six asset classes.
//!
//! A stage enumerates its sources, runs the class transform chain, writes
//! under the class output directory, derives the `.min` sibling where the
//! class has a minify sub-chain, and reports the written set to the reload
//! notifier. Failures stay inside the returned outcome; siblings running in
//! the same parallel group are never affected.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::fonts;
use crate::paths::{AssetClass, PathSpec, PathTable};
use crate::scanner;
use crate::server::ReloadNotifier;
use crate::transforms;

/// Cache-line aligned atomic counter to prevent false sharing between
/// stages updating stats from different worker threads
#[repr(align(64))]
pub struct CacheAlignedAtomic(pub AtomicU64);

impl CacheAlignedAtomic {
    pub const fn new(val: u64) -> Self {
        Self(AtomicU64::new(val))
    }
}

/// Global counters shared across concurrently running stages
pub struct BuildStats {
    pub files_written: CacheAlignedAtomic,
    pub bytes_written: CacheAlignedAtomic,
    pub errors: CacheAlignedAtomic,
}

impl BuildStats {
    pub fn new() -> Self {
        Self {
            files_written: CacheAlignedAtomic::new(0),
            bytes_written: CacheAlignedAtomic::new(0),
            errors: CacheAlignedAtomic::new(0),
        }
    }
}

impl Default for BuildStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage completion status
#[derive(Debug)]
pub enum StageStatus {
    /// All sources transformed and written
    Success,
    /// Failed; recorded without cancelling sibling stages
    Failed(PipelineError),
}

/// Result of one stage invocation
#[derive(Debug)]
pub struct StageOutcome {
    pub class: AssetClass,
    pub status: StageStatus,
    pub files_written: u64,
    pub duration: Duration,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, StageStatus::Success)
    }
}

/// Run one asset class stage to completion.
pub fn run_stage(
    class: AssetClass,
    table: &PathTable,
    notifier: &dyn ReloadNotifier,
    stats: &BuildStats,
) -> StageOutcome {
    use std::sync::atomic::Ordering;

    let start = Instant::now();
    let spec = table.resolve(class);

    // Fonts run converter sub-runs instead of a byte chain
    let result = if class == AssetClass::Fonts {
        fonts::convert_fonts(spec, &fonts::default_converters())
    } else {
        run_transform_chain(class, spec)
    };

    match result {
        Ok(written) => {
            let files = written.len() as u64;
            let bytes: u64 = written.iter().map(|(_, b)| b).sum();
            stats.files_written.0.fetch_add(files, Ordering::Relaxed);
            stats.bytes_written.0.fetch_add(bytes, Ordering::Relaxed);

            if !written.is_empty() {
                let paths: Vec<PathBuf> = written.into_iter().map(|(p, _)| p).collect();
                notifier.notify_changed(&paths);
            }

            StageOutcome {
                class,
                status: StageStatus::Success,
                files_written: files,
                duration: start.elapsed(),
            }
        }
        Err(e) => {
            stats.errors.0.fetch_add(1, Ordering::Relaxed);
            StageOutcome {
                class,
                status: StageStatus::Failed(e),
                files_written: 0,
                duration: start.elapsed(),
            }
        }
    }
}

fn run_transform_chain(
    class: AssetClass,
    spec: &PathSpec,
) -> Result<Vec<(PathBuf, u64)>, PipelineError> {
    let sources = scanner::expand(&spec.source_patterns)?;
    let primary = transforms::primary_chain(class);
    let minify = transforms::minify_chain(class);
    let mut written = Vec::new();

    for source in &sources {
        let mut bytes = fs::read(&source.path).map_err(|e| PipelineError::ReadFailed {
            path: source.path.clone(),
            source: e,
        })?;
        for transform in &primary {
            bytes = transform
                .apply(bytes, &source.path)
                .map_err(|message| PipelineError::Transform {
                    stage: class,
                    path: source.path.clone(),
                    message,
                })?;
        }

        let dest = spec.output_dir.join(&source.rel);
        write_output(&dest, &bytes)?;
        written.push((dest.clone(), bytes.len() as u64));

        // The minified variant derives from the already-written primary
        if let Some(chain) = &minify {
            let mut minified = bytes.clone();
            for transform in chain {
                minified = transform.apply(minified, &source.path).map_err(|message| {
                    PipelineError::Transform {
                        stage: class,
                        path: source.path.clone(),
                        message,
                    }
                })?;
            }
            let min_dest = min_sibling(&dest);
            write_output(&min_dest, &minified)?;
            written.push((min_dest, minified.len() as u64));
        }
    }

    Ok(written)
}

fn write_output(dest: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::write(dest, bytes).map_err(|e| PipelineError::WriteFailed {
        path: dest.to_path_buf(),
        source: e,
    })
}

/// `app.js` → `app.min.js`; extension-less names get a bare `.min` suffix.
pub fn min_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_file_name(format!("{stem}.min.{ext}")),
        None => path.with_file_name(format!("{stem}.min")),
    }
}
