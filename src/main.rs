use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use assetpipe::config::{Cli, Command, Config};
use assetpipe::paths::{AssetClass, PathTable};
use assetpipe::pipeline::{collect_outcomes, run_full_build, BuildReport};
use assetpipe::server::{LiveReloadServer, NullNotifier};
use assetpipe::stage::{BuildStats, StageOutcome, StageStatus};
use assetpipe::watch::{WatchEvent, WatchSession};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli);

    if !config.root.exists() {
        anyhow::bail!("project root not found: {}", config.root.display());
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build_global()
        .ok();

    let table = config.path_table();
    table.validate().context("invalid path configuration")?;

    match config.command {
        Command::Build => cmd_build(&config, table),
        Command::Watch => cmd_watch(&config, table),
    }
}

fn cmd_build(config: &Config, table: PathTable) -> Result<ExitCode> {
    let stats = BuildStats::new();

    let progress = if config.verbose {
        let pb = ProgressBar::new(AssetClass::ALL.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message("building");
        Some(pb)
    } else {
        None
    };

    let report = run_full_build(&table, &NullNotifier, &stats, &|outcome| {
        if let Some(pb) = &progress {
            pb.inc(1);
        }
        if let StageStatus::Failed(e) = &outcome.status {
            eprintln!("{}: {e}", outcome.class);
        }
    });

    if let Some(pb) = progress {
        pb.finish_with_message("done");
    }

    print_report(&report, &stats);

    if let Some(fatal) = &report.fatal {
        eprintln!("Error: {fatal}");
        return Ok(ExitCode::from(2));
    }
    for e in &report.finalizer_errors {
        eprintln!("Warning: {e}");
    }

    let (has_success, has_failure) = collect_outcomes(&report.outcomes);
    if has_failure && !has_success {
        Ok(ExitCode::from(2))
    } else if has_failure {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn cmd_watch(config: &Config, table: PathTable) -> Result<ExitCode> {
    let source_root = config.source_root();
    if !source_root.exists() {
        anyhow::bail!("source directory not found: {}", source_root.display());
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let notifier: Arc<LiveReloadServer> = Arc::new(LiveReloadServer::new(config.port));
    let stats = Arc::new(BuildStats::new());

    // Register watches before the initial build so changes made while it
    // runs are queued, not lost
    let session = WatchSession::start(&table, &source_root)
        .with_context(|| format!("cannot watch {}", source_root.display()))?;

    // Initial full build runs concurrently with the watch loop
    let builder = {
        let table = table.clone();
        let notifier = Arc::clone(&notifier);
        let stats = Arc::clone(&stats);
        let verbose = config.verbose;
        thread::spawn(move || {
            let report = run_full_build(&table, &*notifier, &stats, &|outcome| {
                report_stage(outcome, verbose);
            });
            print_report(&report, &stats);
            for e in &report.finalizer_errors {
                eprintln!("Warning: {e}");
            }
            if let Some(port) = notifier.local_port() {
                println!("Preview: http://127.0.0.1:{port}/");
            }
            report
        })
    };

    session.run(&table, &*notifier, &stats, &running, &|event| {
        print_watch_event(&event);
    });

    let _ = builder.join();
    Ok(ExitCode::from(130))
}

fn report_stage(outcome: &StageOutcome, verbose: bool) {
    match &outcome.status {
        StageStatus::Success if verbose => eprintln!(
            "  {}: {} files in {:.0}ms",
            outcome.class,
            outcome.files_written,
            outcome.duration.as_secs_f64() * 1000.0
        ),
        StageStatus::Failed(e) => eprintln!("{}: {e}", outcome.class),
        _ => {}
    }
}

fn print_report(report: &BuildReport, stats: &BuildStats) {
    let total_files = stats.files_written.0.load(Ordering::Relaxed);
    let duration = report.duration;
    let throughput = if duration.as_secs_f64() > 0.0 {
        total_files as f64 / duration.as_secs_f64()
    } else {
        0.0
    };

    println!(
        "Built {} files in {:.2}s ({:.0} files/sec)",
        total_files,
        duration.as_secs_f64(),
        throughput
    );

    for outcome in &report.outcomes {
        let status = match &outcome.status {
            StageStatus::Success => format!("{} files", outcome.files_written),
            StageStatus::Failed(e) => format!("FAILED: {e}"),
        };
        println!("  {}: {}", outcome.class, status);
    }
}

fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| {
            let secs = d.as_secs() % 86_400;
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        })
        .unwrap_or_else(|_| "00:00:00".to_string())
}

fn print_watch_event(event: &WatchEvent) {
    let ts = timestamp();
    match event {
        WatchEvent::Started { root } => {
            println!("[{ts}] watching {}", root.display());
        }
        WatchEvent::Changed { path, class } => {
            println!("[{ts}] {} changed ({class})", path.display());
        }
        WatchEvent::StageDone { class, files } => {
            println!("[{ts}] {class}: rebuilt {files} files");
        }
        WatchEvent::StageError { class, message } => {
            eprintln!("[{ts}] {class}: {message}");
        }
        WatchEvent::Shutdown => {
            println!("[{ts}] watch stopped");
        }
    }
}
