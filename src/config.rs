//! CLI surface and runtime settings for the asset pipeline.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::paths::PathTable;

/// Fast front-end asset pipeline with incremental watch and live reload
#[derive(Parser, Debug)]
#[command(name = "assetpipe")]
#[command(version)]
#[command(about = "Front-end asset pipeline with incremental watch and live reload")]
pub struct Cli {
    /// Project root directory
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Source directory, relative to the project root
    #[arg(short, long, global = true, default_value = "src")]
    pub source: String,

    /// Output directory, relative to the project root
    #[arg(short, long, global = true, default_value = "dist")]
    pub out: String,

    /// Number of parallel workers
    #[arg(short, long, global = true, default_value_t = num_cpus::get())]
    pub jobs: usize,

    /// Preview server port (watch mode)
    #[arg(short, long, global = true, default_value_t = 3000)]
    pub port: u16,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run one full build and exit
    Build,
    /// Build once, then rebuild changed stages continuously (default)
    Watch,
}

/// Runtime configuration parsed from CLI
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root (canonicalized when possible)
    pub root: PathBuf,
    /// Source directory name under the root
    pub source: String,
    /// Output directory name under the root
    pub out: String,
    /// Number of parallel workers
    pub jobs: usize,
    /// Preview server port
    pub port: u16,
    /// Enable verbose output
    pub verbose: bool,
    /// Selected entry point; watch when none was given
    pub command: Command,
}

impl Config {
    /// Create Config from CLI arguments
    pub fn from_cli(cli: Cli) -> Self {
        let root = cli.root.canonicalize().unwrap_or(cli.root);
        Config {
            root,
            source: cli.source,
            out: cli.out,
            jobs: cli.jobs.max(1),
            port: cli.port,
            verbose: cli.verbose,
            command: cli.command.unwrap_or(Command::Watch),
        }
    }

    /// The path table for this project layout
    pub fn path_table(&self) -> PathTable {
        PathTable::for_project(&self.root, &self.source, &self.out)
    }

    /// Absolute source directory, the watch root
    pub fn source_root(&self) -> PathBuf {
        self.root.join(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cli(command: Option<Command>, jobs: usize) -> Cli {
        Cli {
            root: PathBuf::from("/tmp"),
            source: "src".to_string(),
            out: "dist".to_string(),
            jobs,
            port: 3000,
            verbose: false,
            command,
        }
    }

    // ==================== Config::from_cli tests ====================

    #[test]
    fn test_config_defaults_to_watch() {
        let config = Config::from_cli(make_cli(None, 4));
        assert_eq!(config.command, Command::Watch);
    }

    #[test]
    fn test_config_build_command() {
        let config = Config::from_cli(make_cli(Some(Command::Build), 4));
        assert_eq!(config.command, Command::Build);
    }

    #[test]
    fn test_config_jobs_minimum_one() {
        let config = Config::from_cli(make_cli(None, 0));
        assert_eq!(config.jobs, 1);
    }

    #[test]
    fn test_config_source_root() {
        let config = Config::from_cli(make_cli(None, 2));
        assert_eq!(config.source_root(), PathBuf::from("/tmp/src"));
    }

    #[test]
    fn test_config_path_table_is_rooted() {
        let config = Config::from_cli(make_cli(None, 2));
        let table = config.path_table();
        assert!(table.output_root().starts_with("/tmp"));
        assert!(table.validate().is_ok());
    }

    // ==================== Cli parsing tests ====================

    #[test]
    fn test_cli_parses_build_subcommand() {
        use clap::Parser;
        let cli = Cli::parse_from(["assetpipe", "build", "--jobs", "2"]);
        assert_eq!(cli.command, Some(Command::Build));
        assert_eq!(cli.jobs, 2);
    }

    #[test]
    fn test_cli_parses_no_subcommand() {
        use clap::Parser;
        let cli = Cli::parse_from(["assetpipe", "--port", "4000"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.port, 4000);
    }
}
