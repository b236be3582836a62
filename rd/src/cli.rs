//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// researchdaemon - autonomous investigative research orchestrator
#[derive(Parser)]
#[command(
    name = "rd",
    about = "Autonomous investigative research orchestrator",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Operating regime: differs only in hard ceilings and whether saturation
/// may halt scheduling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Budget,
    Expert,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "budget" => Ok(Self::Budget),
            "expert" => Ok(Self::Expert),
            _ => Err(format!("Unknown mode: {s}. Use: budget or expert")),
        }
    }
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run a research question end to end
    Run {
        /// The research question
        question: String,

        /// Directory to create the run's output directory in
        #[arg(short, long, default_value = "runs")]
        output: PathBuf,

        /// Operating regime (budget or expert)
        #[arg(short, long)]
        mode: Option<Mode>,
    },

    /// Recompute run counts from a run directory's execution log
    Replay {
        /// Path to a run directory (or directly to execution_log.jsonl)
        run_dir: PathBuf,
    },

    /// List registered sources
    ListSources,
}
