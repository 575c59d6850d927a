//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod annotate;
mod check;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::RunConfig;
use crate::llm::VlmConfig;
use crate::services::annotation::{Platform, TaskKind};

#[derive(Parser)]
#[command(name = "floodlabel")]
#[command(about = "Resumable VLM annotation of flood-related social media posts")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Classify posts as flood-related or not
    Classify {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Extract non-economic humanitarian impact signals
    Impact {
        /// Platform the table was scraped from
        #[arg(long, value_enum)]
        platform: Platform,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Describe visible flood damage in post images
    Damage {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Check that the inference server is reachable and the model installed
    Check {
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
}

/// Where to find the model.
#[derive(Args, Debug, Clone, Default)]
pub struct EndpointArgs {
    /// Inference server base URL (overrides VLM_ENDPOINT)
    #[arg(long)]
    base_url: Option<String>,

    /// Model name (overrides VLM_MODEL)
    #[arg(long)]
    model: Option<String>,
}

impl EndpointArgs {
    /// Task default, then environment, then flags.
    fn vlm_config(&self, default_model: &str) -> VlmConfig {
        let mut config = VlmConfig::for_model(default_model);
        if let Some(ref url) = self.base_url {
            config = config.with_endpoint(url);
        }
        if let Some(ref model) = self.model {
            config = config.with_model(model);
        }
        config
    }
}

/// Options shared by every annotation command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input CSV file
    input: PathBuf,

    /// Output CSV file (defaults to overwriting the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    endpoint: EndpointArgs,

    /// First row index to process
    #[arg(long, default_value = "0")]
    start_idx: usize,

    /// Maximum number of rows to process from the start index
    #[arg(long)]
    max_rows: Option<usize>,

    /// Reprocess rows already marked complete
    #[arg(long)]
    no_resume: bool,

    /// Inference requests in flight at once (task default if unset)
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Successful rows between checkpoints (task default if unset)
    #[arg(long)]
    checkpoint_every: Option<usize>,

    /// Directory image paths are relative to (detected if unset)
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Skip the warm-up request
    #[arg(long)]
    no_warm_up: bool,

    /// Seed for sampling images from multi-image rows
    #[arg(long, default_value = "0")]
    seed: u64,
}

impl RunArgs {
    fn run_config(&self, task: TaskKind) -> RunConfig {
        let output = self.output.clone().unwrap_or_else(|| self.input.clone());
        RunConfig::new(output)
            .with_range(self.start_idx, self.max_rows)
            .with_resume(!self.no_resume)
            .with_max_concurrent(self.max_concurrent.unwrap_or(task.default_concurrency()))
            .with_checkpoint_every(self.checkpoint_every)
            .with_project_root(self.project_root.clone())
            .with_warm_up(!self.no_warm_up)
            .with_seed(self.seed)
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Classify { run } => annotate::cmd_annotate(TaskKind::Classify, &run).await,
        Commands::Impact { platform, run } => {
            annotate::cmd_annotate(TaskKind::Impact(platform), &run).await
        }
        Commands::Damage { run } => annotate::cmd_annotate(TaskKind::Damage, &run).await,
        Commands::Check { endpoint } => check::cmd_check(&endpoint).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_classify_defaults() {
        let cli = parse(&["floodlabel", "classify", "posts.csv"]);
        let Commands::Classify { run } = cli.command else {
            panic!("expected classify");
        };
        let config = run.run_config(TaskKind::Classify);
        assert_eq!(config.output, PathBuf::from("posts.csv"));
        assert_eq!(config.max_concurrent, 3);
        assert!(config.resume);
        assert!(config.warm_up);
        assert_eq!(config.checkpoint_every, None);
    }

    #[test]
    fn test_parse_impact_run_options() {
        let cli = parse(&[
            "floodlabel",
            "-v",
            "impact",
            "tweets.csv",
            "--platform",
            "twitter",
            "-o",
            "out.csv",
            "--start-idx",
            "100",
            "--max-rows",
            "50",
            "--no-resume",
            "--no-warm-up",
            "--checkpoint-every",
            "1",
            "--seed",
            "7",
        ]);
        assert!(cli.verbose);
        let Commands::Impact { platform, run } = cli.command else {
            panic!("expected impact");
        };
        assert_eq!(platform, Platform::Twitter);

        let config = run.run_config(TaskKind::Impact(platform));
        assert_eq!(config.output, PathBuf::from("out.csv"));
        assert_eq!(config.row_range(1000), 100..150);
        assert_eq!(config.max_concurrent, 2);
        assert!(!config.resume);
        assert!(!config.warm_up);
        assert_eq!(config.checkpoint_every, Some(1));
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_impact_requires_platform() {
        assert!(Cli::try_parse_from(["floodlabel", "impact", "posts.csv"]).is_err());
    }

    #[test]
    fn test_flags_override_model() {
        let cli = parse(&[
            "floodlabel",
            "check",
            "--base-url",
            "http://gpu-box:11434/",
            "--model",
            "llava:13b",
        ]);
        let Commands::Check { endpoint } = cli.command else {
            panic!("expected check");
        };
        let config = endpoint.vlm_config("unused");
        assert_eq!(config.endpoint, "http://gpu-box:11434");
        assert_eq!(config.model, "llava:13b");
    }
}
