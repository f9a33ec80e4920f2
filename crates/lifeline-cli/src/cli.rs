//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Lifeline - retry, circuit breaking and fallback for unreliable model calls
#[derive(Parser, Debug)]
#[command(name = "lifeline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "LIFELINE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "LIFELINE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LIFELINE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format for listings
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect the human handoff queue
    #[command(subcommand)]
    Handoffs(HandoffCommand),

    /// Query and seed the response cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Run a simulated flaky operation through the full layer
    Simulate(SimulateArgs),
}

/// Handoff queue subcommands
#[derive(Subcommand, Debug)]
pub enum HandoffCommand {
    /// List pending requests, most urgent first
    List {
        /// Maximum number of requests to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show one request in full
    Show {
        #[arg(required = true)]
        request_id: String,
    },
}

/// Cache lookup strategy
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Exact,
    Semantic,
    Partial,
    Template,
    /// Every strategy, in cascade order
    All,
}

/// Response cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Look up a prompt
    Lookup {
        #[arg(required = true)]
        prompt: String,

        #[arg(short, long, value_enum, default_value = "all")]
        strategy: Strategy,
    },

    /// Store a response for a prompt
    Put {
        #[arg(required = true)]
        prompt: String,

        #[arg(required = true)]
        response: String,

        /// Model or service that produced the response
        #[arg(short, long, default_value = "manual")]
        source: String,

        /// Template tags (definition, instruction, explanation, calculation, translation)
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Summarize cache contents
    Stats {
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration and print the effective settings
    Check,
}

#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    /// Operation id used for the breaker and retry profile
    #[arg(short, long, default_value = "simulated")]
    pub operation: String,

    #[arg(short, long, default_value = "hello")]
    pub prompt: String,

    /// Probability that an attempt fails (0.0 - 1.0)
    #[arg(long, default_value_t = 0.5)]
    pub failure_rate: f64,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 10)]
    pub requests: u32,

    /// Mark requests urgent
    #[arg(long)]
    pub urgent: bool,

    /// Send requests as a premium user
    #[arg(long)]
    pub premium: bool,
}
