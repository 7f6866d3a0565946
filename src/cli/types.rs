//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ephemeral-cluster")]
#[command(about = "Run throwaway search clusters for tests and local development", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Extra configuration file, merged over the project configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a cluster and keep it running until Ctrl-C
    Start(StartArgs),

    /// Classify server log lines from a file or stdin
    Classify(ClassifyArgs),

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Number of nodes
    #[arg(short, long)]
    pub nodes: Option<u16>,

    /// HTTP port of the first node
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds to wait for every node to start
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Installed server home
    #[arg(long)]
    pub home: Option<PathBuf>,

    /// Cluster name
    #[arg(long)]
    pub name: Option<String>,

    /// Relay all node output, also after the cluster started
    #[arg(long)]
    pub relay: bool,

    /// Keep the cluster's data directories after shutdown
    #[arg(long)]
    pub keep_data: bool,
}

#[derive(Args, Debug, Default)]
pub struct ClassifyArgs {
    /// Log file to read; stdin when omitted
    pub file: Option<PathBuf>,

    /// Print every classified line, not just the summary
    #[arg(short, long)]
    pub verbose: bool,
}
