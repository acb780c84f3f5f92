// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// An interactive terminal coding agent.
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about)]
pub struct Cli {
    /// Path to the config file (default: ~/.config/tandem/config.yaml).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Run a single prompt headlessly and exit instead of starting the REPL.
    #[arg(long, short = 'p')]
    pub prompt: Option<String>,

    /// Resume a previous session by id.
    #[arg(long, short = 'r')]
    pub resume: Option<String>,

    /// Working directory for the agent (default: current directory).
    #[arg(long, short = 'C')]
    pub workdir: Option<PathBuf>,

    /// Log to stderr (RUST_LOG controls the filter).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the resolved configuration and exit.
    ShowConfig,
    /// List persisted sessions.
    Sessions,
}
