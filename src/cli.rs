//! Command-line interface definitions for webhook-sentry.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Egress proxy for outbound webhook delivery.
///
/// webhook-sentry accepts proxy requests from a trusted internal sender and
/// relays them to third-party endpoints under an egress policy: CIDR
/// deny-list, explicit TLS upgrade, client-certificate presentation,
/// response size caps, and connection deadlines.
#[derive(Parser, Debug)]
#[command(name = "webhook-sentry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to serve).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Subcommands for webhook-sentry.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the merged configuration and print it.
    ///
    /// Loads the full configuration hierarchy, runs validation, and prints
    /// the effective TOML without starting any listeners.
    #[command(name = "check-config")]
    CheckConfig,
}
