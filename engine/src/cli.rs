//! CLI interface for Switchboard
//!
//! Defines the commands and global flags of the `switchboard` binary using
//! clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Switchboard dialogue router
///
/// Routes each user utterance to every configured dialogue workspace at once,
/// keeps the most confident answer and remembers the user's context between
/// turns.
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the converse HTTP API
    Serve {
        /// Override the configured listen address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Run a single turn and print the response
    Ask {
        /// The utterance to send
        text: String,

        /// Lookup view used to find the user (default: by_id)
        #[arg(long)]
        filter: Option<String>,

        /// Lookup key for the view
        #[arg(long)]
        value: Option<String>,

        /// Extra context as a JSON object
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Validate configuration and report workspace readiness
    Check,
}
