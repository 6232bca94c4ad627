//! Command line interface for the `fragcast` binary.
//!
//! Shared with `build.rs`, which renders the man page from these
//! definitions, so this module depends on nothing but `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command line arguments for the `fragcast` binary.
#[derive(Debug, Parser)]
#[command(
    name = "fragcast",
    version,
    about = "Fragment, broadcast and reassemble payloads over an at-least-once bus"
)]
pub struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands understood by the binary.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Broadcast a file through an in-process bus and write the reassembled
    /// copy.
    Relay {
        /// File to fragment and broadcast.
        #[arg(short, long)]
        input: PathBuf,
        /// Destination for the reassembled bytes.
        #[arg(short, long)]
        output: PathBuf,
        /// Seconds to wait for reassembly before giving up.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}
