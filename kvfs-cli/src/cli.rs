//! Argument definitions for the demo binary.
//!
//! Grounded on the teacher's `presentation/cli.rs`: a `clap`-derived root
//! struct holding global flags, with one subcommand per operation.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kvfs", about = "A chunked file store over an in-process KV substrate")]
pub struct Cli {
    /// Throughput cap, in chunks per second, applied to saves/reads/deletes.
    #[arg(long, global = true)]
    pub rate: Option<u64>,

    /// Per-client concurrency cap across saves, deletes, and open reads.
    #[arg(long, global = true)]
    pub max_concurrent: Option<u64>,

    /// Identity used for concurrency accounting.
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Save a local file (or literal text) under a store path.
    Save {
        /// Slash-separated store path, e.g. "docs/a.txt".
        path: String,
        /// Read content from this local file instead of --text.
        #[arg(long, conflicts_with = "text")]
        file: Option<std::path::PathBuf>,
        /// Literal text content.
        #[arg(long)]
        text: Option<String>,
        /// Reject the save once the cumulative size exceeds this many bytes.
        #[arg(long)]
        max_size: Option<u64>,
        /// Only accept these file extensions (repeatable).
        #[arg(long = "ext")]
        allowed_extensions: Vec<String>,
    },
    /// Read a stored path to stdout, or to --out if given.
    Read {
        path: String,
        #[arg(long)]
        out: Option<std::path::PathBuf>,
    },
    /// List stored paths under a directory prefix.
    Ls {
        path: String,
        #[arg(long)]
        paginate: bool,
    },
    /// Delete a stored path.
    Rm { path: String },
    /// Delete every stored path under a directory prefix.
    RmDir { path: String },
    /// Print a stored path's metadata as JSON.
    GetMeta { path: String },
    /// Replace a stored path's metadata with a JSON value.
    SetMeta { path: String, json: String },
}
