//! Command-line interface for the `sage` binary, defined with `clap`.
//!
//! `Cli` holds the parsed arguments; `Commands` enumerates the available
//! subcommands. The subcommands exercise the library end to end: index a
//! text file, ask a question against it, inspect or remove its index.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Path to the YAML configuration file. Defaults to
    /// `config.yaml` in the per-platform config directory.
    #[arg(long, global = true, env = "DOC_SAGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None)]
pub enum Commands {
    /// Write a default configuration file to the config directory.
    Init,

    /// Chunk, embed, and index a plain-text document.
    #[clap(name = "index", alias = "x")]
    Index {
        /// Path to the text file to index.
        file: PathBuf,

        /// Document id to index under; derived from the file name if omitted.
        #[arg(name = "id", short = 'i', long)]
        id: Option<String>,

        /// Display name stored with each chunk; the file name if omitted.
        #[arg(name = "name", short = 'n', long)]
        name: Option<String>,
    },

    /// Ask a question against an indexed document.
    #[clap(name = "ask", alias = "a")]
    Ask {
        /// Document id to query.
        document_id: String,

        /// The question to answer from the document.
        question: String,

        /// Print the full result (sources, scores) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a document's index from disk and cache.
    #[clap(name = "forget", alias = "rm")]
    Forget {
        /// Document id whose index should be removed.
        document_id: String,
    },

    /// Show index statistics for a document.
    Stats {
        /// Document id to inspect.
        document_id: String,
    },

    /// List document ids with an index on disk.
    List,
}
