// src/cli/mod.rs
//! CLI definitions for refstash
//!
//! Argument parsing only; the handlers live in the `commands` module.
//! Settings not given on the command line come from the config file.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "refstash")]
#[command(author = "Refstash Contributors")]
#[command(version)]
#[command(about = "Convert repository master images to lossless JPEG 2000 and archive them in S3", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/refstash/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert one document and stash it in S3
    Stash {
        /// Repository document path
        path: String,

        /// Bucket, optionally with a key prefix ("bucket/prefix")
        #[arg(short, long)]
        bucket: Option<String>,

        /// Replace the object in S3 if it already exists
        #[arg(long)]
        replace: bool,
    },

    /// Convert and stash every document in a collection
    Collection {
        /// Repository path of the collection
        path: String,

        /// Bucket, optionally with a key prefix ("bucket/prefix")
        #[arg(short, long)]
        bucket: Option<String>,

        /// Replace objects in S3 that already exist
        #[arg(long)]
        replace: bool,

        /// Also process the components (children) of each document
        #[arg(long)]
        components: bool,

        /// Documents processed concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Directory for the JSON report
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Directory for the collection log file
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// List collection documents that have no image in S3 yet
    Check {
        /// Repository path of the collection
        path: String,

        /// Bucket, optionally with a key prefix ("bucket/prefix")
        #[arg(short, long)]
        bucket: Option<String>,

        /// Also check the components of each document
        #[arg(long)]
        components: bool,
    },

    /// Download a document's master file without converting it
    Download {
        /// Repository document path
        path: String,

        /// Directory to write the file to (default: current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert a local file to JPEG 2000 without touching S3
    Convert {
        /// Input image
        input: PathBuf,

        /// Output JPEG 2000 file
        output: PathBuf,

        /// Mimetype of the input (detected from its content if omitted)
        #[arg(short, long)]
        mimetype: Option<String>,
    },

    /// Print the summary of a saved report
    Summary {
        /// Report file written by `collection`
        report: PathBuf,
    },

    /// Count objects and bytes in the destination bucket
    BucketStats {
        /// Bucket, optionally with a key prefix ("bucket/prefix")
        #[arg(short, long)]
        bucket: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
