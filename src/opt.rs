use clap::Parser;
use std::path::PathBuf;

use crate::config::DEFAULT_INCLUDE_FILE;

/// Submit an assignment directory to Canvas
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Opts {
    /// The assignment directory. Defaults to the current folder.
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Name of the include file inside the assignment directory
    #[arg(long, short, default_value = DEFAULT_INCLUDE_FILE)]
    pub include_file: String,

    /// Only resolve and print the files that would be submitted
    #[arg(long)]
    pub dry_run: bool,
}
