//! CLI & Configuration (C9): flat `clap`-derived flags (no subcommands,
//! matching SPEC_FULL.md §6), with two environment-variable overrides for
//! parity with the teacher pack's configuration layering.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The payload.bin file, a .zip OTA package containing it, or an
    /// http(s):// URL to either.
    #[arg()]
    pub payloadfile: String,

    /// Output directory; created if missing.
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Apply differential (incremental) operations against a source image.
    #[arg(long)]
    pub diff: bool,

    /// Source-image directory for differential mode.
    #[arg(long, default_value = "old")]
    pub old: PathBuf,

    /// Comma-separated partition names to extract; defaults to all.
    #[arg(long, value_delimiter = ',')]
    pub partitions: Option<Vec<String>>,

    /// Worker pool size; defaults to the host CPU count, overridable by
    /// OTA_EXTRACTOR_WORKERS.
    #[arg(long)]
    pub workers: Option<usize>,

    /// List partitions and exit after emitting partitions_info.json.
    #[arg(long)]
    pub list: bool,

    /// Extract archive metadata (META-INF/com/android/metadata) and exit.
    #[arg(long)]
    pub metadata: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn is_url(&self) -> bool {
        self.payloadfile.starts_with("http://") || self.payloadfile.starts_with("https://")
    }

    pub fn partition_filter(&self) -> Option<Vec<&str>> {
        self.partitions.as_ref().map(|names| names.iter().map(String::as_str).collect())
    }

    pub fn resolve_workers(&self) -> usize {
        self.workers.unwrap_or_else(crate::pool::default_workers)
    }

    pub fn resolve_user_agent(&self) -> Option<String> {
        std::env::var("OTA_EXTRACTOR_USER_AGENT").ok()
    }

    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}
