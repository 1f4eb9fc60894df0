//! Local filesystem byte source. A plain `File` already satisfies
//! `ReadSeek`; this module exists only to give the opener a consistent
//! `open` entry point alongside `source::http`.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};

pub fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open payload file {}", path.display()))
}
