//! Partition Worker Pool (C6): a strictly serial pre-load phase (the
//! payload source is a single-cursor stream) followed by a parallel
//! phase where each partition is applied independently on a `rayon`
//! scoped thread pool, mirroring the teacher crate's blocking,
//! OS-thread concurrency model.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::error::{CoreError, InputError};
use crate::extract;
use crate::manifest::{self, DeltaArchiveManifest, InstallOperation, PartitionUpdate};
use crate::progress::ProgressReporter;

pub struct PreloadedOperation {
    pub raw: InstallOperation,
    pub data: Vec<u8>,
}

pub struct PreloadedPartition {
    pub partition: PartitionUpdate,
    pub operations: Vec<PreloadedOperation>,
}

pub struct ExtractConfig {
    pub out_dir: PathBuf,
    pub diff_mode: bool,
    pub old_dir: PathBuf,
    pub workers: usize,
}

pub struct PartitionFailure {
    pub partition_name: String,
    pub error: anyhow::Error,
}

/// Reads every selected operation's data slice into memory and returns
/// the payload source for the caller to drop. `selected` of `None` means
/// "every partition"; `Some(names)` restricts to those names (an empty
/// list behaves the same as `None`, matching the `--partitions` flag with
/// no argument). A requested name with no matching partition in the
/// manifest is reported through `reporter.warn` and otherwise skipped;
/// it never aborts the run (matching the original tool's
/// `"Partition %s not found in image"` behaviour).
pub fn preload(
    source: &mut (impl Read + Seek),
    manifest: &DeltaArchiveManifest,
    data_offset: u64,
    selected: Option<&[&str]>,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<PreloadedPartition>> {
    if let Some(names) = selected {
        for name in names {
            if !manifest.partitions.iter().any(|p| p.partition_name == *name) {
                reporter.warn(&format!("partition {name} not found in image"));
            }
        }
    }

    let mut out = Vec::new();
    for partition in &manifest.partitions {
        if let Some(names) = selected {
            if !names.is_empty() && !names.contains(&partition.partition_name.as_str()) {
                continue;
            }
        }

        let mut operations = Vec::with_capacity(partition.operations.len());
        for op in &partition.operations {
            let data = match (op.data_offset, op.data_length) {
                (Some(offset), Some(len)) => {
                    source
                        .seek(SeekFrom::Start(data_offset + offset))
                        .with_context(|| {
                            format!("seeking to operation data for partition {}", partition.partition_name)
                        })?;
                    let mut buf = vec![0u8; len as usize];
                    source.read_exact(&mut buf).with_context(|| {
                        format!(
                            "reading {} bytes of operation data for partition {}",
                            len, partition.partition_name
                        )
                    })?;
                    buf
                }
                _ => Vec::new(),
            };
            operations.push(PreloadedOperation { raw: op.clone(), data });
        }
        out.push(PreloadedPartition { partition: partition.clone(), operations });
    }
    Ok(out)
}

fn open_source_image(config: &ExtractConfig, partition_name: &str) -> Result<Option<File>, CoreError> {
    if !config.diff_mode {
        return Ok(None);
    }
    let path = config.old_dir.join(format!("{partition_name}.img"));
    let file = File::open(&path)
        .map_err(|_| CoreError::Input(InputError::MissingSourceImage(partition_name.to_string(), path)))?;
    Ok(Some(file))
}

fn extract_partition(
    manifest: &DeltaArchiveManifest,
    config: &ExtractConfig,
    partition: &PreloadedPartition,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let name = &partition.partition.partition_name;
    log::info!("processing partition: {name}");

    let mut src = open_source_image(config, name)?;
    let mut dst = File::create(config.out_dir.join(format!("{name}.img")))
        .with_context(|| format!("creating output image for partition {name}"))?;

    let block_size = manifest::block_size(manifest);
    let progress = reporter.start_partition(name, partition.operations.len() as u64);

    for (i, op) in partition.operations.iter().enumerate() {
        extract::apply_operation(&op.raw, block_size, config.diff_mode, &op.data, src.as_mut(), &mut dst)
            .with_context(|| format!("applying operation #{i} for partition {name}"))?;
        progress.inc();
    }

    progress.finish();
    Ok(())
}

/// Runs the parallel phase. Returns the list of partitions that failed;
/// an empty list means every partition extracted successfully.
pub fn run(
    manifest: &DeltaArchiveManifest,
    config: &ExtractConfig,
    partitions: Vec<PreloadedPartition>,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<PartitionFailure>> {
    fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("creating output directory {}", config.out_dir.display()))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
        .context("building worker thread pool")?;

    let failures: Mutex<Vec<PartitionFailure>> = Mutex::new(Vec::new());

    pool.scope(|scope| {
        for partition in &partitions {
            scope.spawn(|_| {
                if let Err(error) = extract_partition(manifest, config, partition, reporter) {
                    failures.lock().unwrap().push(PartitionFailure {
                        partition_name: partition.partition.partition_name.clone(),
                        error,
                    });
                }
            });
        }
    });

    Ok(failures.into_inner().unwrap())
}

pub fn default_workers() -> usize {
    std::env::var("OTA_EXTRACTOR_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or_else(num_cpus::get)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use crate::progress::RecordingReporter;

    use super::*;

    fn manifest_with_partition(name: &str) -> DeltaArchiveManifest {
        let mut manifest = DeltaArchiveManifest::default();
        manifest.block_size = Some(4);
        let mut partition = PartitionUpdate::default();
        partition.partition_name = name.to_string();
        manifest.partitions.push(partition);
        manifest
    }

    #[test]
    fn unknown_requested_partition_name_is_warned_about_and_skipped() {
        let manifest = manifest_with_partition("boot");
        let mut source = Cursor::new(Vec::new());

        let warnings = Mutex::new(Vec::new());
        let reporter = RecordingReporter::new(&warnings);
        let preloaded = preload(
            &mut source,
            &manifest,
            0,
            Some(&["boot", "nonexistent"]),
            &reporter,
        )
        .expect("pre-load should succeed");

        assert_eq!(preloaded.len(), 1);
        assert_eq!(preloaded[0].partition.partition_name, "boot");

        let recorded = warnings.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains("nonexistent"), "unexpected warning: {}", recorded[0]);
    }

    #[test]
    fn matching_selection_emits_no_warnings() {
        let manifest = manifest_with_partition("boot");
        let mut source = Cursor::new(Vec::new());

        let warnings = Mutex::new(Vec::new());
        let reporter = RecordingReporter::new(&warnings);
        let preloaded = preload(&mut source, &manifest, 0, Some(&["boot"]), &reporter)
            .expect("pre-load should succeed");

        assert_eq!(preloaded.len(), 1);
        assert!(warnings.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_selection_list_means_every_partition_and_warns_about_nothing() {
        let manifest = manifest_with_partition("boot");
        let mut source = Cursor::new(Vec::new());

        let warnings = Mutex::new(Vec::new());
        let reporter = RecordingReporter::new(&warnings);
        let preloaded = preload(&mut source, &manifest, 0, Some(&[]), &reporter)
            .expect("pre-load should succeed");

        assert_eq!(preloaded.len(), 1);
        assert!(warnings.lock().unwrap().is_empty());
    }
}
