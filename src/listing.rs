//! Partition inventory (JSON + a compact human summary) and archive
//! metadata extraction.

use std::fs;
use std::io::{Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::manifest::{partition_size_bytes, DeltaArchiveManifest, HasUpdateType};
use crate::source;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PartitionInfo {
    pub partition_name: String,
    pub size_in_blocks: u64,
    pub size_in_bytes: u64,
    pub size_readable: String,
}

/// Binary-unit human size, matching the original tool's formatting: the
/// smallest bucket is KB (never plain bytes), one decimal place.
pub fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.1}GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes / MB)
    } else {
        format!("{:.1}KB", bytes / KB)
    }
}

pub fn partition_inventory(manifest: &DeltaArchiveManifest) -> Vec<PartitionInfo> {
    let block_size = u64::from(crate::manifest::block_size(manifest));
    manifest
        .partitions
        .iter()
        .map(|partition| {
            let size_in_blocks: u64 = partition
                .operations
                .iter()
                .flat_map(|op| op.dst_extents.iter())
                .map(|ext| ext.num_blocks.unwrap_or(0))
                .sum();
            let size_in_bytes = partition_size_bytes(manifest, partition);
            debug_assert_eq!(size_in_bytes, size_in_blocks * block_size);
            if let Some(reported) = partition.new_partition_info.as_ref().and_then(|i| i.size) {
                if reported != size_in_bytes {
                    log::warn!(
                        "partition {}: new_partition_info.size ({reported}) disagrees with the size computed from dst_extents ({size_in_bytes}); using the latter",
                        partition.partition_name
                    );
                }
            }
            PartitionInfo {
                partition_name: partition.partition_name.clone(),
                size_in_blocks,
                size_in_bytes,
                size_readable: human_size(size_in_bytes),
            }
        })
        .collect()
}

/// Writes `<out>/partitions_info.json` and prints the compact
/// `name(size_readable), ...` summary line to standard output.
pub fn write_partition_listing(manifest: &DeltaArchiveManifest, out_dir: &Path) -> Result<Vec<PartitionInfo>> {
    println!(
        "update_type: {:?}, block_size: {}, minor_version: {}, security_patch_level: {}",
        manifest.get_update_type(),
        crate::manifest::block_size(manifest),
        manifest.minor_version.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string()),
        manifest.security_patch_level.clone().unwrap_or_else(|| "unknown".to_string()),
    );

    let info = partition_inventory(manifest);

    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;
    let output_file = out_dir.join("partitions_info.json");
    let json = serde_json::to_string_pretty(&info)?;
    fs::write(&output_file, json)
        .with_context(|| format!("failed to write {}", output_file.display()))?;

    let readable: Vec<String> =
        info.iter().map(|p| format!("{}({})", p.partition_name, p.size_readable)).collect();
    println!("{}", readable.join(", "));
    println!("\nPartition information saved to {}", output_file.display());

    Ok(info)
}

/// Extracts `META-INF/com/android/metadata` from the archive `source`,
/// writes it to `<out>/metadata`, and echoes it to standard output.
pub fn extract_metadata(source: impl Read + Seek, out_dir: &Path) -> Result<String> {
    let text = source::zip::read_text_entry(source, "META-INF/com/android/metadata")
        .context("failed to extract META-INF/com/android/metadata")?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;
    let output_file = out_dir.join("metadata");
    fs::write(&output_file, &text)
        .with_context(|| format!("failed to write {}", output_file.display()))?;

    println!("{text}");
    println!("\nMetadata saved to {}", output_file.display());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_buckets() {
        assert_eq!(human_size(512), "0.5KB");
        assert_eq!(human_size(2 * 1024 * 1024), "2.0MB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.0GB");
    }

    #[test]
    fn partition_inventory_sums_dst_extents() {
        let mut manifest = DeltaArchiveManifest::default();
        manifest.block_size = Some(4096);
        let mut partition = crate::manifest::PartitionUpdate::default();
        partition.partition_name = "system".to_string();
        let mut op = crate::manifest::InstallOperation::default();
        op.r#type = crate::manifest::OperationType::Zero as i32;
        op.dst_extents.push(crate::manifest::RawExtent { start_block: Some(0), num_blocks: Some(10) });
        partition.operations.push(op);
        manifest.partitions.push(partition);

        let info = partition_inventory(&manifest);
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].size_in_blocks, 10);
        assert_eq!(info[0].size_in_bytes, 40960);
    }

    #[test]
    fn mismatched_new_partition_info_size_does_not_change_the_reported_size() {
        let mut manifest = DeltaArchiveManifest::default();
        manifest.block_size = Some(4096);
        let mut partition = crate::manifest::PartitionUpdate::default();
        partition.partition_name = "vendor".to_string();
        let mut op = crate::manifest::InstallOperation::default();
        op.r#type = crate::manifest::OperationType::Zero as i32;
        op.dst_extents.push(crate::manifest::RawExtent { start_block: Some(0), num_blocks: Some(2) });
        partition.operations.push(op);
        partition.new_partition_info =
            Some(crate::manifest::update_metadata::PartitionInfo { size: Some(999), hash: None });
        manifest.partitions.push(partition);

        // dst_extents (2 blocks * 4096) remains the source of truth even though
        // new_partition_info reports a different size.
        let info = partition_inventory(&manifest);
        assert_eq!(info[0].size_in_bytes, 8192);
    }
}
