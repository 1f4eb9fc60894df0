//! The structured manifest schema (C4). Generated by `prost` from
//! `proto/update_metadata.proto`; this module adds the small amount of
//! hand-written convenience code the rest of the core relies on.

pub mod update_metadata {
    pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
    include!(concat!(env!("OUT_DIR"), "/chromeos_update_engine.rs"));
}

pub use update_metadata::{
    install_operation::Type as OperationType, DeltaArchiveManifest, Extent as RawExtent,
    InstallOperation, PartitionUpdate,
};

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum UpdateType {
    Unknown,
    Incremental,
    Full,
}

pub trait HasUpdateType {
    fn get_update_type(&self) -> UpdateType;
}

impl HasUpdateType for OperationType {
    fn get_update_type(&self) -> UpdateType {
        use UpdateType::*;
        match self {
            // deprecated
            OperationType::Move => Incremental,
            OperationType::Bsdiff => Incremental,
            // full
            OperationType::Replace => Full,
            OperationType::ReplaceBz => Full,
            OperationType::ReplaceXz => Full,
            OperationType::Zero => Full,
            OperationType::Discard => Full,
            // incremental
            OperationType::SourceCopy => Incremental,
            OperationType::SourceBsdiff => Incremental,
            OperationType::BrotliBsdiff => Incremental,
            OperationType::Puffdiff => Incremental,
            OperationType::Zucchini => Incremental,
            OperationType::Lz4diffBsdiff => Incremental,
            OperationType::Lz4diffPuffdiff => Incremental,
        }
    }
}

impl HasUpdateType for InstallOperation {
    fn get_update_type(&self) -> UpdateType {
        update_metadata::install_operation::Type::try_from(self.r#type)
            .as_ref()
            .map(HasUpdateType::get_update_type)
            .unwrap_or(UpdateType::Unknown)
    }
}

impl HasUpdateType for PartitionUpdate {
    fn get_update_type(&self) -> UpdateType {
        self.operations.iter().map(HasUpdateType::get_update_type).min().unwrap_or(UpdateType::Full)
    }
}

impl HasUpdateType for DeltaArchiveManifest {
    fn get_update_type(&self) -> UpdateType {
        self.partitions.iter().map(HasUpdateType::get_update_type).min().unwrap_or(UpdateType::Full)
    }
}

/// The operation type names the core knows how to apply or to reject by name
/// (rather than as an opaque integer) -- used for clear error messages when
/// a manifest references a recognized-but-unsupported operation.
pub fn operation_type_name(op: &InstallOperation) -> String {
    match OperationType::try_from(op.r#type) {
        Ok(ty) => format!("{ty:?}"),
        Err(_) => format!("<invalid:{}>", op.r#type),
    }
}

/// Block size in effect for this manifest, falling back to the well-known
/// Android default when the field is absent (never observed in practice,
/// but the wire type makes it optional).
pub fn block_size(manifest: &DeltaArchiveManifest) -> u32 {
    manifest.block_size.unwrap_or(update_metadata::DEFAULT_BLOCK_SIZE)
}

/// Size in bytes of a partition, computed from the sum of its operations'
/// destination extents (the source of truth used throughout this crate --
/// see Open Questions in DESIGN.md for why `new_partition_info.size` is not
/// used instead).
pub fn partition_size_bytes(manifest: &DeltaArchiveManifest, partition: &PartitionUpdate) -> u64 {
    let block_size = u64::from(block_size(manifest));
    partition
        .operations
        .iter()
        .flat_map(|op| op.dst_extents.iter())
        .map(|ext| ext.num_blocks.unwrap_or(0) * block_size)
        .sum()
}
