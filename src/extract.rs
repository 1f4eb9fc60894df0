//! Applies a single `InstallOperation` to an output image, optionally
//! reading from a source image, through the `ExtentStream` scatter/gather
//! abstraction below.

pub mod bspatch;
pub mod extent;

use std::io::{self, Cursor, Read, Seek, Write};

use base64::Engine;
use bzip2::read::BzDecoder;
use cast::{i64, u64};
use xz2::read::XzDecoder;

use crate::error::{CoreError, InputError, OperationError};
use crate::manifest::{operation_type_name, InstallOperation, OperationType};

use self::extent::{convert_extents, ExtentStream};

/// Resolves a `SeekFrom::{Current,End}` offset against the extent
/// stream's own notion of position without risking signed overflow.
pub fn calculate_rel(start: u64, pos: u64, offset: i64) -> Result<u64, i64> {
    let abs_pos = i64(pos).unwrap() + offset;
    if let Ok(abs_pos) = u64(abs_pos) {
        if abs_pos >= start {
            return Ok(abs_pos);
        }
    }
    Err(abs_pos)
}

fn copy_padded(src: &mut impl Read, dst: &mut impl Write, len: u64) -> io::Result<()> {
    let written = io::copy(src, dst)?;
    io::copy(&mut io::repeat(0).take(len.saturating_sub(written)), dst)?;
    Ok(())
}

fn to_extents(raw: &[crate::manifest::RawExtent], block_size: u32) -> Result<Vec<extent::Extent>, CoreError> {
    convert_extents(raw, block_size as usize)
        .map_err(|e| CoreError::Input(InputError::InvalidArgument(e.to_string())))
}

/// Applies `op` to `dst`, optionally reading from `src` for the
/// differential operation types. `data` must already be the operation's
/// preloaded `data_offset..data_offset+data_length` slice from the
/// payload's data region (see `crate::pool`'s pre-load phase).
pub fn apply_operation<S: Read + Seek, D: Write + Seek>(
    op: &InstallOperation,
    block_size: u32,
    diff_mode: bool,
    data: &[u8],
    src: Option<&mut S>,
    dst: &mut D,
) -> Result<(), CoreError> {
    let op_type = OperationType::try_from(op.r#type)
        .map_err(|_| CoreError::Operation(OperationError::Unsupported(operation_type_name(op))))?;

    if let Some(hash) = op.data_sha256_hash.as_deref() {
        log::trace!(
            "operation data sha256 (not verified): {}",
            base64::prelude::BASE64_STANDARD.encode(hash)
        );
    }

    let mut src_stream = src
        .map(|src| -> Result<_, CoreError> {
            let extents = to_extents(&op.src_extents, block_size)?;
            Ok(ExtentStream::new(src, extents)?)
        })
        .transpose()?
        .flatten();

    let dst_extents = to_extents(&op.dst_extents, block_size)?;
    let mut dst_stream = ExtentStream::new(dst, dst_extents)?.ok_or_else(|| {
        CoreError::Input(InputError::InvalidArgument("operation has no dst_extents".to_string()))
    })?;
    let dst_len = dst_stream.len() as u64;

    match op_type {
        OperationType::Replace | OperationType::ReplaceBz | OperationType::ReplaceXz => {
            let mut decoded: Box<dyn Read> = match op_type {
                OperationType::Replace => Box::new(Cursor::new(data)),
                OperationType::ReplaceBz => Box::new(BzDecoder::new(Cursor::new(data))),
                OperationType::ReplaceXz => Box::new(XzDecoder::new(Cursor::new(data))),
                _ => unreachable!(),
            };
            copy_padded(&mut decoded, &mut dst_stream, dst_len)?;
        }
        OperationType::Zero => {
            copy_padded(&mut io::empty(), &mut dst_stream, dst_len)?;
        }
        OperationType::SourceCopy => {
            if !diff_mode {
                return Err(CoreError::Operation(OperationError::DifferentialOnly("SOURCE_COPY")));
            }
            let mut src_stream = src_stream.take().ok_or_else(|| {
                CoreError::Input(InputError::InvalidArgument(
                    "SOURCE_COPY operation requires a source image".to_string(),
                ))
            })?;
            copy_padded(&mut src_stream, &mut dst_stream, dst_len)?;
        }
        OperationType::SourceBsdiff | OperationType::BrotliBsdiff => {
            if !diff_mode {
                return Err(CoreError::Operation(OperationError::DifferentialOnly("SOURCE_BSDIFF")));
            }
            let mut src_stream = src_stream.take().ok_or_else(|| {
                CoreError::Input(InputError::InvalidArgument(
                    "SOURCE_BSDIFF operation requires a source image".to_string(),
                ))
            })?;
            let mut old_data = Vec::new();
            src_stream.read_to_end(&mut old_data)?;
            let new_data = bspatch::bspatch(&old_data, data)
                .map_err(|e| CoreError::Operation(OperationError::Bsdiff(e.to_string())))?;
            copy_padded(&mut Cursor::new(new_data), &mut dst_stream, dst_len)?;
        }
        _other => {
            return Err(CoreError::Operation(OperationError::Unsupported(operation_type_name(op))));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DeltaArchiveManifest, PartitionUpdate, RawExtent};
    use std::io::Cursor as IoCursor;

    fn extent(start: u64, blocks: u64) -> RawExtent {
        RawExtent { start_block: Some(start), num_blocks: Some(blocks) }
    }

    fn op(r#type: i32, dst: Vec<RawExtent>, src: Vec<RawExtent>) -> InstallOperation {
        InstallOperation {
            r#type,
            data_offset: None,
            data_length: None,
            dst_extents: dst,
            src_extents: src,
            data_sha256_hash: None,
            src_sha256_hash: None,
            ..Default::default()
        }
    }

    #[test]
    fn replace_writes_data_and_zero_pads() {
        let data = b"hello";
        let operation = op(OperationType::Replace as i32, vec![extent(0, 2)], vec![]);
        let mut dst = IoCursor::new(vec![0xffu8; 8]);
        apply_operation::<std::fs::File, _>(&operation, 4, false, data, None, &mut dst).unwrap();
        assert_eq!(dst.into_inner(), b"hello\0\0\0");
    }

    #[test]
    fn zero_operation_writes_zero_bytes() {
        let operation = op(OperationType::Zero as i32, vec![extent(0, 1)], vec![]);
        let mut dst = IoCursor::new(vec![0xffu8; 4]);
        apply_operation::<std::fs::File, _>(&operation, 4, false, &[], None, &mut dst).unwrap();
        assert_eq!(dst.into_inner(), vec![0u8; 4]);
    }

    #[test]
    fn source_copy_requires_diff_mode() {
        let operation = op(OperationType::SourceCopy as i32, vec![extent(0, 1)], vec![extent(0, 1)]);
        let mut dst = IoCursor::new(vec![0u8; 4]);
        let mut src = IoCursor::new(vec![1u8; 4]);
        let err = apply_operation(&operation, 4, false, &[], Some(&mut src), &mut dst).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Operation(OperationError::DifferentialOnly("SOURCE_COPY"))
        ));
    }

    #[test]
    fn source_copy_copies_from_source() {
        let operation = op(OperationType::SourceCopy as i32, vec![extent(0, 1)], vec![extent(0, 1)]);
        let mut dst = IoCursor::new(vec![0u8; 4]);
        let mut src = IoCursor::new(vec![9u8; 4]);
        apply_operation(&operation, 4, true, &[], Some(&mut src), &mut dst).unwrap();
        assert_eq!(dst.into_inner(), vec![9u8; 4]);
    }

    #[test]
    fn unsupported_operation_type_is_a_named_error() {
        let operation = op(OperationType::Discard as i32, vec![extent(0, 1)], vec![]);
        let mut dst = IoCursor::new(vec![0u8; 4]);
        let err = apply_operation::<std::fs::File, _>(&operation, 4, false, &[], None, &mut dst)
            .unwrap_err();
        assert!(matches!(err, CoreError::Operation(OperationError::Unsupported(_))));
    }

    #[test]
    fn partition_size_from_manifest_sums_dst_extents() {
        let mut manifest = DeltaArchiveManifest::default();
        manifest.block_size = Some(4);
        let mut partition = PartitionUpdate::default();
        partition.partition_name = "boot".to_string();
        partition.operations.push(op(OperationType::Zero as i32, vec![extent(0, 2)], vec![]));
        partition.operations.push(op(OperationType::Zero as i32, vec![extent(2, 3)], vec![]));
        manifest.partitions.push(partition.clone());
        assert_eq!(crate::manifest::partition_size_bytes(&manifest, &partition), 20);
    }
}
