//! Parses the 24-byte `CrAU` header, the manifest blob, and the (opaque)
//! metadata signature that precede the payload's data region.
//!
//! Read by hand rather than through a binary-parsing derive crate, since
//! the archive-fallback behaviour in `source::zip` needs to distinguish
//! "bad magic" from every other failure mode before deciding whether to
//! retry as a ZIP, and a hand-rolled reader makes that one check a single
//! early `Result` rather than a library error match.

use std::io::{Read, Seek, SeekFrom};

use prost::Message;

use crate::error::FramingError;
use crate::manifest::DeltaArchiveManifest;

const MAGIC: &[u8; 4] = b"CrAU";
const SUPPORTED_VERSION: u64 = 2;

pub struct PayloadFraming {
    pub data_offset: u64,
    pub manifest_bytes: Vec<u8>,
    pub manifest: DeltaArchiveManifest,
    pub signature: Vec<u8>,
}

fn stream_len(source: &mut (impl Read + Seek)) -> std::io::Result<u64> {
    let pos = source.stream_position()?;
    let len = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(pos))?;
    Ok(len)
}

fn read_exact_or_short(
    source: &mut impl Read,
    buf: &mut [u8],
    total_len: u64,
) -> Result<(), FramingError> {
    source.read_exact(buf).map_err(|_| FramingError::ShortRead {
        expected: buf.len() as u64,
        actual: total_len,
    })
}

pub fn parse(source: &mut (impl Read + Seek)) -> Result<PayloadFraming, FramingError> {
    source.seek(SeekFrom::Start(0)).map_err(|_| FramingError::ShortRead { expected: 24, actual: 0 })?;
    let total_len = stream_len(source).unwrap_or(0);

    let mut magic = [0u8; 4];
    read_exact_or_short(source, &mut magic, total_len)?;
    if &magic != MAGIC {
        return Err(FramingError::BadMagic);
    }

    let mut version_bytes = [0u8; 8];
    read_exact_or_short(source, &mut version_bytes, total_len)?;
    let file_format_version = u64::from_be_bytes(version_bytes);
    if file_format_version != SUPPORTED_VERSION {
        return Err(FramingError::UnsupportedVersion(file_format_version));
    }

    let mut manifest_size_bytes = [0u8; 8];
    read_exact_or_short(source, &mut manifest_size_bytes, total_len)?;
    let manifest_size = u64::from_be_bytes(manifest_size_bytes);

    let mut sig_size_bytes = [0u8; 4];
    read_exact_or_short(source, &mut sig_size_bytes, total_len)?;
    let metadata_signature_size = u32::from_be_bytes(sig_size_bytes);

    let mut manifest_bytes = vec![0u8; manifest_size as usize];
    read_exact_or_short(source, &mut manifest_bytes, total_len)?;

    let mut signature = vec![0u8; metadata_signature_size as usize];
    read_exact_or_short(source, &mut signature, total_len)?;

    let manifest = DeltaArchiveManifest::decode(&*manifest_bytes)?;
    let data_offset = 24 + manifest_size + u64::from(metadata_signature_size);

    Ok(PayloadFraming { data_offset, manifest_bytes, manifest, signature })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_header(version: u64, manifest: &[u8], signature: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&version.to_be_bytes());
        buf.extend_from_slice(&(manifest.len() as u64).to_be_bytes());
        buf.extend_from_slice(&(signature.len() as u32).to_be_bytes());
        buf.extend_from_slice(manifest);
        buf.extend_from_slice(signature);
        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = Cursor::new(b"XXXXsomegarbage".to_vec());
        assert!(matches!(parse(&mut data), Err(FramingError::BadMagic)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let bytes = encode_header(1, &[], &[]);
        let mut data = Cursor::new(bytes);
        assert!(matches!(parse(&mut data), Err(FramingError::UnsupportedVersion(1))));
    }

    #[test]
    fn parses_empty_manifest_and_computes_data_offset() {
        let manifest = DeltaArchiveManifest::default();
        let manifest_bytes = manifest.encode_to_vec();
        let signature = vec![1, 2, 3, 4];
        let bytes = encode_header(2, &manifest_bytes, &signature);
        let mut data = Cursor::new(bytes);
        let framing = parse(&mut data).unwrap();
        assert_eq!(framing.data_offset, 24 + manifest_bytes.len() as u64 + 4);
        assert_eq!(framing.signature, signature);
    }

    #[test]
    fn short_manifest_is_an_error() {
        let mut bytes = encode_header(2, &[0u8; 100], &[]);
        bytes.truncate(bytes.len() - 50);
        let mut data = Cursor::new(bytes);
        assert!(matches!(parse(&mut data), Err(FramingError::ShortRead { .. })));
    }
}
