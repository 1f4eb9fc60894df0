use std::io;

use thiserror::Error;

/// Transport-layer failures from the HTTP range source (C1).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HEAD request failed: {0}")]
    Head(String),
    #[error("server does not advertise Accept-Ranges: bytes")]
    RangesUnsupported,
    #[error("server did not report a usable Content-Length")]
    UnknownSize,
    #[error("GET request failed: {0}")]
    Get(String),
    #[error("server refused range request (expected status 206, got {0})")]
    PartialContentRefused(u16),
    #[error("read past end of remote resource (position {pos}, size {size})")]
    EndOfFile { pos: u64, size: u64 },
}

/// Failures while parsing the payload container framing (C2/C3).
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("not a valid payload: bad magic bytes")]
    BadMagic,
    #[error("unsupported payload file format version {0} (only version 2 is supported)")]
    UnsupportedVersion(u64),
    #[error("payload is truncated: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },
    #[error("failed to decode manifest: {0}")]
    ManifestDecode(#[from] prost::DecodeError),
    #[error("could not find End Of Central Directory record in zip archive")]
    NoEocd,
    #[error("zip archive does not contain an entry named {0:?}")]
    MissingEntry(String),
    #[error("zip entry {0:?} is compressed (method {1}); only stored entries are supported")]
    CompressedPayloadEntry(String, u16),
}

/// Failures applying a single install operation (C5).
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("unsupported operation type {0}")]
    Unsupported(String),
    #[error("operation type {0} is only valid for differential OTAs (pass --diff)")]
    DifferentialOnly(&'static str),
    #[error("bsdiff patch application failed: {0}")]
    Bsdiff(String),
}

/// Malformed or out-of-range user/manifest input (not an I/O or transport failure).
#[derive(Error, Debug)]
pub enum InputError {
    #[error("seek to {requested} is out of range (size is {size})")]
    InvalidSeek { requested: i64, size: u64 },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("source image for partition {0:?} not found (expected at {1:?}); required for --diff")]
    MissingSourceImage(String, std::path::PathBuf),
    #[error("arithmetic overflow computing extent offset (start_block={start_block}, num_blocks={num_blocks}, block_size={block_size})")]
    ExtentOverflow {
        start_block: u64,
        num_blocks: u64,
        block_size: u64,
    },
}

/// Top-level error taxonomy for the extraction core (see SPEC_FULL.md §7/§4.10).
///
/// `main` downcasts the outer `anyhow::Error` to this type to select a
/// process exit code; every other error path (generic local I/O, JSON
/// serialization, etc.) falls through to a generic non-zero exit.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Process exit code mandated by SPEC_FULL.md §6, truncated to `u8` the
    /// way a negative `std::process::exit` code would be on POSIX.
    pub fn exit_code(&self) -> Option<u8> {
        match self {
            CoreError::Operation(OperationError::Unsupported(_)) => Some((-1i32) as u8),
            CoreError::Operation(OperationError::DifferentialOnly("SOURCE_COPY")) => {
                Some((-2i32) as u8)
            }
            CoreError::Operation(OperationError::DifferentialOnly("SOURCE_BSDIFF")) => {
                Some((-3i32) as u8)
            }
            _ => None,
        }
    }
}
