//! Binary-diff patch application for `SOURCE_BSDIFF` / `BROTLI_BSDIFF`
//! operations.
//!
//! The teacher crate bridges to a vendored C++ `bsdiff` library via
//! `cxx`/`autocxx`. That vendored source tree isn't part of this
//! repository, and the retrieval pack's other OTA tool uses the pure-Rust
//! `bsdiff` crate for the same job (see its `src/module/patch.rs`), so this
//! is a straight port of that function.

use std::io::Cursor;

/// Applies `patch_data` (a bsdiff4-format patch) to `old_data`, returning
/// the reconstructed bytes.
pub fn bspatch(old_data: &[u8], patch_data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut new_data = Vec::new();
    let mut patch_cursor = Cursor::new(patch_data);
    bsdiff::patch(old_data, &mut patch_cursor, &mut new_data)?;
    Ok(new_data)
}
