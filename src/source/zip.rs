//! Enough of the ZIP format to locate one named, stored entry and hand
//! back a seekable view of its raw bytes, or to pull a small (possibly
//! compressed) entry fully into memory for the metadata path.
//!
//! Hand-rolled rather than built on the `zip` crate: this only needs a
//! read-only, single-entry lookup, not a general-purpose archive
//! implementation.

use std::io::{self, Read, Seek, SeekFrom};

use flate2::read::DeflateDecoder;

use crate::error::FramingError;

const EOCD_SIGNATURE: [u8; 4] = *b"PK\x05\x06";
const ZIP64_EOCD_LOCATOR_SIGNATURE: [u8; 4] = *b"PK\x06\x07";
const ZIP64_EOCD_SIGNATURE: [u8; 4] = *b"PK\x06\x06";
const CENTRAL_DIR_SIGNATURE: [u8; 4] = *b"PK\x01\x02";
const LOCAL_FILE_SIGNATURE: [u8; 4] = *b"PK\x03\x04";

const EOCD_FIXED_SIZE: u64 = 22;
const MAX_COMMENT_SIZE: u64 = 65535;

#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub compression_method: u16,
    pub local_header_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

struct Eocd {
    central_dir_offset: u64,
    central_dir_size: u64,
}

fn find_eocd(source: &mut (impl Read + Seek)) -> Result<Eocd, FramingError> {
    let file_size = source.seek(SeekFrom::End(0)).map_err(|_| FramingError::NoEocd)?;
    let max_search = MAX_COMMENT_SIZE + EOCD_FIXED_SIZE;
    let search_start = file_size.saturating_sub(max_search.min(file_size));

    let mut buf = vec![0u8; (file_size - search_start) as usize];
    source.seek(SeekFrom::Start(search_start)).map_err(|_| FramingError::NoEocd)?;
    source.read_exact(&mut buf).map_err(|_| FramingError::NoEocd)?;

    let eocd_rel = buf
        .windows(4)
        .rposition(|w| w == EOCD_SIGNATURE)
        .ok_or(FramingError::NoEocd)?;
    let eocd_offset = search_start + eocd_rel as u64;

    let rec = &buf[eocd_rel..];
    let total_entries = u16::from_le_bytes([rec[10], rec[11]]);
    let cd_size_32 = u32::from_le_bytes([rec[12], rec[13], rec[14], rec[15]]);
    let cd_offset_32 = u32::from_le_bytes([rec[16], rec[17], rec[18], rec[19]]);

    let needs_zip64 =
        total_entries == 0xFFFF || cd_size_32 == 0xFFFF_FFFF || cd_offset_32 == 0xFFFF_FFFF;
    if !needs_zip64 {
        return Ok(Eocd {
            central_dir_offset: cd_offset_32 as u64,
            central_dir_size: cd_size_32 as u64,
        });
    }

    // zip64: the locator is a fixed 20 bytes immediately before the EOCD.
    let locator_offset = eocd_offset.checked_sub(20).ok_or(FramingError::NoEocd)?;
    let mut locator = [0u8; 20];
    source.seek(SeekFrom::Start(locator_offset)).map_err(|_| FramingError::NoEocd)?;
    source.read_exact(&mut locator).map_err(|_| FramingError::NoEocd)?;
    if locator[0..4] != ZIP64_EOCD_LOCATOR_SIGNATURE {
        return Err(FramingError::NoEocd);
    }
    let zip64_eocd_offset = u64::from_le_bytes(locator[8..16].try_into().unwrap());

    let mut zip64_eocd = [0u8; 56];
    source.seek(SeekFrom::Start(zip64_eocd_offset)).map_err(|_| FramingError::NoEocd)?;
    source.read_exact(&mut zip64_eocd).map_err(|_| FramingError::NoEocd)?;
    if zip64_eocd[0..4] != ZIP64_EOCD_SIGNATURE {
        return Err(FramingError::NoEocd);
    }
    let central_dir_size = u64::from_le_bytes(zip64_eocd[40..48].try_into().unwrap());
    let central_dir_offset = u64::from_le_bytes(zip64_eocd[48..56].try_into().unwrap());

    Ok(Eocd { central_dir_offset, central_dir_size })
}

fn parse_central_directory(
    source: &mut (impl Read + Seek),
    eocd: &Eocd,
) -> Result<Vec<ZipEntry>, FramingError> {
    source
        .seek(SeekFrom::Start(eocd.central_dir_offset))
        .map_err(|_| FramingError::NoEocd)?;
    let mut cd = vec![0u8; eocd.central_dir_size as usize];
    source.read_exact(&mut cd).map_err(|_| FramingError::NoEocd)?;

    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 46 <= cd.len() {
        if cd[pos..pos + 4] != CENTRAL_DIR_SIGNATURE {
            break;
        }
        let compression_method = u16::from_le_bytes([cd[pos + 10], cd[pos + 11]]);
        let compressed_size = u32::from_le_bytes(cd[pos + 20..pos + 24].try_into().unwrap());
        let uncompressed_size = u32::from_le_bytes(cd[pos + 24..pos + 28].try_into().unwrap());
        let name_len = u16::from_le_bytes([cd[pos + 28], cd[pos + 29]]) as usize;
        let extra_len = u16::from_le_bytes([cd[pos + 30], cd[pos + 31]]) as usize;
        let comment_len = u16::from_le_bytes([cd[pos + 32], cd[pos + 33]]) as usize;
        let local_header_offset =
            u32::from_le_bytes(cd[pos + 42..pos + 46].try_into().unwrap()) as u64;

        let name_start = pos + 46;
        let name_end = name_start + name_len;
        if name_end > cd.len() {
            break;
        }
        let name = String::from_utf8_lossy(&cd[name_start..name_end]).into_owned();

        entries.push(ZipEntry {
            name,
            compression_method,
            local_header_offset,
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
        });

        pos = name_end + extra_len + comment_len;
    }

    Ok(entries)
}

pub fn find_entry(
    source: &mut (impl Read + Seek),
    name: &str,
) -> Result<ZipEntry, FramingError> {
    let eocd = find_eocd(source)?;
    let entries = parse_central_directory(source, &eocd)?;
    entries
        .into_iter()
        .find(|e| e.name == name)
        .ok_or_else(|| FramingError::MissingEntry(name.to_string()))
}

/// Absolute offset of `entry`'s file data, accounting for the local file
/// header's own (possibly different from the central directory's) name and
/// extra-field lengths.
fn data_offset(source: &mut (impl Read + Seek), entry: &ZipEntry) -> io::Result<u64> {
    source.seek(SeekFrom::Start(entry.local_header_offset))?;
    let mut header = [0u8; 30];
    source.read_exact(&mut header)?;
    if header[0..4] != LOCAL_FILE_SIGNATURE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad local file header signature"));
    }
    let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
    let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
    Ok(entry.local_header_offset + 30 + name_len + extra_len)
}

/// A read-only view of a single contiguous byte range within an inner
/// `Read + Seek`, used for the `payload.bin` entry once it has been
/// confirmed stored (so its on-disk bytes are already the payload bytes).
pub struct StoredEntryReader<T> {
    inner: T,
    start: u64,
    len: u64,
    pos: u64,
}

impl<T: Seek> StoredEntryReader<T> {
    fn new(mut inner: T, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self { inner, start, len, pos: 0 })
    }
}

impl<T: Read + Seek> Read for StoredEntryReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<T: Seek> Seek for StoredEntryReader<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(off) => self.pos as i64 + off,
            SeekFrom::End(off) => self.len as i64 + off,
        };
        if new_pos < 0 || new_pos as u64 > self.len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"));
        }
        self.pos = new_pos as u64;
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        Ok(self.pos)
    }
}

/// Opens `payload.bin` inside the archive `source` as a seekable byte
/// source, failing if the entry is missing or compressed.
pub fn open_payload_entry<T: Read + Seek>(
    mut source: T,
) -> Result<StoredEntryReader<T>, FramingError> {
    let entry = find_entry(&mut source, "payload.bin")?;
    if entry.compression_method != 0 {
        return Err(FramingError::CompressedPayloadEntry(entry.name, entry.compression_method));
    }
    let offset = data_offset(&mut source, &entry)
        .map_err(|_| FramingError::MissingEntry("payload.bin".to_string()))?;
    StoredEntryReader::new(source, offset, entry.uncompressed_size)
        .map_err(|_| FramingError::MissingEntry("payload.bin".to_string()))
}

/// Reads a (possibly Deflate-compressed) small entry fully into memory and
/// decodes it as UTF-8. Used for `META-INF/com/android/metadata`, which --
/// unlike `payload.bin` -- is not required to be stored.
pub fn read_text_entry<T: Read + Seek>(mut source: T, name: &str) -> Result<String, FramingError> {
    let entry = find_entry(&mut source, name)?;
    let offset = data_offset(&mut source, &entry)
        .map_err(|_| FramingError::MissingEntry(name.to_string()))?;
    source.seek(SeekFrom::Start(offset)).map_err(|_| FramingError::MissingEntry(name.to_string()))?;

    let mut compressed = vec![0u8; entry.compressed_size as usize];
    source.read_exact(&mut compressed).map_err(|_| FramingError::MissingEntry(name.to_string()))?;

    let bytes = match entry.compression_method {
        0 => compressed,
        8 => {
            let mut decoder = DeflateDecoder::new(&compressed[..]);
            let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
            decoder
                .read_to_end(&mut out)
                .map_err(|_| FramingError::CompressedPayloadEntry(name.to_string(), 8))?;
            out
        }
        method => return Err(FramingError::CompressedPayloadEntry(name.to_string(), method)),
    };

    String::from_utf8(bytes)
        .map_err(|_| FramingError::CompressedPayloadEntry(name.to_string(), entry.compression_method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn build_test_zip(name: &str, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let local_header_offset = 0u32;

        // local file header (stored, no compression)
        buf.extend_from_slice(&LOCAL_FILE_SIGNATURE);
        buf.extend_from_slice(&20u16.to_le_bytes()); // version needed
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        buf.extend_from_slice(&0u16.to_le_bytes()); // time
        buf.extend_from_slice(&0u16.to_le_bytes()); // date
        buf.extend_from_slice(&0u32.to_le_bytes()); // crc32
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // extra len
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(data);

        let cd_offset = buf.len() as u32;
        buf.extend_from_slice(&CENTRAL_DIR_SIGNATURE);
        buf.extend_from_slice(&20u16.to_le_bytes()); // version made by
        buf.extend_from_slice(&20u16.to_le_bytes()); // version needed
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // method
        buf.extend_from_slice(&0u16.to_le_bytes()); // time
        buf.extend_from_slice(&0u16.to_le_bytes()); // date
        buf.extend_from_slice(&0u32.to_le_bytes()); // crc32
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // extra len
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment len
        buf.extend_from_slice(&0u16.to_le_bytes()); // disk number
        buf.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        buf.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        buf.extend_from_slice(&local_header_offset.to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        let cd_size = buf.len() as u32 - cd_offset;

        buf.extend_from_slice(&EOCD_SIGNATURE);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());

        buf
    }

    #[test]
    fn finds_stored_entry_and_reads_its_bytes() {
        let payload = b"CrAU-fake-payload-bytes-0123456789";
        let zip = build_test_zip("payload.bin", payload);
        let mut reader = open_payload_entry(Cursor::new(zip)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn missing_entry_is_an_error() {
        let zip = build_test_zip("payload.bin", b"x");
        let mut cursor = Cursor::new(zip);
        assert!(find_entry(&mut cursor, "nope.bin").is_err());
    }

    #[test]
    fn reads_uncompressed_text_entry() {
        let zip = build_test_zip("META-INF/com/android/metadata", b"ota-version=1\n");
        let text = read_text_entry(Cursor::new(zip), "META-INF/com/android/metadata").unwrap();
        assert_eq!(text, "ota-version=1\n");
    }

    #[test]
    fn stored_entry_reader_seeks() {
        let payload = b"0123456789ABCDEF";
        let zip = build_test_zip("payload.bin", payload);
        let mut reader = open_payload_entry(Cursor::new(zip)).unwrap();
        reader.seek(SeekFrom::Start(10)).unwrap();
        let mut out = vec![0u8; 6];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"ABCDEF");
    }
}
