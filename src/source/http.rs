//! HTTP Range File (C1): a seekable read-only view over a remote resource,
//! implemented with `reqwest`'s blocking client rather than the async
//! client the closest sibling crate in the retrieval pack uses -- see
//! SPEC_FULL.md §9 for why the core stays synchronous.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header;

use crate::error::TransportError;

const DEFAULT_USER_AGENT: &str = concat!("ota-payload-extractor/", env!("CARGO_PKG_VERSION"));
const READ_CHUNK: usize = 8 * 1024;

/// Called with `(bytes_so_far, total_expected)` for the read currently in
/// flight; the first call for a given `read` is `(0, L)`, the last is
/// `(L, L)`.
pub type ProgressSink = Box<dyn FnMut(u64, u64) + Send>;

pub struct HttpRangeFile {
    client: Client,
    url: String,
    size: u64,
    pos: u64,
    total_bytes: AtomicU64,
    progress: Option<ProgressSink>,
}

impl HttpRangeFile {
    pub fn open(url: &str, user_agent: Option<&str>) -> Result<Self, TransportError> {
        url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT).to_string())
            .timeout(Duration::from_secs(600))
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Head(e.to_string()))?;

        let response = client.head(url).send().map_err(|e| TransportError::Head(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Head(format!("HTTP {}", response.status())));
        }

        let supports_ranges = response
            .headers()
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "bytes")
            .unwrap_or(false);
        if !supports_ranges {
            return Err(TransportError::RangesUnsupported);
        }

        let size = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .ok_or(TransportError::UnknownSize)?;

        Ok(Self {
            client,
            url: url.to_string(),
            size,
            pos: 0,
            total_bytes: AtomicU64::new(0),
            progress: None,
        })
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn close(self) {
        drop(self);
    }

    /// The range-request read described in SPEC_FULL.md §4.1: reads exactly
    /// `len` bytes starting at the current position, or fails. Used both as
    /// the backing implementation of `Read::read` and directly by callers
    /// (and tests) that want the spec's `(bytes) -> Result` shape instead of
    /// the partial-read-tolerant `std::io::Read` contract.
    pub fn read_exact_range(&mut self, len: u64) -> Result<Vec<u8>, TransportError> {
        if len == 0 {
            if let Some(sink) = self.progress.as_mut() {
                sink(0, 0);
            }
            return Ok(Vec::new());
        }
        if self.pos >= self.size {
            return Err(TransportError::EndOfFile { pos: self.pos, size: self.size });
        }

        let end = (self.pos + len - 1).min(self.size - 1);
        let actual_len = end - self.pos + 1;
        let range = format!("bytes={}-{}", self.pos, end);

        let mut response = self
            .client
            .get(&self.url)
            .header(header::RANGE, range)
            .send()
            .map_err(|e| TransportError::Get(e.to_string()))?;

        if response.status().as_u16() != 206 {
            return Err(TransportError::PartialContentRefused(response.status().as_u16()));
        }

        let mut out = Vec::with_capacity(actual_len as usize);
        let mut chunk = [0u8; READ_CHUNK];
        let mut read_so_far = 0u64;
        if let Some(sink) = self.progress.as_mut() {
            sink(0, actual_len);
        }
        loop {
            let n = response.read(&mut chunk).map_err(|e| TransportError::Get(e.to_string()))?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            read_so_far += n as u64;
            if let Some(sink) = self.progress.as_mut() {
                sink(read_so_far, actual_len);
            }
        }

        self.pos += read_so_far;
        self.total_bytes.fetch_add(read_so_far, Ordering::Relaxed);
        Ok(out)
    }
}

impl Read for HttpRangeFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let data = self
            .read_exact_range(buf.len() as u64)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl Seek for HttpRangeFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(off) => self.pos as i64 + off,
            SeekFrom::End(off) => self.size as i64 + off,
        };
        if new_pos < 0 || new_pos as u64 > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                crate::error::InputError::InvalidSeek { requested: new_pos, size: self.size },
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_past_end_fails() {
        // constructed directly to avoid a real network call in unit tests
        let mut f = HttpRangeFile {
            client: Client::new(),
            url: "http://example.invalid/payload.bin".to_string(),
            size: 100,
            pos: 0,
            total_bytes: AtomicU64::new(0),
            progress: None,
        };
        assert_eq!(f.seek(SeekFrom::Start(100)).unwrap(), 100);
        assert!(f.seek(SeekFrom::Start(101)).is_err());
        assert!(f.seek(SeekFrom::End(0)).is_ok());
        assert!(f.seek(SeekFrom::End(1)).is_err());
    }

    #[test]
    fn zero_length_read_is_a_noop() {
        let mut f = HttpRangeFile {
            client: Client::new(),
            url: "http://example.invalid/payload.bin".to_string(),
            size: 100,
            pos: 10,
            total_bytes: AtomicU64::new(0),
            progress: None,
        };
        let data = f.read_exact_range(0).unwrap();
        assert!(data.is_empty());
        assert_eq!(f.tell(), 10);
    }
}
