use crate::manifest::RawExtent;
use anyhow::{anyhow, bail, Result};
use cast::{i64, u64, usize};
use std::{
    cmp::min,
    io::{self, Read, Seek, SeekFrom, Write},
    iter,
};

use super::calculate_rel;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Extent {
    pub start: usize,
    pub len: usize,
}

/// terminology:
/// - inner position: the position as seen by the inner stream
/// - outer position: the position as seen by users of the ExtentStream
/// the inner position jumps around while the outer position is contiguous
///
/// notes:
/// - extents must be sorted and disjoint
/// - seeking past the end of the inner stream won't necessarily error,
///   but seeking past the end of the extents will error
/// - if the stream ends before the extents do, then seek will use the shorter one for SeekFrom::End.
///   for example, if the extents are [0..20, 40..60] but the stream is only of length 45,
///   then seek(SeekFrom::End(0)) will return 25 (0..20 + 40..45)
/// - if no extents are specified then new returns none
pub struct ExtentStream<T: Seek> {
    inner: T,
    cursor: (usize, usize),
    extents: Vec<Extent>,
    /// `extents_outer[i]` is the outer starting position of the ith extent
    /// we also make `extents_outer[extents.len()]` the (exclusive) end of the last extent
    /// thus the ith extent goes from `extents_outer[i]` to `extents_outer[i + 1]` (exclusive)
    extents_outer: Vec<usize>,
}

enum NextArea {
    CurrentExtent(usize), // number of bytes remaining in current extent
    NextExtent(usize),    // index of next extent (must be valid!)
    None,
}

impl<T: Seek> ExtentStream<T> {
    pub fn new(inner: T, extents: Vec<Extent>) -> io::Result<Option<Self>> {
        if extents.is_empty() {
            return Ok(None);
        }

        let mut result = Self {
            inner,
            cursor: (0, 0),
            extents_outer: iter::once(0)
                .chain(extents.iter().map(|extent| extent.len).scan(0, |sum, e| {
                    *sum += e;
                    Some(*sum)
                }))
                .collect(),
            extents,
        };
        result.set_cursor(0, 0)?;

        Ok(Some(result))
    }

    pub fn new_range(inner: T, start: usize, len: usize) -> io::Result<Self> {
        Self::new(inner, vec![Extent { start, len }]).map(Option::unwrap)
    }

    pub fn new_suffix(inner: T, start: usize) -> io::Result<Self> {
        Self::new(inner, vec![Extent { start, len: usize::MAX / 2 - start }]).map(Option::unwrap)
    }

    /// warning: this will not necessarily be the same as the length reported by Seek::stream_len,
    /// this is because this method reports the length as specified by the extents,
    /// whereas the underlying stream might end before the extents do which will be reflected in seeking
    pub fn len(&self) -> usize {
        *self.extents_outer.last().unwrap()
    }

    fn next_area(&self) -> NextArea {
        let (extent_i, byte_i) = self.cursor;
        if extent_i >= self.extents.len() {
            return NextArea::None;
        }

        let extent_len = self.extents[extent_i].len;
        let extent_rem =
            extent_len.checked_sub(byte_i).expect("internal error: extent index > extent size");

        if extent_rem > 0 {
            NextArea::CurrentExtent(extent_rem)
        } else if extent_i + 1 < self.extents.len() {
            NextArea::NextExtent(extent_i + 1)
        } else {
            NextArea::None
        }
    }

    fn set_cursor(&mut self, extent_i: usize, byte_i: usize) -> io::Result<u64> {
        self.cursor = (extent_i, byte_i);
        self.inner.seek(SeekFrom::Start(u64(self.extents[extent_i].start + byte_i)))?;
        Ok(u64(self.extents_outer[extent_i] + byte_i))
    }

    fn find_cursor_outer(&self, outer_pos: usize) -> Option<(usize, usize)> {
        for i in 0..self.extents.len() {
            if self.extents_outer[i] <= outer_pos && outer_pos < self.extents_outer[i + 1] {
                return Some((i, outer_pos - self.extents_outer[i]));
            }
        }
        if outer_pos == self.len() {
            // we are at the very end
            return Some((self.extents.len() - 1, self.extents.last().unwrap().len));
        }
        None
    }
}

impl<T: Seek> Seek for ExtentStream<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let err_before_start = |pos| {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                anyhow!("Attempted to seek before the start of extent stream (pos = {} < 0)", pos),
            ))
        };
        match pos {
            SeekFrom::Start(pos) => {
                let pos = usize(pos);
                if let Some((extent_i, byte_i)) = self.find_cursor_outer(pos) {
                    self.set_cursor(extent_i, byte_i)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        anyhow!(
                            "Attempted to seek past end of extent stream (pos = {} > {} = end)",
                            pos,
                            self.len()
                        ),
                    ))
                }
            }
            SeekFrom::End(offset) => {
                let inner_len = usize(self.inner.seek(SeekFrom::End(0))?);
                let mut inner_len_outer = 0;
                for i in 0..self.extents.len() {
                    let extent = self.extents[i];
                    if extent.start + extent.len <= inner_len {
                        inner_len_outer += extent.len;
                    } else {
                        if extent.start < inner_len {
                            inner_len_outer += inner_len - extent.start;
                        }
                        break;
                    }
                }
                let inner_end = min(self.len(), inner_len_outer);
                match calculate_rel(0, u64(inner_end), i64(offset)) {
                    Ok(pos) => self.seek(SeekFrom::Start(pos)),
                    Err(pos) => err_before_start(pos),
                }
            }
            SeekFrom::Current(offset) => {
                let inner_pos = u64(self.extents_outer[self.cursor.0] + self.cursor.1);
                match calculate_rel(0, inner_pos, i64(offset)) {
                    Ok(pos) => self.seek(SeekFrom::Start(pos)),
                    Err(pos) => err_before_start(pos),
                }
            }
        }
    }
}

impl<T: Read + Seek> Read for ExtentStream<T> {
    fn read(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while !buf.is_empty() {
            match self.next_area() {
                NextArea::CurrentExtent(rem) => {
                    let max_len = min(buf.len(), rem);
                    let len = self.inner.read(&mut buf[..max_len])?;
                    self.cursor.1 += len;

                    buf = &mut buf[len..];
                    total += len;
                    if len == 0 {
                        break;
                    }
                }
                NextArea::NextExtent(index) => {
                    self.set_cursor(index, 0)?;
                }
                NextArea::None => break,
            }
        }
        Ok(total)
    }
}

impl<T: Write + Seek> Write for ExtentStream<T> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let mut total = 0;
        while !buf.is_empty() {
            match self.next_area() {
                NextArea::CurrentExtent(rem) => {
                    let max_len = min(buf.len(), rem);
                    let len = self.inner.write(&buf[..max_len])?;
                    self.cursor.1 += len;

                    buf = &buf[len..];
                    total += len;
                    if len == 0 {
                        break;
                    }
                }
                NextArea::NextExtent(index) => {
                    self.set_cursor(index, 0)?;
                }
                NextArea::None => break,
            }
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn convert_extent(extent: &RawExtent, block_size: usize) -> Result<Extent> {
    if extent.start_block == Some(u64::MAX) {
        bail!("Sparse holes are not supported (I don't know what they are :/)");
    }

    Ok(Extent {
        start: block_size
            * usize(extent.start_block.ok_or_else(|| anyhow!("Missing start_block in extent"))?),
        len: block_size
            * usize(extent.num_blocks.ok_or_else(|| anyhow!("Missing num_block in extent"))?),
    })
}

pub fn convert_extents(extents: &[RawExtent], block_size: usize) -> Result<Vec<Extent>> {
    if block_size == 0 {
        bail!("Block size cannot be 0")
    }
    extents.iter().map(|extent| convert_extent(extent, block_size)).collect()
}
