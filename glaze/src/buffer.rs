//! Buffer objects with client-side caches and deferred uploads.
//!
//! A buffer keeps a local byte cache mirroring what the hardware will eventually hold, plus a
//! dirty range. Writes only touch the cache; the renderer flushes the dirty range right before
//! a draw that uses the buffer, reallocating hardware storage first if the cache outgrew it.
//! [`BufferWriter`] exposes the cache through the standard [`Write`]/[`Seek`] traits so
//! higher-level code can stream vertex data without owning the buffer.

use std::io;
use std::io::{Seek, SeekFrom, Write};

use log::warn;

use crate::device::RawBuffer;

/// Hardware binding points a buffer can occupy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferTarget {
  /// Vertex attribute storage.
  Array,
  /// Index storage. This binding point is part of vertex-array state on actual hardware.
  ElementArray,
  /// Pixel upload staging.
  PixelUnpack,
  /// Pixel readback staging.
  PixelPack,
}

impl BufferTarget {
  pub(crate) const COUNT: usize = 4;

  pub(crate) const fn index(self) -> usize {
    match self {
      BufferTarget::Array => 0,
      BufferTarget::ElementArray => 1,
      BufferTarget::PixelUnpack => 2,
      BufferTarget::PixelPack => 3,
    }
  }
}

/// Usage hint handed to the hardware at allocation time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferUsage {
  /// Written once, drawn many times.
  Static,
  /// Rewritten occasionally.
  Dynamic,
  /// Rewritten every frame.
  Stream,
  /// Written by the hardware, read back by the client.
  StreamRead,
}

/// Width of the elements in an index buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexFormat {
  /// 16-bit indices.
  U16,
  /// 32-bit indices.
  U32,
}

impl IndexFormat {
  /// Bytes per index.
  pub const fn byte_len(self) -> usize {
    match self {
      IndexFormat::U16 => 2,
      IndexFormat::U32 => 4,
    }
  }
}

/// Renderer-side record of a live buffer.
pub(crate) struct BufferEntry {
  pub raw: RawBuffer,
  /// The binding point flushes go through.
  pub target: BufferTarget,
  pub usage: BufferUsage,
  /// Local mirror of buffer contents; length is always a power of two.
  pub cache: Vec<u8>,
  /// Hardware allocation size last committed.
  pub committed_size: usize,
  /// Dirty range start, in bytes. Empty iff `update_begin >= update_end`.
  pub update_begin: usize,
  /// Dirty range end, exclusive.
  pub update_end: usize,
  /// Stream cursor for [`BufferWriter`].
  pub cursor: usize,
  /// Element width, for index buffers.
  pub index_format: Option<IndexFormat>,
  pub debug_label: String,
}

impl BufferEntry {
  pub fn new(
    raw: RawBuffer,
    target: BufferTarget,
    usage: BufferUsage,
    capacity: usize,
    debug_label: String,
  ) -> Self {
    let size = capacity.max(1).next_power_of_two();
    BufferEntry {
      raw,
      target,
      usage,
      cache: vec![0; size],
      committed_size: size,
      update_begin: size,
      update_end: 0,
      cursor: 0,
      index_format: None,
      debug_label,
    }
  }

  pub fn dirty_range(&self) -> Option<(usize, usize)> {
    if self.update_begin >= self.update_end {
      None
    } else {
      Some((self.update_begin, self.update_end.min(self.cache.len())))
    }
  }

  pub fn reset_dirty(&mut self) {
    self.update_begin = self.cache.len();
    self.update_end = 0;
  }

  fn widen_dirty(&mut self, begin: usize, end: usize) {
    self.update_begin = self.update_begin.min(begin);
    self.update_end = self.update_end.max(end);
  }

  /// Copy `data` into the cache at `offset`, growing it if needed.
  pub fn write_at(&mut self, offset: usize, data: &[u8]) {
    let end = offset + data.len();

    if end > self.cache.len() {
      let new_size = end.next_power_of_two();
      warn!(
        "buffer {} ({}): growing cache from {} to {}",
        self.raw.0,
        self.debug_label,
        self.cache.len(),
        new_size
      );
      self.cache.resize(new_size, 0);
      // hardware storage will be reallocated at flush time, so everything re-uploads
      self.widen_dirty(0, new_size);
    }

    self.cache[offset..end].copy_from_slice(data);
    self.widen_dirty(offset, end);
  }

  /// Drop the entire contents; the next flush reallocates hardware storage undefined.
  pub fn invalidate(&mut self) {
    self.cursor = 0;
    self.reset_dirty();
  }
}

/// Streaming access to a buffer’s cache.
///
/// Obtained from [`Renderer::buffer_writer`](crate::renderer::Renderer::buffer_writer). Writes
/// land in the local cache and are uploaded as one range at the next draw using the buffer.
/// Reading back is not supported.
pub struct BufferWriter<'a> {
  entry: &'a mut BufferEntry,
}

impl<'a> BufferWriter<'a> {
  pub(crate) fn new(entry: &'a mut BufferEntry) -> Self {
    BufferWriter { entry }
  }

  /// Current cursor position.
  pub fn position(&self) -> u64 {
    self.entry.cursor as u64
  }

  /// Current cache size in bytes.
  pub fn len(&self) -> usize {
    self.entry.cache.len()
  }

  /// Whether the cache is empty.
  pub fn is_empty(&self) -> bool {
    self.entry.cache.is_empty()
  }
}

impl Write for BufferWriter<'_> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let offset = self.entry.cursor;
    self.entry.write_at(offset, buf);
    self.entry.cursor += buf.len();
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    // hardware flushes happen at draw time
    Ok(())
  }
}

impl Seek for BufferWriter<'_> {
  fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
    let target = match pos {
      SeekFrom::Start(n) => n as i64,
      SeekFrom::Current(d) => self.entry.cursor as i64 + d,
      SeekFrom::End(d) => self.entry.cache.len() as i64 + d,
    };

    if target < 0 {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "seek before start of buffer",
      ));
    }

    self.entry.cursor = target as usize;
    Ok(self.entry.cursor as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(capacity: usize) -> BufferEntry {
    BufferEntry::new(
      RawBuffer(1),
      BufferTarget::Array,
      BufferUsage::Stream,
      capacity,
      "test".to_string(),
    )
  }

  #[test]
  fn capacity_rounds_to_power_of_two() {
    assert_eq!(entry(100).cache.len(), 128);
    assert_eq!(entry(128).cache.len(), 128);
    assert_eq!(entry(0).cache.len(), 1);
  }

  #[test]
  fn fresh_buffer_has_no_dirty_range() {
    assert_eq!(entry(64).dirty_range(), None);
  }

  #[test]
  fn writes_widen_the_dirty_range() {
    let mut e = entry(64);
    e.write_at(8, &[1, 2, 3, 4]);
    assert_eq!(e.dirty_range(), Some((8, 12)));

    e.write_at(20, &[9]);
    assert_eq!(e.dirty_range(), Some((8, 21)));

    e.reset_dirty();
    assert_eq!(e.dirty_range(), None);
  }

  #[test]
  fn growth_dirties_everything() {
    let mut e = entry(16);
    e.write_at(30, &[7; 10]);
    assert_eq!(e.cache.len(), 64);
    assert_eq!(e.dirty_range(), Some((0, 64)));
    assert_eq!(&e.cache[30..40], &[7; 10]);
  }

  #[test]
  fn writer_streams_and_seeks() {
    let mut e = entry(16);
    let mut w = BufferWriter::new(&mut e);

    w.write_all(&[1, 2, 3]).unwrap();
    assert_eq!(w.position(), 3);

    w.seek(SeekFrom::Start(8)).unwrap();
    w.write_all(&[4, 5]).unwrap();
    assert_eq!(w.position(), 10);

    w.seek(SeekFrom::Current(-2)).unwrap();
    assert_eq!(w.position(), 8);

    assert!(w.seek(SeekFrom::Current(-100)).is_err());

    let end = w.seek(SeekFrom::End(0)).unwrap();
    assert_eq!(end, 16);

    assert_eq!(&e.cache[0..3], &[1, 2, 3]);
    assert_eq!(&e.cache[8..10], &[4, 5]);
    assert_eq!(e.dirty_range(), Some((0, 10)));
  }
}
