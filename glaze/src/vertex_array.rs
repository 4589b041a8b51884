//! Vertex arrays: buffer attachments and declarative attribute layouts.
//!
//! A vertex array pairs buffer attachments with a layout describing how attributes pull from
//! them. Both are staged: changes set per-attribute dirty bits (plus one bit for the index
//! attachment) and are replayed to hardware right before the next draw that uses the array.

use crate::handle::BufferId;

/// Geometry topology for a draw.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Primitive {
  /// Isolated points.
  Points,
  /// Isolated segments.
  Lines,
  /// Connected segments sharing endpoints.
  LineStrip,
  /// A closed line strip.
  LineLoop,
  /// Isolated triangles.
  Triangles,
  /// Connected triangles sharing an edge.
  TriangleStrip,
}

/// Scalar type of a vertex attribute.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttributeType {
  /// Unsigned 8-bit.
  U8,
  /// Signed 8-bit.
  I8,
  /// Unsigned 16-bit.
  U16,
  /// Signed 16-bit.
  I16,
  /// Unsigned 32-bit.
  U32,
  /// Signed 32-bit.
  I32,
  /// 32-bit float.
  F32,
}

impl AttributeType {
  /// Bytes per scalar.
  pub const fn byte_len(self) -> usize {
    match self {
      AttributeType::U8 | AttributeType::I8 => 1,
      AttributeType::U16 | AttributeType::I16 => 2,
      AttributeType::U32 | AttributeType::I32 | AttributeType::F32 => 4,
    }
  }
}

/// How attribute scalars arrive in the shader.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttributeConversion {
  /// Converted to float as-is.
  Float,
  /// Converted to float, normalized to `[0, 1]` or `[-1, 1]`.
  FloatNormalized,
  /// Passed through as integers.
  Integer,
}

/// One attribute of a vertex layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VertexAttribFormat {
  /// Scalars per vertex, 1 to 4.
  pub elements: u32,
  /// Scalar type in the buffer.
  pub scalar: AttributeType,
  /// Conversion applied on the way to the shader.
  pub conversion: AttributeConversion,
  /// Bytes between consecutive vertices.
  pub stride: u32,
  /// Byte offset of the first scalar inside the attachment.
  pub offset: u32,
  /// Instancing divisor; zero advances per vertex.
  pub divisor: u32,
  /// Which vertex-buffer attachment slot the attribute reads.
  pub attachment: usize,
}

pub(crate) const INDEX_DIRTY_BIT: u32 = 1 << 31;

/// Renderer-side record of a live vertex array.
pub(crate) struct VertexArrayEntry {
  pub raw: crate::device::RawVertexArray,
  pub attachments: Vec<Option<BufferId>>,
  pub index_attachment: Option<BufferId>,
  pub layout: Vec<VertexAttribFormat>,
  /// Attribute count last replayed, so dropped attributes get disabled.
  pub prev_num_attributes: usize,
  /// Bit per layout attribute, plus [`INDEX_DIRTY_BIT`].
  pub dirty_bits: u32,
  pub debug_label: String,
}

impl VertexArrayEntry {
  pub fn new(raw: crate::device::RawVertexArray, debug_label: String) -> Self {
    VertexArrayEntry {
      raw,
      attachments: Vec::new(),
      index_attachment: None,
      layout: Vec::new(),
      prev_num_attributes: 0,
      dirty_bits: 0,
      debug_label,
    }
  }

  /// Mark every attribute of the current layout dirty.
  pub fn mark_layout_dirty(&mut self) {
    for i in 0..self.layout.len().min(31) {
      self.dirty_bits |= 1 << i;
    }
  }

  /// Mark attributes sourcing `slot` dirty.
  pub fn mark_slot_dirty(&mut self, slot: usize) {
    for (i, attr) in self.layout.iter().enumerate().take(31) {
      if attr.attachment == slot {
        self.dirty_bits |= 1 << i;
      }
    }
  }

  pub fn mark_index_dirty(&mut self) {
    self.dirty_bits |= INDEX_DIRTY_BIT;
  }

  /// Buffers the next draw has to flush: vertex attachments referenced by the layout, then the
  /// index attachment.
  pub fn referenced_buffers(&self) -> Vec<BufferId> {
    let mut out = Vec::new();
    for attr in &self.layout {
      if let Some(Some(id)) = self.attachments.get(attr.attachment) {
        if !out.contains(id) {
          out.push(*id);
        }
      }
    }
    if let Some(id) = self.index_attachment {
      if !out.contains(&id) {
        out.push(id);
      }
    }
    out
  }

  /// Detach `buffer` everywhere it appears. Returns true if anything changed.
  pub fn detach_buffer(&mut self, buffer: BufferId) -> bool {
    let mut changed = false;

    for slot in 0..self.attachments.len() {
      if self.attachments[slot] == Some(buffer) {
        self.attachments[slot] = None;
        self.mark_slot_dirty(slot);
        changed = true;
      }
    }

    if self.index_attachment == Some(buffer) {
      self.index_attachment = None;
      self.mark_index_dirty();
      changed = true;
    }

    changed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::RawVertexArray;

  fn attr(attachment: usize) -> VertexAttribFormat {
    VertexAttribFormat {
      elements: 2,
      scalar: AttributeType::F32,
      conversion: AttributeConversion::Float,
      stride: 8,
      offset: 0,
      divisor: 0,
      attachment,
    }
  }

  #[test]
  fn dirty_bits_track_slots() {
    let mut e = VertexArrayEntry::new(RawVertexArray(1), "test".to_string());
    e.layout = vec![attr(0), attr(1), attr(0)];
    e.attachments = vec![Some(BufferId(10)), Some(BufferId(11))];

    e.mark_slot_dirty(0);
    assert_eq!(e.dirty_bits, 0b101);

    e.mark_index_dirty();
    assert_eq!(e.dirty_bits, 0b101 | INDEX_DIRTY_BIT);

    e.dirty_bits = 0;
    e.mark_layout_dirty();
    assert_eq!(e.dirty_bits, 0b111);
  }

  #[test]
  fn referenced_buffers_deduplicates() {
    let mut e = VertexArrayEntry::new(RawVertexArray(1), "test".to_string());
    e.layout = vec![attr(0), attr(1), attr(0)];
    e.attachments = vec![Some(BufferId(10)), Some(BufferId(11))];
    e.index_attachment = Some(BufferId(12));

    assert_eq!(
      e.referenced_buffers(),
      vec![BufferId(10), BufferId(11), BufferId(12)]
    );
  }

  #[test]
  fn detach_clears_every_reference() {
    let mut e = VertexArrayEntry::new(RawVertexArray(1), "test".to_string());
    e.layout = vec![attr(0), attr(1)];
    e.attachments = vec![Some(BufferId(10)), Some(BufferId(10))];
    e.index_attachment = Some(BufferId(10));

    assert!(e.detach_buffer(BufferId(10)));
    assert!(e.attachments.iter().all(Option::is_none));
    assert_eq!(e.index_attachment, None);
    assert_eq!(e.dirty_bits, 0b11 | INDEX_DIRTY_BIT);

    assert!(!e.detach_buffer(BufferId(10)));
  }
}
