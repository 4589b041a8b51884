//! Framebuffer attachments, output mappings and clear flags.

use crate::device::RawFramebuffer;
use crate::handle::TextureId;
use crate::rect::Rect;

/// Number of color attachment slots per framebuffer.
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// Number of shader color outputs a framebuffer can route.
pub const MAX_OUTPUTS: usize = 4;

/// An attachment slot of a framebuffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Attachment {
  /// The depth attachment.
  Depth,
  /// First color attachment.
  Color0,
  /// Second color attachment.
  Color1,
  /// Third color attachment.
  Color2,
  /// Fourth color attachment.
  Color3,
}

impl Attachment {
  /// Every slot, depth first.
  pub const ALL: [Attachment; 5] = [
    Attachment::Depth,
    Attachment::Color0,
    Attachment::Color1,
    Attachment::Color2,
    Attachment::Color3,
  ];

  /// Slot index into an attachment array.
  pub(crate) const fn index(self) -> usize {
    match self {
      Attachment::Depth => 0,
      Attachment::Color0 => 1,
      Attachment::Color1 => 2,
      Attachment::Color2 => 3,
      Attachment::Color3 => 4,
    }
  }

  /// The color slot number, if this is a color attachment.
  pub const fn color_index(self) -> Option<usize> {
    match self {
      Attachment::Depth => None,
      Attachment::Color0 => Some(0),
      Attachment::Color1 => Some(1),
      Attachment::Color2 => Some(2),
      Attachment::Color3 => Some(3),
    }
  }

  /// The color attachment for a slot number.
  pub const fn from_color_index(index: usize) -> Option<Attachment> {
    match index {
      0 => Some(Attachment::Color0),
      1 => Some(Attachment::Color1),
      2 => Some(Attachment::Color2),
      3 => Some(Attachment::Color3),
      _ => None,
    }
  }
}

/// A texture bound into a framebuffer slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FramebufferAttachment {
  /// The attached texture.
  pub texture: TextureId,
  /// The attached mip level.
  pub mip_level: u32,
}

/// Which aspects of a render target a clear wipes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ClearFlags {
  bits: u8,
}

impl ClearFlags {
  /// Clear nothing.
  pub const NONE: ClearFlags = ClearFlags { bits: 0 };

  /// Clear color attachments.
  pub const COLOR: ClearFlags = ClearFlags { bits: 1 << 0 };

  /// Clear the depth attachment.
  pub const DEPTH: ClearFlags = ClearFlags { bits: 1 << 1 };

  /// Clear everything.
  pub const ALL: ClearFlags = ClearFlags { bits: 0b11 };

  /// The union of `self` and `other`.
  pub const fn union(self, other: ClearFlags) -> ClearFlags {
    ClearFlags {
      bits: self.bits | other.bits,
    }
  }

  /// Whether every flag of `other` is set in `self`.
  pub const fn contains(self, other: ClearFlags) -> bool {
    self.bits & other.bits == other.bits
  }

  /// Whether no flag is set.
  pub const fn is_empty(self) -> bool {
    self.bits == 0
  }
}

impl std::ops::BitOr for ClearFlags {
  type Output = ClearFlags;

  fn bitor(self, rhs: ClearFlags) -> ClearFlags {
    self.union(rhs)
  }
}

/// Renderer-side record of a live framebuffer.
pub(crate) struct FramebufferEntry {
  pub raw: RawFramebuffer,
  /// Slots indexed by [`Attachment::index`].
  pub attachments: [Option<FramebufferAttachment>; 5],
  /// Shader color output `i` renders into `output_mapping[i]`.
  pub output_mapping: [Option<Attachment>; MAX_OUTPUTS],
  /// The draw-buffer configuration has not been pushed since the last attachment change.
  pub draw_buffers_dirty: bool,
  /// Viewport for draws into this framebuffer, kept in the hardware origin convention.
  pub viewport: Rect,
  pub debug_label: String,
}

impl FramebufferEntry {
  pub fn new(raw: RawFramebuffer, debug_label: String) -> Self {
    FramebufferEntry {
      raw,
      attachments: [None; 5],
      output_mapping: [
        Some(Attachment::Color0),
        Some(Attachment::Color1),
        Some(Attachment::Color2),
        Some(Attachment::Color3),
      ],
      draw_buffers_dirty: true,
      viewport: Rect::default(),
      debug_label,
    }
  }

  pub fn attachment(&self, slot: Attachment) -> Option<FramebufferAttachment> {
    self.attachments[slot.index()]
  }

  /// First present attachment, searching depth first. Drives the origin-flip height.
  pub fn first_attachment(&self) -> Option<FramebufferAttachment> {
    Attachment::ALL.iter().find_map(|slot| self.attachments[slot.index()])
  }
}
