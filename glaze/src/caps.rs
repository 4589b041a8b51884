//! Render capabilities and backend feature reporting.
//!
//! [`Capability`] values are toggleable pieces of pipeline state tracked by the renderer with
//! the usual pending/active discipline. [`FeatureSet`] describes what a backend can do at all;
//! it is fixed for the lifetime of a device.

/// A toggleable piece of render state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Capability {
  /// Depth testing.
  DepthTest,
  /// Depth buffer writes.
  DepthWrite,
  /// Face culling.
  CullFace,
}

impl Capability {
  /// Every capability, in synchronization order.
  pub const ALL: [Capability; 3] = [
    Capability::DepthTest,
    Capability::DepthWrite,
    Capability::CullFace,
  ];

  pub(crate) const fn bit(self) -> u8 {
    match self {
      Capability::DepthTest => 1 << 0,
      Capability::DepthWrite => 1 << 1,
      Capability::CullFace => 1 << 2,
    }
  }
}

/// A set of enabled [`Capability`] values.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CapabilitySet {
  bits: u8,
}

impl CapabilitySet {
  /// The empty set.
  pub const NONE: CapabilitySet = CapabilitySet { bits: 0 };

  /// Create an empty set.
  pub const fn new() -> Self {
    Self::NONE
  }

  /// The set with `cap` added.
  pub const fn with(self, cap: Capability) -> Self {
    CapabilitySet {
      bits: self.bits | cap.bit(),
    }
  }

  /// Add `cap` to the set.
  pub fn insert(&mut self, cap: Capability) {
    self.bits |= cap.bit();
  }

  /// Remove `cap` from the set.
  pub fn remove(&mut self, cap: Capability) {
    self.bits &= !cap.bit();
  }

  /// Add or remove `cap` depending on `enabled`.
  pub fn set(&mut self, cap: Capability, enabled: bool) {
    if enabled {
      self.insert(cap);
    } else {
      self.remove(cap);
    }
  }

  /// Whether `cap` is in the set.
  pub const fn contains(self, cap: Capability) -> bool {
    self.bits & cap.bit() != 0
  }

  /// Whether the set is empty.
  pub const fn is_empty(self) -> bool {
    self.bits == 0
  }
}

/// Optional backend features, reported once at device creation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FeatureSet {
  bits: u8,
}

impl FeatureSet {
  /// No optional features.
  pub const NONE: FeatureSet = FeatureSet { bits: 0 };

  /// Instanced draw calls and per-instance attribute divisors.
  pub const INSTANCED_DRAWS: FeatureSet = FeatureSet { bits: 1 << 0 };

  /// Sampling from depth textures.
  pub const DEPTH_TEXTURES: FeatureSet = FeatureSet { bits: 1 << 1 };

  /// More than one color output per framebuffer.
  pub const MULTIPLE_RENDER_TARGETS: FeatureSet = FeatureSet { bits: 1 << 2 };

  /// Mip chains shorter than the full pyramid.
  pub const PARTIAL_MIPMAPS: FeatureSet = FeatureSet { bits: 1 << 3 };

  /// sRGB conversion on writes to the default framebuffer.
  pub const SRGB_WRITES: FeatureSet = FeatureSet { bits: 1 << 4 };

  /// Every feature this crate knows about.
  pub const ALL: FeatureSet = FeatureSet { bits: 0b1_1111 };

  /// The union of `self` and `other`.
  pub const fn union(self, other: FeatureSet) -> FeatureSet {
    FeatureSet {
      bits: self.bits | other.bits,
    }
  }

  /// `self` without the features in `other`.
  pub const fn difference(self, other: FeatureSet) -> FeatureSet {
    FeatureSet {
      bits: self.bits & !other.bits,
    }
  }

  /// Whether every feature of `other` is present in `self`.
  pub const fn contains(self, other: FeatureSet) -> bool {
    self.bits & other.bits == other.bits
  }

  /// Whether no feature is present.
  pub const fn is_empty(self) -> bool {
    self.bits == 0
  }
}
