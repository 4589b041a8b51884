//! Blending modes.
//!
//! A [`BlendMode`] describes how a fragment produced by a draw (*src*) is combined with the
//! pixel already present in the framebuffer (*dst*), with separate equations and factors for
//! the color and alpha channels. Blending is staged like every other piece of render state:
//! setting a mode is free, the hardware calls happen at synchronization time and only when
//! the requested mode differs from what the hardware last received.

/// Blending equation applied between the weighted *src* and *dst* terms.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Equation {
  /// `blended = src * srcK + dst * dstK`.
  Additive,
  /// `blended = src * srcK - dst * dstK`.
  Subtract,
  /// `blended = dst * dstK - src * srcK`.
  ReverseSubtract,
  /// `blended = min(src, dst)`.
  Min,
  /// `blended = max(src, dst)`.
  Max,
}

/// Weighting factor applied to one side of a blending equation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Factor {
  /// `1 * color`.
  One,
  /// `0 * color`.
  Zero,
  /// `src * color`.
  SrcColor,
  /// `(1 - src) * color`.
  SrcColorComplement,
  /// `dst * color`.
  DstColor,
  /// `(1 - dst) * color`.
  DstColorComplement,
  /// `srcA * color`.
  SrcAlpha,
  /// `(1 - srcA) * color`.
  SrcAlphaComplement,
  /// `dstA * color`.
  DstAlpha,
  /// `(1 - dstA) * color`.
  DstAlphaComplement,
}

/// One channel’s worth of blending state: an equation plus its two factors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Blending {
  /// Blending equation.
  pub equation: Equation,
  /// Factor applied to the incoming fragment.
  pub src: Factor,
  /// Factor applied to the framebuffer pixel.
  pub dst: Factor,
}

impl Blending {
  /// Create a new [`Blending`].
  pub const fn new(equation: Equation, src: Factor, dst: Factor) -> Self {
    Blending { equation, src, dst }
  }
}

/// A complete blending mode: color and alpha channels blended independently.
///
/// Disabled blending is represented by the absence of a mode (`Option<BlendMode>`), not by a
/// mode value; re-enabling a previously used mode does not re-upload its equations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlendMode {
  /// Blending applied to the RGB channels.
  pub color: Blending,
  /// Blending applied to the alpha channel.
  pub alpha: Blending,
}

impl BlendMode {
  /// Classic alpha blending of non-premultiplied colors.
  pub const ALPHA: BlendMode = BlendMode {
    color: Blending::new(Equation::Additive, Factor::SrcAlpha, Factor::SrcAlphaComplement),
    alpha: Blending::new(Equation::Additive, Factor::One, Factor::SrcAlphaComplement),
  };

  /// Alpha blending of premultiplied colors.
  pub const PREMUL_ALPHA: BlendMode = BlendMode {
    color: Blending::new(Equation::Additive, Factor::One, Factor::SrcAlphaComplement),
    alpha: Blending::new(Equation::Additive, Factor::One, Factor::SrcAlphaComplement),
  };

  /// Additive blending.
  pub const ADDITIVE: BlendMode = BlendMode {
    color: Blending::new(Equation::Additive, Factor::SrcAlpha, Factor::One),
    alpha: Blending::new(Equation::Additive, Factor::One, Factor::One),
  };

  /// Create a mode using the same blending for both channels.
  pub const fn uniform(blending: Blending) -> Self {
    BlendMode {
      color: blending,
      alpha: blending,
    }
  }
}
