//! Rectangle types for viewports and scissor regions.
//!
//! The public API speaks a top-left-origin convention; the hardware convention for
//! texture-backed render targets is bottom-left. The renderer converts between the two with a
//! vertical flip against the target’s pixel height, which is its own inverse, so setting and
//! then reading a rectangle returns the original value.

/// A viewport rectangle, in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rect {
  /// Horizontal position of the rectangle’s origin corner.
  pub x: f32,
  /// Vertical position of the rectangle’s origin corner.
  pub y: f32,
  /// Width of the rectangle.
  pub width: f32,
  /// Height of the rectangle.
  pub height: f32,
}

impl Rect {
  /// Create a new [`Rect`].
  pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Rect { x, y, width, height }
  }

  /// Whether the rectangle covers no pixels.
  pub fn is_empty(&self) -> bool {
    self.width == 0. || self.height == 0.
  }

  /// The same rectangle with its vertical origin flipped against `extent`.
  pub(crate) fn flipped_y(self, extent: f32) -> Rect {
    Rect {
      y: extent - self.y - self.height,
      ..self
    }
  }
}

/// A scissor rectangle, in pixels.
///
/// A zero width or height disables the scissor test entirely rather than clipping everything
/// away.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IntRect {
  /// Horizontal position of the rectangle’s origin corner.
  pub x: i32,
  /// Vertical position of the rectangle’s origin corner.
  pub y: i32,
  /// Width of the rectangle.
  pub width: i32,
  /// Height of the rectangle.
  pub height: i32,
}

impl IntRect {
  /// Create a new [`IntRect`].
  pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    IntRect { x, y, width, height }
  }

  /// Whether the rectangle covers no pixels.
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  /// The same rectangle with its vertical origin flipped against `extent`.
  pub(crate) fn flipped_y(self, extent: i32) -> IntRect {
    IntRect {
      y: extent - self.y - self.height,
      ..self
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flip_is_self_inverse() {
    let r = Rect::new(10., 20., 100., 50.);
    assert_eq!(r.flipped_y(480.).flipped_y(480.), r);

    let r = IntRect::new(3, 7, 64, 32);
    assert_eq!(r.flipped_y(240).flipped_y(240), r);
  }
}
