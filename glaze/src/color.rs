//! RGBA color values.

/// A straight-alpha RGBA color with `f32` channels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Color {
  /// Red channel.
  pub r: f32,
  /// Green channel.
  pub g: f32,
  /// Blue channel.
  pub b: f32,
  /// Alpha channel.
  pub a: f32,
}

impl Color {
  /// Opaque white.
  pub const WHITE: Color = Color::new(1., 1., 1., 1.);

  /// Opaque black.
  pub const BLACK: Color = Color::new(0., 0., 0., 1.);

  /// Fully transparent black.
  pub const TRANSPARENT: Color = Color::new(0., 0., 0., 0.);

  /// Create a new [`Color`].
  pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
    Color { r, g, b, a }
  }

  /// Channels as an array, in RGBA order.
  pub const fn to_array(self) -> [f32; 4] {
    [self.r, self.g, self.b, self.a]
  }
}

impl Default for Color {
  fn default() -> Self {
    Color::TRANSPARENT
  }
}
