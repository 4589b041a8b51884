//! Texture parameters, pixel data carriers and the renderer-side texture record.

use std::error;
use std::fmt;

use crate::device::{RawBuffer, RawTexture};

/// The sampler kind a texture binds as.
///
/// A hardware texture unit only usefully holds one kind at a time; binding a different kind to
/// a unit first unbinds the previous one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TextureKind {
  /// A plain two-dimensional texture.
  TwoD,
  /// A six-faced cube map.
  CubeMap,
}

impl TextureKind {
  /// Number of layers (faces) per mip level.
  pub const fn layers(self) -> u32 {
    match self {
      TextureKind::TwoD => 1,
      TextureKind::CubeMap => 6,
    }
  }
}

/// Minification filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MinFilter {
  /// Nearest interpolation.
  Nearest,
  /// Linear interpolation.
  Linear,
  /// Nearest interpolation with nearest mipmap selection.
  NearestMipmapNearest,
  /// Nearest interpolation with linear mipmap blending.
  NearestMipmapLinear,
  /// Linear interpolation with nearest mipmap selection.
  LinearMipmapNearest,
  /// Linear interpolation with linear mipmap blending.
  LinearMipmapLinear,
}

/// Magnification filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MagFilter {
  /// Nearest interpolation.
  Nearest,
  /// Linear interpolation.
  Linear,
}

/// How texture coordinates outside `[0, 1]` resolve.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wrap {
  /// Clamp to the edge texel.
  ClampToEdge,
  /// Repeat the texture.
  Repeat,
  /// Repeat the texture, mirrored.
  MirroredRepeat,
}

/// Whether mipmap contents are maintained by the renderer or by the client.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MipmapMode {
  /// The client uploads every level itself.
  Manual,
  /// Levels past the base are regenerated lazily when the texture is next sampled after being
  /// drawn to or filled.
  Auto,
}

/// Pixel formats understood by the core.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PixelFormat {
  /// 8-bit single channel.
  R8,
  /// 8-bit two channels.
  Rg8,
  /// 8-bit three channels.
  Rgb8,
  /// 8-bit four channels.
  Rgba8,
  /// 16-bit depth.
  Depth16,
}

impl PixelFormat {
  /// Bytes per pixel.
  pub const fn pixel_size(self) -> usize {
    match self {
      PixelFormat::R8 => 1,
      PixelFormat::Rg8 => 2,
      PixelFormat::Rgb8 => 3,
      PixelFormat::Rgba8 => 4,
      PixelFormat::Depth16 => 2,
    }
  }

  /// Whether this is a depth format.
  pub const fn is_depth(self) -> bool {
    matches!(self, PixelFormat::Depth16)
  }
}

/// Parameters a texture is created with.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TextureParams {
  /// Sampler kind.
  pub kind: TextureKind,
  /// Pixel format of every level.
  pub format: PixelFormat,
  /// Width of the base level, in pixels.
  pub width: u32,
  /// Height of the base level, in pixels.
  pub height: u32,
  /// Minification filter.
  pub filter_min: MinFilter,
  /// Magnification filter.
  pub filter_mag: MagFilter,
  /// Wrapping along the horizontal axis.
  pub wrap_s: Wrap,
  /// Wrapping along the vertical axis.
  pub wrap_t: Wrap,
  /// Number of mip levels; `0` picks a default from `mipmap_mode` (full chain for
  /// [`MipmapMode::Auto`], a single level otherwise).
  pub mipmaps: u32,
  /// Mipmap maintenance mode.
  pub mipmap_mode: MipmapMode,
  /// Allocate a pixel-transfer buffer and route fills through it.
  pub stream: bool,
}

impl TextureParams {
  /// Parameters for a plain 2D texture of the given size.
  pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
    TextureParams {
      kind: TextureKind::TwoD,
      format,
      width,
      height,
      filter_min: MinFilter::Linear,
      filter_mag: MagFilter::Linear,
      wrap_s: Wrap::ClampToEdge,
      wrap_t: Wrap::ClampToEdge,
      mipmaps: 1,
      mipmap_mode: MipmapMode::Manual,
      stream: false,
    }
  }
}

/// Length of the longest possible mip chain for a base size.
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
  32 - width.max(height).max(1).leading_zeros()
}

/// Extent of one axis at a given mip level.
pub fn mip_extent(base: u32, level: u32) -> u32 {
  (base >> level).max(1)
}

/// A rectangle of pixels in client memory, used for fills and readback results.
#[derive(Clone, Debug, PartialEq)]
pub struct Pixmap {
  /// Width in pixels.
  pub width: u32,
  /// Height in pixels.
  pub height: u32,
  /// Format of `data`.
  pub format: PixelFormat,
  /// Tightly packed pixel rows, bottom row first.
  pub data: Vec<u8>,
}

impl Pixmap {
  /// Create a zero-filled pixmap.
  pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
    Pixmap {
      width,
      height,
      format,
      data: vec![0; width as usize * height as usize * format.pixel_size()],
    }
  }

  /// The byte length `data` must have for the dimensions and format.
  pub fn expected_len(&self) -> usize {
    self.width as usize * self.height as usize * self.format.pixel_size()
  }
}

/// Errors building a texture.
#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TextureError {
  /// Width or height was zero.
  InvalidSize {
    /// Requested width.
    width: u32,
    /// Requested height.
    height: u32,
  },
}

impl fmt::Display for TextureError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      TextureError::InvalidSize { width, height } => {
        write!(f, "invalid texture size: {}x{}", width, height)
      }
    }
  }
}

impl error::Error for TextureError {}

/// Renderer-side record of a live texture.
pub(crate) struct TextureEntry {
  pub raw: RawTexture,
  pub params: TextureParams,
  /// Unit currently carrying this texture, if any. Non-owning; the unit pool is authoritative.
  pub binding_unit: Option<usize>,
  /// Mip levels past the base no longer match the base level.
  pub mipmaps_outdated: bool,
  /// Pixel-transfer buffer for streamed fills.
  pub transfer_buffer: Option<RawBuffer>,
  pub debug_label: String,
}

impl TextureEntry {
  pub fn mip_size(&self, level: u32) -> (u32, u32) {
    (
      mip_extent(self.params.width, level),
      mip_extent(self.params.height, level),
    )
  }

  /// Whether sampling needs a mipmap regeneration pass first.
  pub fn needs_mipmap_refresh(&self) -> bool {
    self.mipmaps_outdated && self.params.mipmap_mode == MipmapMode::Auto && self.params.mipmaps > 1
  }
}

/// Checks deferred to debug builds on fill paths.
pub(crate) fn fill_region_is_valid(
  entry: &TextureEntry,
  level: u32,
  layer: u32,
  x: u32,
  y: u32,
  pixmap: &Pixmap,
) -> bool {
  let (mw, mh) = entry.mip_size(level);
  level < entry.params.mipmaps
    && layer < entry.params.kind.layers()
    && pixmap.format == entry.params.format
    && pixmap.data.len() == pixmap.expected_len()
    && x + pixmap.width <= mw
    && y + pixmap.height <= mh
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mip_chain_math() {
    assert_eq!(max_mip_levels(1, 1), 1);
    assert_eq!(max_mip_levels(256, 256), 9);
    assert_eq!(max_mip_levels(640, 480), 10);
    assert_eq!(mip_extent(640, 0), 640);
    assert_eq!(mip_extent(640, 4), 40);
    assert_eq!(mip_extent(1, 5), 1);
  }

  #[test]
  fn pixmap_sizing() {
    let p = Pixmap::new(16, 8, PixelFormat::Rgba8);
    assert_eq!(p.data.len(), 16 * 8 * 4);
    assert_eq!(p.expected_len(), p.data.len());
  }
}
