//! Shader programs and the uniform value cache.
//!
//! A linked program owns one [`Uniform`] descriptor per active uniform. Each descriptor keeps
//! two copies of the value, the pending one written by setters and the committed one that
//! hardware last received, along with a dirty element range so an upload covers exactly the
//! part of an array that changed since the last draw.
//!
//! A handful of reserved names, the magic uniforms, are filled in by the renderer on every
//! draw instead of by client code. Their types are checked at link time.

use std::collections::HashMap;
use std::error;
use std::fmt;

use crate::device::{Device, RawProgram};
use crate::handle::TextureId;
use crate::texture::TextureKind;

/// A shader stage kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StageKind {
  /// Vertex shader.
  Vertex,
  /// Fragment shader.
  Fragment,
}

impl fmt::Display for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      StageKind::Vertex => f.write_str("vertex shader"),
      StageKind::Fragment => f.write_str("fragment shader"),
    }
  }
}

/// Type of a shader uniform, as reflected from the linked program.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UniformType {
  Float,
  Vec2,
  Vec3,
  Vec4,
  Int,
  IVec2,
  IVec3,
  IVec4,
  Mat3,
  Mat4,
  Sampler2D,
  SamplerCube,
}

impl UniformType {
  /// Number of scalars a single array element occupies.
  pub const fn element_len(self) -> usize {
    match self {
      UniformType::Float | UniformType::Int => 1,
      UniformType::Vec2 | UniformType::IVec2 => 2,
      UniformType::Vec3 | UniformType::IVec3 => 3,
      UniformType::Vec4 | UniformType::IVec4 => 4,
      UniformType::Mat3 => 9,
      UniformType::Mat4 => 16,
      UniformType::Sampler2D | UniformType::SamplerCube => 1,
    }
  }

  /// Whether values are carried as floats; the rest are int-backed.
  pub const fn is_float_backed(self) -> bool {
    matches!(
      self,
      UniformType::Float
        | UniformType::Vec2
        | UniformType::Vec3
        | UniformType::Vec4
        | UniformType::Mat3
        | UniformType::Mat4
    )
  }

  /// Whether this is a sampler type.
  pub const fn is_sampler(self) -> bool {
    matches!(self, UniformType::Sampler2D | UniformType::SamplerCube)
  }

  /// The texture kind a sampler of this type accepts.
  pub const fn sampler_kind(self) -> Option<TextureKind> {
    match self {
      UniformType::Sampler2D => Some(TextureKind::TwoD),
      UniformType::SamplerCube => Some(TextureKind::CubeMap),
      _ => None,
    }
  }
}

impl fmt::Display for UniformType {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let name = match self {
      UniformType::Float => "float",
      UniformType::Vec2 => "vec2",
      UniformType::Vec3 => "vec3",
      UniformType::Vec4 => "vec4",
      UniformType::Int => "int",
      UniformType::IVec2 => "ivec2",
      UniformType::IVec3 => "ivec3",
      UniformType::IVec4 => "ivec4",
      UniformType::Mat3 => "mat3",
      UniformType::Mat4 => "mat4",
      UniformType::Sampler2D => "sampler2D",
      UniformType::SamplerCube => "samplerCube",
    };

    f.write_str(name)
  }
}

/// A 4×4 matrix in column-major order, the layout uniform uploads expect.
pub type Mat4 = [[f32; 4]; 4];

/// The identity [`Mat4`].
pub const MAT4_IDENTITY: Mat4 = [
  [1., 0., 0., 0.],
  [0., 1., 0., 0.],
  [0., 0., 1., 0.],
  [0., 0., 0., 1.],
];

pub(crate) fn mat4_scalars(m: &Mat4) -> [f32; 16] {
  let mut out = [0.; 16];

  for (col, column) in m.iter().enumerate() {
    out[col * 4..col * 4 + 4].copy_from_slice(column);
  }

  out
}

/// Uniforms the renderer fills in automatically on every draw.
///
/// A program doesn’t have to declare any of them, but if it declares one under the reserved
/// name, the type must match or linking fails.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MagicUniform {
  /// `gz_modelViewMatrix: mat4`.
  ModelViewMatrix,
  /// `gz_projectionMatrix: mat4`.
  ProjectionMatrix,
  /// `gz_textureMatrix: mat4`.
  TextureMatrix,
  /// `gz_color: vec4`.
  Color,
  /// `gz_viewport: vec4`, as `(x, y, width, height)`.
  Viewport,
  /// `gz_colorOutputSizes: vec2[]`, pixel size per color output.
  ColorOutputSizes,
  /// `gz_depthOutputSize: vec2`.
  DepthOutputSize,
}

impl MagicUniform {
  pub const COUNT: usize = 7;

  pub const ALL: [MagicUniform; Self::COUNT] = [
    MagicUniform::ModelViewMatrix,
    MagicUniform::ProjectionMatrix,
    MagicUniform::TextureMatrix,
    MagicUniform::Color,
    MagicUniform::Viewport,
    MagicUniform::ColorOutputSizes,
    MagicUniform::DepthOutputSize,
  ];

  /// The reserved uniform name.
  pub const fn name(self) -> &'static str {
    match self {
      MagicUniform::ModelViewMatrix => "gz_modelViewMatrix",
      MagicUniform::ProjectionMatrix => "gz_projectionMatrix",
      MagicUniform::TextureMatrix => "gz_textureMatrix",
      MagicUniform::Color => "gz_color",
      MagicUniform::Viewport => "gz_viewport",
      MagicUniform::ColorOutputSizes => "gz_colorOutputSizes",
      MagicUniform::DepthOutputSize => "gz_depthOutputSize",
    }
  }

  /// The type the program must declare the uniform with.
  pub const fn expected_type(self) -> UniformType {
    match self {
      MagicUniform::ModelViewMatrix
      | MagicUniform::ProjectionMatrix
      | MagicUniform::TextureMatrix => UniformType::Mat4,
      MagicUniform::Color | MagicUniform::Viewport => UniformType::Vec4,
      MagicUniform::ColorOutputSizes | MagicUniform::DepthOutputSize => UniformType::Vec2,
    }
  }

  pub(crate) const fn index(self) -> usize {
    match self {
      MagicUniform::ModelViewMatrix => 0,
      MagicUniform::ProjectionMatrix => 1,
      MagicUniform::TextureMatrix => 2,
      MagicUniform::Color => 3,
      MagicUniform::Viewport => 4,
      MagicUniform::ColorOutputSizes => 5,
      MagicUniform::DepthOutputSize => 6,
    }
  }

  pub(crate) fn from_name(name: &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|m| m.name() == name)
  }
}

/// Error while compiling a single shader stage.
#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StageError {
  /// The stage failed to compile; the payload is the driver’s info log.
  CompileFailed { kind: StageKind, log: String },
}

impl fmt::Display for StageError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      StageError::CompileFailed { kind, log } => {
        write!(f, "{} failed to compile: {}", kind, log)
      }
    }
  }
}

impl error::Error for StageError {}

/// Error while building a shader program.
#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgramError {
  /// The program failed to link; the payload is the driver’s info log.
  LinkFailed(String),
  /// A reserved uniform name was declared with the wrong type.
  MagicTypeMismatch {
    name: &'static str,
    expected: UniformType,
    found: UniformType,
  },
  /// A stage failed to compile.
  Stage(StageError),
}

impl fmt::Display for ProgramError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ProgramError::LinkFailed(log) => write!(f, "program failed to link: {}", log),

      ProgramError::MagicTypeMismatch {
        name,
        expected,
        found,
      } => write!(
        f,
        "uniform {} must be declared as {}, found {}",
        name, expected, found
      ),

      ProgramError::Stage(e) => write!(f, "{}", e),
    }
  }
}

impl error::Error for ProgramError {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match self {
      ProgramError::Stage(e) => Some(e),
      _ => None,
    }
  }
}

impl From<StageError> for ProgramError {
  fn from(e: StageError) -> Self {
    ProgramError::Stage(e)
  }
}

/// Value storage of one uniform, pending and committed sides.
#[derive(Debug)]
pub(crate) enum UniformStore {
  Floats { pending: Vec<f32>, committed: Vec<f32> },
  Ints { pending: Vec<i32>, committed: Vec<i32> },
}

/// One active uniform of a linked program.
///
/// The committed side starts out zeroed, which is what a freshly linked program holds, so the
/// first commit only uploads values that were actually set.
#[derive(Debug)]
pub(crate) struct Uniform {
  pub name: String,
  pub location: i32,
  pub ty: UniformType,
  pub array_size: usize,
  pub store: UniformStore,
  /// First dirty array element, inclusive. Empty range iff `update_first >= update_last`.
  pub update_first: usize,
  /// Last dirty array element, exclusive.
  pub update_last: usize,
  /// For samplers: the texture requested per array element.
  pub textures: Vec<Option<TextureId>>,
  /// Index of the companion `<name>_SIZE` uniform, linked after reflection.
  pub size_uniform: Option<usize>,
}

impl Uniform {
  pub fn new(name: String, location: i32, ty: UniformType, array_size: usize) -> Self {
    let array_size = array_size.max(1);
    let scalars = array_size * ty.element_len();

    let store = if ty.is_float_backed() {
      UniformStore::Floats {
        pending: vec![0.; scalars],
        committed: vec![0.; scalars],
      }
    } else {
      UniformStore::Ints {
        pending: vec![0; scalars],
        committed: vec![0; scalars],
      }
    };

    let textures = if ty.is_sampler() {
      vec![None; array_size]
    } else {
      Vec::new()
    };

    Uniform {
      name,
      location,
      ty,
      array_size,
      store,
      update_first: array_size,
      update_last: 0,
      textures,
      size_uniform: None,
    }
  }

  pub fn is_dirty(&self) -> bool {
    self.update_first < self.update_last
  }

  fn widen_dirty(&mut self, first: usize, last: usize) {
    self.update_first = self.update_first.min(first);
    self.update_last = self.update_last.max(last);
  }

  fn reset_dirty(&mut self) {
    self.update_first = self.array_size;
    self.update_last = 0;
  }

  /// Stage float scalars starting at array element `first`. Writes identical to the pending
  /// side are dropped without dirtying anything. Returns how many elements were accepted.
  pub fn write_floats(&mut self, first: usize, data: &[f32]) -> usize {
    let elem = self.ty.element_len();
    let avail = self.array_size.saturating_sub(first);
    let count = (data.len() / elem).min(avail);

    if count == 0 {
      return 0;
    }

    let span = first * elem..(first + count) * elem;
    let data = &data[..count * elem];

    if let UniformStore::Floats { pending, .. } = &mut self.store {
      if pending[span.clone()] != *data {
        pending[span].copy_from_slice(data);
        self.widen_dirty(first, first + count);
      }
    }

    count
  }

  /// Stage int scalars starting at array element `first`, like [`write_floats`].
  ///
  /// [`write_floats`]: Uniform::write_floats
  pub fn write_ints(&mut self, first: usize, data: &[i32]) -> usize {
    let elem = self.ty.element_len();
    let avail = self.array_size.saturating_sub(first);
    let count = (data.len() / elem).min(avail);

    if count == 0 {
      return 0;
    }

    let span = first * elem..(first + count) * elem;
    let data = &data[..count * elem];

    if let UniformStore::Ints { pending, .. } = &mut self.store {
      if pending[span.clone()] != *data {
        pending[span].copy_from_slice(data);
        self.widen_dirty(first, first + count);
      }
    }

    count
  }

  /// Upload the dirty range if the pending values actually differ from the committed ones.
  ///
  /// The range is trimmed from both ends at element granularity, so a wide dirty range whose
  /// edges turned out unchanged still uploads the minimal span. Returns whether an upload
  /// happened.
  pub fn commit(&mut self, device: &mut dyn Device) -> bool {
    if !self.is_dirty() {
      return false;
    }

    let elem = self.ty.element_len();
    let (mut first, mut last) = (self.update_first, self.update_last);

    let differs = |pending: &[f32], committed: &[f32], e: usize| {
      pending[e * elem..(e + 1) * elem] != committed[e * elem..(e + 1) * elem]
    };
    let idiffers = |pending: &[i32], committed: &[i32], e: usize| {
      pending[e * elem..(e + 1) * elem] != committed[e * elem..(e + 1) * elem]
    };

    match &self.store {
      UniformStore::Floats { pending, committed } => {
        while first < last && !differs(pending, committed, first) {
          first += 1;
        }
        while last > first && !differs(pending, committed, last - 1) {
          last -= 1;
        }
      }

      UniformStore::Ints { pending, committed } => {
        while first < last && !idiffers(pending, committed, first) {
          first += 1;
        }
        while last > first && !idiffers(pending, committed, last - 1) {
          last -= 1;
        }
      }
    }

    self.reset_dirty();

    if first >= last {
      return false;
    }

    let span = first * elem..last * elem;
    let location = self.location + first as i32;

    match &mut self.store {
      UniformStore::Floats { pending, committed } => {
        device.upload_uniform_floats(location, self.ty, &pending[span.clone()]);
        committed[span.clone()].copy_from_slice(&pending[span]);
      }

      UniformStore::Ints { pending, committed } => {
        device.upload_uniform_ints(location, self.ty, &pending[span.clone()]);
        committed[span.clone()].copy_from_slice(&pending[span]);
      }
    }

    true
  }

  /// Record the textures a sampler uniform should expose, starting at array element `first`.
  /// The int values are resolved to unit indices later, during state synchronization.
  pub fn set_textures(&mut self, first: usize, textures: &[Option<TextureId>]) -> usize {
    let avail = self.array_size.saturating_sub(first);
    let count = textures.len().min(avail);

    self.textures[first..first + count].copy_from_slice(&textures[..count]);
    count
  }

  /// Null every sampler slot referencing `texture`. Returns whether any slot changed.
  pub fn clear_texture(&mut self, texture: TextureId) -> bool {
    let mut changed = false;

    for slot in &mut self.textures {
      if *slot == Some(texture) {
        *slot = None;
        changed = true;
      }
    }

    changed
  }
}

/// Strip the `[0]` suffix drivers append to array uniform names.
pub(crate) fn base_name(name: &str) -> &str {
  name.strip_suffix("[0]").unwrap_or(name)
}

/// Renderer-side record of a linked program.
pub(crate) struct ProgramEntry {
  pub raw: RawProgram,
  pub uniforms: Vec<Uniform>,
  pub by_name: HashMap<String, usize>,
  /// Magic uniform index into `uniforms`, slot per [`MagicUniform`].
  pub magic: [Option<usize>; MagicUniform::COUNT],
  pub debug_label: String,
}

impl ProgramEntry {
  pub fn uniform_index(&self, name: &str) -> Option<usize> {
    self.by_name.get(name).copied()
  }

  pub fn magic_index(&self, magic: MagicUniform) -> Option<usize> {
    self.magic[magic.index()]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::RecordingDevice;

  #[test]
  fn writes_track_a_minimal_dirty_range() {
    let mut u = Uniform::new("tints".to_string(), 3, UniformType::Vec4, 8);
    assert!(!u.is_dirty());

    assert_eq!(u.write_floats(2, &[1.; 8]), 2);
    assert_eq!((u.update_first, u.update_last), (2, 4));

    assert_eq!(u.write_floats(6, &[2.; 4]), 1);
    assert_eq!((u.update_first, u.update_last), (2, 7));

    // Rewriting identical data must not dirty anything.
    u.reset_dirty();
    u.write_floats(2, &[1.; 8]);
    assert!(!u.is_dirty());
  }

  #[test]
  fn writes_past_the_end_are_clamped() {
    let mut u = Uniform::new("weights".to_string(), 0, UniformType::Float, 4);

    assert_eq!(u.write_floats(2, &[1., 2., 3., 4.]), 2);
    assert_eq!((u.update_first, u.update_last), (2, 4));
    assert_eq!(u.write_floats(4, &[9.]), 0);
  }

  #[test]
  fn commit_uploads_the_dirty_range_once() {
    let mut device = RecordingDevice::new();
    let log = device.log_handle();

    let mut u = Uniform::new("tints".to_string(), 3, UniformType::Vec4, 8);
    u.write_floats(2, &[1.; 8]);

    assert!(u.commit(&mut device));
    assert!(!u.commit(&mut device));

    let log = log.borrow();
    let uploads: Vec<_> = log
      .iter()
      .filter(|l| l.starts_with("upload_uniform_floats"))
      .collect();

    // Location 3 + first element 2, two vec4s.
    assert_eq!(uploads, vec!["upload_uniform_floats 5 vec4 x8"]);
  }

  #[test]
  fn commit_trims_unchanged_edges() {
    let mut device = RecordingDevice::new();
    let log = device.log_handle();

    let mut u = Uniform::new("flags".to_string(), 0, UniformType::Int, 6);
    u.write_ints(0, &[0, 0, 7, 0, 0, 0]);

    assert!(u.commit(&mut device));

    let log = log.borrow();
    let uploads: Vec<_> = log
      .iter()
      .filter(|l| l.starts_with("upload_uniform_ints"))
      .collect();

    assert_eq!(uploads, vec!["upload_uniform_ints 2 int x1"]);
  }

  #[test]
  fn magic_names_resolve_with_matching_types() {
    for magic in MagicUniform::ALL {
      assert_eq!(MagicUniform::from_name(magic.name()), Some(magic));
    }

    assert_eq!(MagicUniform::from_name("gz_bogus"), None);
    assert_eq!(
      MagicUniform::ModelViewMatrix.expected_type(),
      UniformType::Mat4
    );
  }

  #[test]
  fn array_suffix_is_stripped() {
    assert_eq!(base_name("lights[0]"), "lights");
    assert_eq!(base_name("lights"), "lights");
    assert_eq!(base_name("lights[1]"), "lights[1]");
  }
}
