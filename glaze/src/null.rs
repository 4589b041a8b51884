//! The null backend.
//!
//! Accepts every call and renders nothing. Useful for headless runs, benchmarks of the
//! frontend bookkeeping and as the substrate of call-recording test devices. Raw handles are
//! monotonic counters so identity-based logic upstream behaves exactly as it would on real
//! hardware.

use crate::blending::BlendMode;
use crate::buffer::{BufferTarget, BufferUsage, IndexFormat};
use crate::caps::{Capability, FeatureSet};
use crate::color::Color;
use crate::depth_test::DepthComparison;
use crate::device::{
  Device, DeviceQuirks, FenceStatus, RawBuffer, RawFence, RawFramebuffer, RawProgram,
  RawShaderStage, RawTexture, RawVertexArray, UniformInfo,
};
use crate::face_culling::FaceCullingMode;
use crate::framebuffer::{Attachment, ClearFlags};
use crate::rect::{IntRect, Rect};
use crate::shader::{ProgramError, StageError, StageKind, UniformType};
use crate::texture::{MagFilter, MinFilter, PixelFormat, TextureKind, Wrap};
use crate::vertex_array::{Primitive, VertexAttribFormat};

/// A device that does nothing.
pub struct NullDevice {
  next_name: u32,
  next_fence: u64,
  drawable: (u32, u32),
  units: usize,
  features: FeatureSet,
  quirks: DeviceQuirks,
}

impl NullDevice {
  pub fn new() -> Self {
    NullDevice {
      next_name: 1,
      next_fence: 1,
      drawable: (800, 600),
      units: 32,
      features: FeatureSet::ALL,
      quirks: DeviceQuirks::default(),
    }
  }

  /// Size reported for the default framebuffer.
  pub fn with_drawable_size(mut self, width: u32, height: u32) -> Self {
    self.drawable = (width, height);
    self
  }

  /// Number of texture units reported.
  pub fn with_texture_units(mut self, units: usize) -> Self {
    self.units = units;
    self
  }

  pub fn with_features(mut self, features: FeatureSet) -> Self {
    self.features = features;
    self
  }

  pub fn with_quirks(mut self, quirks: DeviceQuirks) -> Self {
    self.quirks = quirks;
    self
  }

  fn next_name(&mut self) -> u32 {
    let name = self.next_name;
    self.next_name += 1;
    name
  }
}

impl Default for NullDevice {
  fn default() -> Self {
    Self::new()
  }
}

impl Device for NullDevice {
  fn name(&self) -> &str {
    "null"
  }

  fn features(&self) -> FeatureSet {
    self.features
  }

  fn quirks(&self) -> DeviceQuirks {
    self.quirks
  }

  fn texture_unit_count(&mut self) -> usize {
    self.units
  }

  fn default_framebuffer_size(&mut self) -> (u32, u32) {
    self.drawable
  }

  fn apply_capability(&mut self, _cap: Capability, _enabled: bool) {}
  fn apply_viewport(&mut self, _rect: Rect) {}
  fn apply_scissor(&mut self, _rect: IntRect) {}
  fn apply_scissor_enabled(&mut self, _enabled: bool) {}
  fn apply_blend_enabled(&mut self, _enabled: bool) {}
  fn apply_blend_mode(&mut self, _mode: BlendMode) {}
  fn apply_cull_mode(&mut self, _mode: FaceCullingMode) {}
  fn apply_depth_comparison(&mut self, _cmp: DepthComparison) {}
  fn apply_srgb_write(&mut self, _enabled: bool) {}
  fn apply_clear_color(&mut self, _color: Color) {}
  fn apply_clear_depth(&mut self, _depth: f32) {}
  fn clear(&mut self, _flags: ClearFlags) {}

  fn create_texture(&mut self) -> RawTexture {
    RawTexture(self.next_name())
  }

  fn delete_texture(&mut self, _raw: RawTexture) {}
  fn set_active_unit(&mut self, _unit: usize) {}
  fn bind_texture(&mut self, _kind: TextureKind, _raw: Option<RawTexture>) {}
  fn set_texture_filter(&mut self, _kind: TextureKind, _min: MinFilter, _mag: MagFilter) {}
  fn set_texture_wrap(&mut self, _kind: TextureKind, _wrap_s: Wrap, _wrap_t: Wrap) {}
  fn set_texture_mip_range(&mut self, _kind: TextureKind, _base: u32, _max: u32) {}

  fn texture_image(
    &mut self,
    _kind: TextureKind,
    _layer: u32,
    _level: u32,
    _format: PixelFormat,
    _width: u32,
    _height: u32,
    _data: Option<&[u8]>,
  ) {
  }

  fn texture_sub_image(
    &mut self,
    _kind: TextureKind,
    _layer: u32,
    _level: u32,
    _x: u32,
    _y: u32,
    _width: u32,
    _height: u32,
    _format: PixelFormat,
    _data: Option<&[u8]>,
  ) {
  }

  fn generate_mipmaps(&mut self, _kind: TextureKind) {}

  fn create_buffer(&mut self) -> RawBuffer {
    RawBuffer(self.next_name())
  }

  fn delete_buffer(&mut self, _raw: RawBuffer) {}
  fn bind_buffer(&mut self, _target: BufferTarget, _raw: Option<RawBuffer>) {}

  fn buffer_data(
    &mut self,
    _target: BufferTarget,
    _size: usize,
    _data: Option<&[u8]>,
    _usage: BufferUsage,
  ) {
  }

  fn buffer_sub_data(&mut self, _target: BufferTarget, _offset: usize, _data: &[u8]) {}

  fn read_pack_buffer(&mut self, size: usize, out: &mut Vec<u8>) -> bool {
    out.clear();
    out.resize(size, 0);
    true
  }

  fn create_framebuffer(&mut self) -> RawFramebuffer {
    RawFramebuffer(self.next_name())
  }

  fn delete_framebuffer(&mut self, _raw: RawFramebuffer) {}
  fn bind_draw_framebuffer(&mut self, _raw: Option<RawFramebuffer>) {}
  fn bind_read_framebuffer(&mut self, _raw: Option<RawFramebuffer>, _attachment: Attachment) {}
  fn framebuffer_texture(&mut self, _slot: Attachment, _raw: Option<RawTexture>, _level: u32) {}
  fn set_draw_buffers(&mut self, _outputs: &[Option<usize>]) {}
  fn read_pixels_to_pack_buffer(&mut self, _region: IntRect, _format: PixelFormat) {}

  fn create_shader_stage(
    &mut self,
    _kind: StageKind,
    _source: &str,
  ) -> Result<RawShaderStage, StageError> {
    Ok(RawShaderStage(self.next_name()))
  }

  fn delete_shader_stage(&mut self, _raw: RawShaderStage) {}

  fn link_program(&mut self, _stages: &[RawShaderStage]) -> Result<RawProgram, ProgramError> {
    Ok(RawProgram(self.next_name()))
  }

  fn delete_program(&mut self, _raw: RawProgram) {}
  fn use_program(&mut self, _raw: Option<RawProgram>) {}

  fn active_uniforms(&mut self, _raw: RawProgram) -> Vec<UniformInfo> {
    Vec::new()
  }

  fn upload_uniform_floats(&mut self, _location: i32, _ty: UniformType, _data: &[f32]) {}
  fn upload_uniform_ints(&mut self, _location: i32, _ty: UniformType, _data: &[i32]) {}

  fn create_vertex_array(&mut self) -> RawVertexArray {
    RawVertexArray(self.next_name())
  }

  fn delete_vertex_array(&mut self, _raw: RawVertexArray) {}
  fn bind_vertex_array(&mut self, _raw: Option<RawVertexArray>) {}
  fn set_vertex_attribute(&mut self, _index: usize, _format: &VertexAttribFormat) {}
  fn disable_vertex_attribute(&mut self, _index: usize) {}

  fn draw_arrays(&mut self, _primitive: Primitive, _first: usize, _count: usize, _instances: usize) {
  }

  fn draw_elements(
    &mut self,
    _primitive: Primitive,
    _count: usize,
    _format: IndexFormat,
    _byte_offset: usize,
    _instances: usize,
  ) {
  }

  fn create_fence(&mut self) -> RawFence {
    let fence = RawFence(self.next_fence);
    self.next_fence += 1;
    fence
  }

  fn wait_fence(&mut self, _fence: RawFence, _flush: bool, _timeout_ns: u64) -> FenceStatus {
    FenceStatus::AlreadySignaled
  }

  fn delete_fence(&mut self, _fence: RawFence) {}
}
