//! OpenGL ES profiles.
//!
//! Both profiles reuse [`Gl33Device`] for the actual GL traffic: the engine's ES targets run
//! through translation layers (ANGLE and friends) that resolve the desktop-named entry
//! points, so the call surface is identical and the differences reduce to the feature set
//! advertised and the quirks defaulted on. GLES 2.0 additionally loses sync objects, which
//! [`Gl33Device`] already degrades around.

use std::os::raw::c_void;

use glaze::blending::BlendMode;
use glaze::buffer::{BufferTarget, BufferUsage, IndexFormat};
use glaze::caps::{Capability, FeatureSet};
use glaze::color::Color;
use glaze::depth_test::DepthComparison;
use glaze::device::{
  Device, DeviceQuirks, FenceStatus, RawBuffer, RawFence, RawFramebuffer, RawProgram,
  RawShaderStage, RawTexture, RawVertexArray, UniformInfo,
};
use glaze::face_culling::FaceCullingMode;
use glaze::framebuffer::{Attachment, ClearFlags};
use glaze::rect::{IntRect, Rect};
use glaze::shader::{ProgramError, StageError, StageKind, UniformType};
use glaze::texture::{MagFilter, MinFilter, PixelFormat, TextureKind, Wrap};
use glaze::vertex_array::{Primitive, VertexAttribFormat};

use crate::gl33::Gl33Device;
use crate::BackendError;

/// Features a GLES 3.0 context offers. Everything except the sRGB write toggle, which ES
/// fixes at context creation.
pub(crate) const GLES30_FEATURES: FeatureSet =
  FeatureSet::ALL.difference(FeatureSet::SRGB_WRITES);

/// Features a GLES 2.0 context offers: none of the optional ones.
pub(crate) const GLES20_FEATURES: FeatureSet = FeatureSet::NONE;

/// An OpenGL ES 3.0 device.
pub struct Gles30Device {
  inner: Gl33Device,
}

impl Gles30Device {
  /// Load entry points through `loader` and probe the current context.
  pub fn new<F, S>(loader: F, drawable_size: S) -> Result<Self, BackendError>
  where
    F: FnMut(&'static str) -> *const c_void,
    S: FnMut() -> (u32, u32) + 'static,
  {
    gl::load_with(loader);
    let inner = Gl33Device::with_profile("OpenGL ES 3.0", GLES30_FEATURES, Box::new(drawable_size))?;
    Ok(Gles30Device { inner })
  }
}

/// An OpenGL ES 2.0 device.
///
/// Instancing, multiple render targets, partial mip ranges, depth-texture sampling and the
/// sRGB toggle are all absent; the renderer degrades each of those paths on its own once the
/// feature set says so.
pub struct Gles20Device {
  inner: Gl33Device,
}

impl Gles20Device {
  /// Load entry points through `loader` and probe the current context.
  pub fn new<F, S>(loader: F, drawable_size: S) -> Result<Self, BackendError>
  where
    F: FnMut(&'static str) -> *const c_void,
    S: FnMut() -> (u32, u32) + 'static,
  {
    gl::load_with(loader);
    let inner = Gl33Device::with_profile("OpenGL ES 2.0", GLES20_FEATURES, Box::new(drawable_size))?;
    Ok(Gles20Device { inner })
  }
}

// The ES profiles forward every call to the GL core. The one behavioral override lives
// in the macro body: ES has no FRAMEBUFFER_SRGB toggle, and with the feature masked off
// the renderer never issues the call anyway.
macro_rules! forward_device {
  ($device:ty) => {
    impl Device for $device {
      fn name(&self) -> &str {
        self.inner.name()
      }

      fn features(&self) -> FeatureSet {
        self.inner.features()
      }

      fn quirks(&self) -> DeviceQuirks {
        self.inner.quirks()
      }

      fn texture_unit_count(&mut self) -> usize {
        self.inner.texture_unit_count()
      }

      fn default_framebuffer_size(&mut self) -> (u32, u32) {
        self.inner.default_framebuffer_size()
      }

      fn apply_capability(&mut self, cap: Capability, enabled: bool) {
        self.inner.apply_capability(cap, enabled);
      }

      fn apply_viewport(&mut self, rect: Rect) {
        self.inner.apply_viewport(rect);
      }

      fn apply_scissor(&mut self, rect: IntRect) {
        self.inner.apply_scissor(rect);
      }

      fn apply_scissor_enabled(&mut self, enabled: bool) {
        self.inner.apply_scissor_enabled(enabled);
      }

      fn apply_blend_enabled(&mut self, enabled: bool) {
        self.inner.apply_blend_enabled(enabled);
      }

      fn apply_blend_mode(&mut self, mode: BlendMode) {
        self.inner.apply_blend_mode(mode);
      }

      fn apply_cull_mode(&mut self, mode: FaceCullingMode) {
        self.inner.apply_cull_mode(mode);
      }

      fn apply_depth_comparison(&mut self, cmp: DepthComparison) {
        self.inner.apply_depth_comparison(cmp);
      }

      fn apply_srgb_write(&mut self, _enabled: bool) {
        // No FRAMEBUFFER_SRGB in ES.
      }

      fn apply_clear_color(&mut self, color: Color) {
        self.inner.apply_clear_color(color);
      }

      fn apply_clear_depth(&mut self, depth: f32) {
        self.inner.apply_clear_depth(depth);
      }

      fn clear(&mut self, flags: ClearFlags) {
        self.inner.clear(flags);
      }

      fn create_texture(&mut self) -> RawTexture {
        self.inner.create_texture()
      }

      fn delete_texture(&mut self, raw: RawTexture) {
        self.inner.delete_texture(raw);
      }

      fn set_active_unit(&mut self, unit: usize) {
        self.inner.set_active_unit(unit);
      }

      fn bind_texture(&mut self, kind: TextureKind, raw: Option<RawTexture>) {
        self.inner.bind_texture(kind, raw);
      }

      fn set_texture_filter(&mut self, kind: TextureKind, min: MinFilter, mag: MagFilter) {
        self.inner.set_texture_filter(kind, min, mag);
      }

      fn set_texture_wrap(&mut self, kind: TextureKind, wrap_s: Wrap, wrap_t: Wrap) {
        self.inner.set_texture_wrap(kind, wrap_s, wrap_t);
      }

      fn set_texture_mip_range(&mut self, kind: TextureKind, base: u32, max: u32) {
        self.inner.set_texture_mip_range(kind, base, max);
      }

      fn texture_image(
        &mut self,
        kind: TextureKind,
        layer: u32,
        level: u32,
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
      ) {
        self.inner.texture_image(kind, layer, level, format, width, height, data);
      }

      #[allow(clippy::too_many_arguments)]
      fn texture_sub_image(
        &mut self,
        kind: TextureKind,
        layer: u32,
        level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Option<&[u8]>,
      ) {
        self
          .inner
          .texture_sub_image(kind, layer, level, x, y, width, height, format, data);
      }

      fn generate_mipmaps(&mut self, kind: TextureKind) {
        self.inner.generate_mipmaps(kind);
      }

      fn create_buffer(&mut self) -> RawBuffer {
        self.inner.create_buffer()
      }

      fn delete_buffer(&mut self, raw: RawBuffer) {
        self.inner.delete_buffer(raw);
      }

      fn bind_buffer(&mut self, target: BufferTarget, raw: Option<RawBuffer>) {
        self.inner.bind_buffer(target, raw);
      }

      fn buffer_data(
        &mut self,
        target: BufferTarget,
        size: usize,
        data: Option<&[u8]>,
        usage: BufferUsage,
      ) {
        self.inner.buffer_data(target, size, data, usage);
      }

      fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
        self.inner.buffer_sub_data(target, offset, data);
      }

      fn read_pack_buffer(&mut self, size: usize, out: &mut Vec<u8>) -> bool {
        self.inner.read_pack_buffer(size, out)
      }

      fn create_framebuffer(&mut self) -> RawFramebuffer {
        self.inner.create_framebuffer()
      }

      fn delete_framebuffer(&mut self, raw: RawFramebuffer) {
        self.inner.delete_framebuffer(raw);
      }

      fn bind_draw_framebuffer(&mut self, raw: Option<RawFramebuffer>) {
        self.inner.bind_draw_framebuffer(raw);
      }

      fn bind_read_framebuffer(&mut self, raw: Option<RawFramebuffer>, attachment: Attachment) {
        self.inner.bind_read_framebuffer(raw, attachment);
      }

      fn framebuffer_texture(&mut self, slot: Attachment, raw: Option<RawTexture>, level: u32) {
        self.inner.framebuffer_texture(slot, raw, level);
      }

      fn set_draw_buffers(&mut self, outputs: &[Option<usize>]) {
        self.inner.set_draw_buffers(outputs);
      }

      fn read_pixels_to_pack_buffer(&mut self, region: IntRect, format: PixelFormat) {
        self.inner.read_pixels_to_pack_buffer(region, format);
      }

      fn create_shader_stage(
        &mut self,
        kind: StageKind,
        source: &str,
      ) -> Result<RawShaderStage, StageError> {
        self.inner.create_shader_stage(kind, source)
      }

      fn delete_shader_stage(&mut self, raw: RawShaderStage) {
        self.inner.delete_shader_stage(raw);
      }

      fn link_program(&mut self, stages: &[RawShaderStage]) -> Result<RawProgram, ProgramError> {
        self.inner.link_program(stages)
      }

      fn delete_program(&mut self, raw: RawProgram) {
        self.inner.delete_program(raw);
      }

      fn use_program(&mut self, raw: Option<RawProgram>) {
        self.inner.use_program(raw);
      }

      fn active_uniforms(&mut self, raw: RawProgram) -> Vec<UniformInfo> {
        self.inner.active_uniforms(raw)
      }

      fn upload_uniform_floats(&mut self, location: i32, ty: UniformType, data: &[f32]) {
        self.inner.upload_uniform_floats(location, ty, data);
      }

      fn upload_uniform_ints(&mut self, location: i32, ty: UniformType, data: &[i32]) {
        self.inner.upload_uniform_ints(location, ty, data);
      }

      fn create_vertex_array(&mut self) -> RawVertexArray {
        self.inner.create_vertex_array()
      }

      fn delete_vertex_array(&mut self, raw: RawVertexArray) {
        self.inner.delete_vertex_array(raw);
      }

      fn bind_vertex_array(&mut self, raw: Option<RawVertexArray>) {
        self.inner.bind_vertex_array(raw);
      }

      fn set_vertex_attribute(&mut self, index: usize, format: &VertexAttribFormat) {
        self.inner.set_vertex_attribute(index, format);
      }

      fn disable_vertex_attribute(&mut self, index: usize) {
        self.inner.disable_vertex_attribute(index);
      }

      fn draw_arrays(&mut self, primitive: Primitive, first: usize, count: usize, instances: usize) {
        self.inner.draw_arrays(primitive, first, count, instances);
      }

      fn draw_elements(
        &mut self,
        primitive: Primitive,
        count: usize,
        format: IndexFormat,
        byte_offset: usize,
        instances: usize,
      ) {
        self.inner.draw_elements(primitive, count, format, byte_offset, instances);
      }

      fn create_fence(&mut self) -> RawFence {
        self.inner.create_fence()
      }

      fn wait_fence(&mut self, fence: RawFence, flush: bool, timeout_ns: u64) -> FenceStatus {
        self.inner.wait_fence(fence, flush, timeout_ns)
      }

      fn delete_fence(&mut self, fence: RawFence) {
        self.inner.delete_fence(fence);
      }
    }
  };
}

forward_device!(Gles30Device);
forward_device!(Gles20Device);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn es30_loses_only_the_srgb_toggle() {
    assert!(!GLES30_FEATURES.contains(FeatureSet::SRGB_WRITES));
    assert!(GLES30_FEATURES.contains(FeatureSet::INSTANCED_DRAWS));
    assert!(GLES30_FEATURES.contains(FeatureSet::MULTIPLE_RENDER_TARGETS));
    assert!(GLES30_FEATURES.contains(FeatureSet::DEPTH_TEXTURES));
    assert!(GLES30_FEATURES.contains(FeatureSet::PARTIAL_MIPMAPS));
  }

  #[test]
  fn es20_advertises_nothing_optional() {
    assert!(GLES20_FEATURES.is_empty());
  }
}
