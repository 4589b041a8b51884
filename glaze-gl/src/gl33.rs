//! OpenGL 3.3 core profile backend.
//!
//! [`Gl33Device`] is a direct translation of the [`Device`] interface onto the `gl` crate.
//! It carries no state of its own beyond fence bookkeeping; every diffing decision has
//! already been made by the renderer, so each method body is one or two GL calls plus enum
//! conversion.

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;

use gl::types::*;
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
use glaze::vertex_array::{AttributeConversion, Primitive, VertexAttribFormat};
use log::{debug, warn};

use crate::conv;
use crate::BackendError;

/// An OpenGL 3.3 core profile device.
///
/// The context must be current on the calling thread for the lifetime of the device; the
/// device is deliberately neither `Send` nor `Sync`.
pub struct Gl33Device {
  name: String,
  features: FeatureSet,
  quirks: DeviceQuirks,
  drawable_size: Box<dyn FnMut() -> (u32, u32)>,
  fences: HashMap<u64, GLsync>,
  next_fence: u64,
}

impl Gl33Device {
  /// Load GL entry points through `loader` and probe the current context.
  ///
  /// `drawable_size` reports the pixel size of the default framebuffer; the window layer
  /// owns that number and it is re-read every frame.
  pub fn new<F, S>(loader: F, drawable_size: S) -> Result<Self, BackendError>
  where
    F: FnMut(&'static str) -> *const c_void,
    S: FnMut() -> (u32, u32) + 'static,
  {
    gl::load_with(loader);
    Self::with_profile("OpenGL 3.3", FeatureSet::ALL, Box::new(drawable_size))
  }

  /// Build a device over already loaded entry points, advertising `features`.
  pub(crate) fn with_profile(
    profile: &str,
    features: FeatureSet,
    drawable_size: Box<dyn FnMut() -> (u32, u32)>,
  ) -> Result<Self, BackendError> {
    if !gl::GetString::is_loaded() {
      return Err(BackendError::NoActiveContext);
    }

    let version = get_string(gl::VERSION).ok_or(BackendError::NoActiveContext)?;
    let renderer = get_string(gl::RENDERER).unwrap_or_default();
    let quirks = detect_quirks(&renderer);
    debug!("{} context: {} on {}", profile, version, renderer);

    // The core tracks tightly packed rows everywhere.
    unsafe {
      gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
      gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
    }

    Ok(Gl33Device {
      name: format!("{} ({})", profile, renderer),
      features,
      quirks,
      drawable_size,
      fences: HashMap::new(),
      next_fence: 1,
    })
  }
}

impl Device for Gl33Device {
  fn name(&self) -> &str {
    &self.name
  }

  fn features(&self) -> FeatureSet {
    self.features
  }

  fn quirks(&self) -> DeviceQuirks {
    self.quirks
  }

  fn texture_unit_count(&mut self) -> usize {
    let mut units: GLint = 0;
    unsafe { gl::GetIntegerv(gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS, &mut units) };
    units.max(0) as usize
  }

  fn default_framebuffer_size(&mut self) -> (u32, u32) {
    (self.drawable_size)()
  }

  fn apply_capability(&mut self, cap: Capability, enabled: bool) {
    unsafe {
      match cap {
        Capability::DepthTest => toggle(gl::DEPTH_TEST, enabled),
        // Depth writes are a mask, not a glEnable capability.
        Capability::DepthWrite => gl::DepthMask(gl_bool(enabled)),
        Capability::CullFace => toggle(gl::CULL_FACE, enabled),
      }
    }
  }

  fn apply_viewport(&mut self, rect: Rect) {
    unsafe {
      gl::Viewport(
        rect.x.round() as GLint,
        rect.y.round() as GLint,
        rect.width.round() as GLsizei,
        rect.height.round() as GLsizei,
      );
    }
  }

  fn apply_scissor(&mut self, rect: IntRect) {
    unsafe { gl::Scissor(rect.x, rect.y, rect.width, rect.height) };
  }

  fn apply_scissor_enabled(&mut self, enabled: bool) {
    unsafe { toggle(gl::SCISSOR_TEST, enabled) };
  }

  fn apply_blend_enabled(&mut self, enabled: bool) {
    unsafe { toggle(gl::BLEND, enabled) };
  }

  fn apply_blend_mode(&mut self, mode: BlendMode) {
    unsafe {
      gl::BlendEquationSeparate(
        conv::blending_equation_to_glenum(mode.color.equation),
        conv::blending_equation_to_glenum(mode.alpha.equation),
      );
      gl::BlendFuncSeparate(
        conv::blending_factor_to_glenum(mode.color.src),
        conv::blending_factor_to_glenum(mode.color.dst),
        conv::blending_factor_to_glenum(mode.alpha.src),
        conv::blending_factor_to_glenum(mode.alpha.dst),
      );
    }
  }

  fn apply_cull_mode(&mut self, mode: FaceCullingMode) {
    unsafe { gl::CullFace(conv::face_culling_mode_to_glenum(mode)) };
  }

  fn apply_depth_comparison(&mut self, cmp: DepthComparison) {
    unsafe { gl::DepthFunc(conv::depth_comparison_to_glenum(cmp)) };
  }

  fn apply_srgb_write(&mut self, enabled: bool) {
    unsafe { toggle(gl::FRAMEBUFFER_SRGB, enabled) };
  }

  fn apply_clear_color(&mut self, color: Color) {
    unsafe { gl::ClearColor(color.r, color.g, color.b, color.a) };
  }

  fn apply_clear_depth(&mut self, depth: f32) {
    unsafe { gl::ClearDepth(depth as GLdouble) };
  }

  fn clear(&mut self, flags: ClearFlags) {
    let mut bits: GLbitfield = 0;
    if flags.contains(ClearFlags::COLOR) {
      bits |= gl::COLOR_BUFFER_BIT;
    }
    if flags.contains(ClearFlags::DEPTH) {
      bits |= gl::DEPTH_BUFFER_BIT;
    }
    if bits != 0 {
      unsafe { gl::Clear(bits) };
    }
  }

  fn create_texture(&mut self) -> RawTexture {
    let mut raw: GLuint = 0;
    unsafe { gl::GenTextures(1, &mut raw) };
    RawTexture(raw)
  }

  fn delete_texture(&mut self, raw: RawTexture) {
    unsafe { gl::DeleteTextures(1, &raw.0) };
  }

  fn set_active_unit(&mut self, unit: usize) {
    unsafe { gl::ActiveTexture(gl::TEXTURE0 + unit as GLenum) };
  }

  fn bind_texture(&mut self, kind: TextureKind, raw: Option<RawTexture>) {
    let target = conv::texture_target_to_glenum(kind);
    unsafe { gl::BindTexture(target, raw.map_or(0, |r| r.0)) };
  }

  fn set_texture_filter(&mut self, kind: TextureKind, min: MinFilter, mag: MagFilter) {
    let target = conv::texture_target_to_glenum(kind);
    unsafe {
      gl::TexParameteri(
        target,
        gl::TEXTURE_MIN_FILTER,
        conv::min_filter_to_glenum(min) as GLint,
      );
      gl::TexParameteri(
        target,
        gl::TEXTURE_MAG_FILTER,
        conv::mag_filter_to_glenum(mag) as GLint,
      );
    }
  }

  fn set_texture_wrap(&mut self, kind: TextureKind, wrap_s: Wrap, wrap_t: Wrap) {
    let target = conv::texture_target_to_glenum(kind);
    unsafe {
      gl::TexParameteri(target, gl::TEXTURE_WRAP_S, conv::wrap_to_glenum(wrap_s) as GLint);
      gl::TexParameteri(target, gl::TEXTURE_WRAP_T, conv::wrap_to_glenum(wrap_t) as GLint);
    }
  }

  fn set_texture_mip_range(&mut self, kind: TextureKind, base: u32, max: u32) {
    let target = conv::texture_target_to_glenum(kind);
    unsafe {
      gl::TexParameteri(target, gl::TEXTURE_BASE_LEVEL, base as GLint);
      gl::TexParameteri(target, gl::TEXTURE_MAX_LEVEL, max as GLint);
    }
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
    let (internal, gl_format, ty) = conv::pixel_format_to_gl(format);
    let target = conv::image_target_to_glenum(kind, layer);
    let pixels = data.map_or(ptr::null(), |d| d.as_ptr() as *const c_void);
    unsafe {
      gl::TexImage2D(
        target,
        level as GLint,
        internal as GLint,
        width as GLsizei,
        height as GLsizei,
        0,
        gl_format,
        ty,
        pixels,
      );
    }
  }

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
    let (_, gl_format, ty) = conv::pixel_format_to_gl(format);
    let target = conv::image_target_to_glenum(kind, layer);
    // A null pointer is a zero offset into the bound pixel-unpack buffer.
    let pixels = data.map_or(ptr::null(), |d| d.as_ptr() as *const c_void);
    unsafe {
      gl::TexSubImage2D(
        target,
        level as GLint,
        x as GLint,
        y as GLint,
        width as GLsizei,
        height as GLsizei,
        gl_format,
        ty,
        pixels,
      );
    }
  }

  fn generate_mipmaps(&mut self, kind: TextureKind) {
    unsafe { gl::GenerateMipmap(conv::texture_target_to_glenum(kind)) };
  }

  fn create_buffer(&mut self) -> RawBuffer {
    let mut raw: GLuint = 0;
    unsafe { gl::GenBuffers(1, &mut raw) };
    RawBuffer(raw)
  }

  fn delete_buffer(&mut self, raw: RawBuffer) {
    unsafe { gl::DeleteBuffers(1, &raw.0) };
  }

  fn bind_buffer(&mut self, target: BufferTarget, raw: Option<RawBuffer>) {
    unsafe { gl::BindBuffer(conv::buffer_target_to_glenum(target), raw.map_or(0, |r| r.0)) };
  }

  fn buffer_data(
    &mut self,
    target: BufferTarget,
    size: usize,
    data: Option<&[u8]>,
    usage: BufferUsage,
  ) {
    let contents = data.map_or(ptr::null(), |d| d.as_ptr() as *const c_void);
    unsafe {
      gl::BufferData(
        conv::buffer_target_to_glenum(target),
        size as GLsizeiptr,
        contents,
        conv::buffer_usage_to_glenum(usage),
      );
    }
  }

  fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
    unsafe {
      gl::BufferSubData(
        conv::buffer_target_to_glenum(target),
        offset as GLintptr,
        data.len() as GLsizeiptr,
        data.as_ptr() as *const c_void,
      );
    }
  }

  fn read_pack_buffer(&mut self, size: usize, out: &mut Vec<u8>) -> bool {
    unsafe {
      let mapped = gl::MapBufferRange(
        gl::PIXEL_PACK_BUFFER,
        0,
        size as GLsizeiptr,
        gl::MAP_READ_BIT,
      );
      if mapped.is_null() {
        return false;
      }

      out.clear();
      out.extend_from_slice(std::slice::from_raw_parts(mapped as *const u8, size));

      // An unmap failure means the storage was lost mid-copy and the bytes are garbage.
      gl::UnmapBuffer(gl::PIXEL_PACK_BUFFER) == gl::TRUE
    }
  }

  fn create_framebuffer(&mut self) -> RawFramebuffer {
    let mut raw: GLuint = 0;
    unsafe { gl::GenFramebuffers(1, &mut raw) };
    RawFramebuffer(raw)
  }

  fn delete_framebuffer(&mut self, raw: RawFramebuffer) {
    unsafe { gl::DeleteFramebuffers(1, &raw.0) };
  }

  fn bind_draw_framebuffer(&mut self, raw: Option<RawFramebuffer>) {
    unsafe { gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, raw.map_or(0, |r| r.0)) };
  }

  fn bind_read_framebuffer(&mut self, raw: Option<RawFramebuffer>, attachment: Attachment) {
    unsafe {
      gl::BindFramebuffer(gl::READ_FRAMEBUFFER, raw.map_or(0, |r| r.0));
      // Depth reads select pixels through the format instead of a read buffer.
      if let Some(index) = attachment.color_index() {
        if raw.is_some() {
          gl::ReadBuffer(gl::COLOR_ATTACHMENT0 + index as GLenum);
        } else {
          gl::ReadBuffer(gl::BACK);
        }
      }
    }
  }

  fn framebuffer_texture(&mut self, slot: Attachment, raw: Option<RawTexture>, level: u32) {
    unsafe {
      gl::FramebufferTexture2D(
        gl::DRAW_FRAMEBUFFER,
        conv::attachment_to_glenum(slot),
        gl::TEXTURE_2D,
        raw.map_or(0, |r| r.0),
        level as GLint,
      );
    }
  }

  fn set_draw_buffers(&mut self, outputs: &[Option<usize>]) {
    let buffers: Vec<GLenum> = outputs
      .iter()
      .map(|o| o.map_or(gl::NONE, |i| gl::COLOR_ATTACHMENT0 + i as GLenum))
      .collect();
    unsafe { gl::DrawBuffers(buffers.len() as GLsizei, buffers.as_ptr()) };
  }

  fn read_pixels_to_pack_buffer(&mut self, region: IntRect, format: PixelFormat) {
    let (_, gl_format, ty) = conv::pixel_format_to_gl(format);
    unsafe {
      gl::ReadPixels(
        region.x,
        region.y,
        region.width,
        region.height,
        gl_format,
        ty,
        ptr::null_mut(),
      );
    }
  }

  fn create_shader_stage(
    &mut self,
    kind: StageKind,
    source: &str,
  ) -> Result<RawShaderStage, StageError> {
    let gl_kind = match kind {
      StageKind::Vertex => gl::VERTEX_SHADER,
      StageKind::Fragment => gl::FRAGMENT_SHADER,
    };

    unsafe {
      let handle = gl::CreateShader(gl_kind);
      let src_ptr = source.as_ptr() as *const GLchar;
      let src_len = source.len() as GLint;
      gl::ShaderSource(handle, 1, &src_ptr, &src_len);
      gl::CompileShader(handle);

      let mut status: GLint = 0;
      gl::GetShaderiv(handle, gl::COMPILE_STATUS, &mut status);
      if status == gl::TRUE as GLint {
        Ok(RawShaderStage(handle))
      } else {
        let log = shader_info_log(handle);
        gl::DeleteShader(handle);
        Err(StageError::CompileFailed { kind, log })
      }
    }
  }

  fn delete_shader_stage(&mut self, raw: RawShaderStage) {
    unsafe { gl::DeleteShader(raw.0) };
  }

  fn link_program(&mut self, stages: &[RawShaderStage]) -> Result<RawProgram, ProgramError> {
    unsafe {
      let handle = gl::CreateProgram();
      for stage in stages {
        gl::AttachShader(handle, stage.0);
      }
      gl::LinkProgram(handle);
      for stage in stages {
        gl::DetachShader(handle, stage.0);
      }

      let mut status: GLint = 0;
      gl::GetProgramiv(handle, gl::LINK_STATUS, &mut status);
      if status == gl::TRUE as GLint {
        Ok(RawProgram(handle))
      } else {
        let log = program_info_log(handle);
        gl::DeleteProgram(handle);
        Err(ProgramError::LinkFailed(log))
      }
    }
  }

  fn delete_program(&mut self, raw: RawProgram) {
    unsafe { gl::DeleteProgram(raw.0) };
  }

  fn use_program(&mut self, raw: Option<RawProgram>) {
    unsafe { gl::UseProgram(raw.map_or(0, |r| r.0)) };
  }

  fn active_uniforms(&mut self, raw: RawProgram) -> Vec<UniformInfo> {
    unsafe {
      let mut count: GLint = 0;
      gl::GetProgramiv(raw.0, gl::ACTIVE_UNIFORMS, &mut count);
      let mut max_len: GLint = 0;
      gl::GetProgramiv(raw.0, gl::ACTIVE_UNIFORM_MAX_LENGTH, &mut max_len);

      let mut uniforms = Vec::with_capacity(count.max(0) as usize);
      let mut name_buf = vec![0u8; max_len.max(1) as usize];

      for index in 0..count.max(0) as GLuint {
        let mut written: GLsizei = 0;
        let mut array_size: GLint = 0;
        let mut gl_ty: GLenum = 0;
        gl::GetActiveUniform(
          raw.0,
          index,
          name_buf.len() as GLsizei,
          &mut written,
          &mut array_size,
          &mut gl_ty,
          name_buf.as_mut_ptr() as *mut GLchar,
        );

        // The buffer is NUL terminated at `written`, so it doubles as the location query
        // string.
        let location = gl::GetUniformLocation(raw.0, name_buf.as_ptr() as *const GLchar);
        if location < 0 {
          // Built-ins and uniform-block members have no location to upload to.
          continue;
        }

        let name = String::from_utf8_lossy(&name_buf[..written.max(0) as usize]).into_owned();
        uniforms.push(UniformInfo {
          name,
          location,
          ty: conv::glenum_to_uniform_type(gl_ty),
          array_size: array_size.max(0) as usize,
        });
      }

      uniforms
    }
  }

  fn upload_uniform_floats(&mut self, location: i32, ty: UniformType, data: &[f32]) {
    let count = (data.len() / ty.element_len()) as GLsizei;
    let ptr = data.as_ptr();
    unsafe {
      match ty {
        UniformType::Float => gl::Uniform1fv(location, count, ptr),
        UniformType::Vec2 => gl::Uniform2fv(location, count, ptr),
        UniformType::Vec3 => gl::Uniform3fv(location, count, ptr),
        UniformType::Vec4 => gl::Uniform4fv(location, count, ptr),
        UniformType::Mat3 => gl::UniformMatrix3fv(location, count, gl::FALSE, ptr),
        UniformType::Mat4 => gl::UniformMatrix4fv(location, count, gl::FALSE, ptr),
        _ => debug_assert!(false, "int backed type {} in a float upload", ty),
      }
    }
  }

  fn upload_uniform_ints(&mut self, location: i32, ty: UniformType, data: &[i32]) {
    let count = (data.len() / ty.element_len()) as GLsizei;
    let ptr = data.as_ptr();
    unsafe {
      match ty {
        UniformType::Int | UniformType::Sampler2D | UniformType::SamplerCube => {
          gl::Uniform1iv(location, count, ptr)
        }
        UniformType::IVec2 => gl::Uniform2iv(location, count, ptr),
        UniformType::IVec3 => gl::Uniform3iv(location, count, ptr),
        UniformType::IVec4 => gl::Uniform4iv(location, count, ptr),
        _ => debug_assert!(false, "float backed type {} in an int upload", ty),
      }
    }
  }

  fn create_vertex_array(&mut self) -> RawVertexArray {
    let mut raw: GLuint = 0;
    unsafe { gl::GenVertexArrays(1, &mut raw) };
    RawVertexArray(raw)
  }

  fn delete_vertex_array(&mut self, raw: RawVertexArray) {
    unsafe { gl::DeleteVertexArrays(1, &raw.0) };
  }

  fn bind_vertex_array(&mut self, raw: Option<RawVertexArray>) {
    unsafe { gl::BindVertexArray(raw.map_or(0, |r| r.0)) };
  }

  fn set_vertex_attribute(&mut self, index: usize, format: &VertexAttribFormat) {
    let scalar = conv::attribute_type_to_glenum(format.scalar);
    let offset = format.offset as usize as *const c_void;
    unsafe {
      gl::EnableVertexAttribArray(index as GLuint);
      match format.conversion {
        AttributeConversion::Float => gl::VertexAttribPointer(
          index as GLuint,
          format.elements as GLint,
          scalar,
          gl::FALSE,
          format.stride as GLsizei,
          offset,
        ),
        AttributeConversion::FloatNormalized => gl::VertexAttribPointer(
          index as GLuint,
          format.elements as GLint,
          scalar,
          gl::TRUE,
          format.stride as GLsizei,
          offset,
        ),
        AttributeConversion::Integer => gl::VertexAttribIPointer(
          index as GLuint,
          format.elements as GLint,
          scalar,
          format.stride as GLsizei,
          offset,
        ),
      }

      if gl::VertexAttribDivisor::is_loaded() {
        gl::VertexAttribDivisor(index as GLuint, format.divisor as GLuint);
      } else if format.divisor != 0 {
        warn!("attribute divisors are not supported by this context");
      }
    }
  }

  fn disable_vertex_attribute(&mut self, index: usize) {
    unsafe { gl::DisableVertexAttribArray(index as GLuint) };
  }

  fn draw_arrays(&mut self, primitive: Primitive, first: usize, count: usize, instances: usize) {
    let mode = conv::primitive_to_glenum(primitive);
    unsafe {
      if instances <= 1 {
        gl::DrawArrays(mode, first as GLint, count as GLsizei);
      } else {
        gl::DrawArraysInstanced(mode, first as GLint, count as GLsizei, instances as GLsizei);
      }
    }
  }

  fn draw_elements(
    &mut self,
    primitive: Primitive,
    count: usize,
    format: IndexFormat,
    byte_offset: usize,
    instances: usize,
  ) {
    let mode = conv::primitive_to_glenum(primitive);
    let ty = conv::index_format_to_glenum(format);
    let indices = byte_offset as *const c_void;
    unsafe {
      if instances <= 1 {
        gl::DrawElements(mode, count as GLsizei, ty, indices);
      } else {
        gl::DrawElementsInstanced(mode, count as GLsizei, ty, indices, instances as GLsizei);
      }
    }
  }

  fn create_fence(&mut self) -> RawFence {
    if !gl::FenceSync::is_loaded() {
      // GLES 2.0 has no sync objects. The handle is valid but never signals, so waits
      // report failure and readbacks resolve to None.
      warn!("fence sync is not supported by this context");
      return RawFence(0);
    }

    let sync = unsafe { gl::FenceSync(gl::SYNC_GPU_COMMANDS_COMPLETE, 0) };
    let id = self.next_fence;
    self.next_fence += 1;
    self.fences.insert(id, sync);
    RawFence(id)
  }

  fn wait_fence(&mut self, fence: RawFence, flush: bool, timeout_ns: u64) -> FenceStatus {
    let Some(&sync) = self.fences.get(&fence.0) else {
      return FenceStatus::Failed;
    };

    let flags = if flush { gl::SYNC_FLUSH_COMMANDS_BIT } else { 0 };
    let status = unsafe { gl::ClientWaitSync(sync, flags, timeout_ns) };
    match status {
      gl::ALREADY_SIGNALED => FenceStatus::AlreadySignaled,
      gl::CONDITION_SATISFIED => FenceStatus::Signaled,
      gl::TIMEOUT_EXPIRED => FenceStatus::TimedOut,
      _ => FenceStatus::Failed,
    }
  }

  fn delete_fence(&mut self, fence: RawFence) {
    if let Some(sync) = self.fences.remove(&fence.0) {
      unsafe { gl::DeleteSync(sync) };
    }
  }
}

impl Drop for Gl33Device {
  fn drop(&mut self) {
    for (_, sync) in self.fences.drain() {
      unsafe { gl::DeleteSync(sync) };
    }
  }
}

/// Driver workarounds detected from the renderer string.
///
/// ANGLE's D3D translation and older Adreno drivers miscompile programs whose sampler
/// uniforms change value between draws; pinning samplers to fixed units at link time avoids
/// rewriting them.
pub(crate) fn detect_quirks(renderer: &str) -> DeviceQuirks {
  let pin_sampler_units = renderer.contains("ANGLE") || renderer.contains("Adreno");
  if pin_sampler_units {
    warn!("driver with broken sampler rewrites detected, pinning sampler units");
  }
  DeviceQuirks { pin_sampler_units }
}

fn get_string(name: GLenum) -> Option<String> {
  unsafe {
    let ptr = gl::GetString(name);
    if ptr.is_null() {
      return None;
    }
    Some(
      CStr::from_ptr(ptr as *const c_char)
        .to_string_lossy()
        .into_owned(),
    )
  }
}

unsafe fn toggle(cap: GLenum, enabled: bool) {
  if enabled {
    gl::Enable(cap);
  } else {
    gl::Disable(cap);
  }
}

const fn gl_bool(b: bool) -> GLboolean {
  if b {
    gl::TRUE
  } else {
    gl::FALSE
  }
}

unsafe fn shader_info_log(handle: GLuint) -> String {
  let mut len: GLint = 0;
  gl::GetShaderiv(handle, gl::INFO_LOG_LENGTH, &mut len);
  let mut log = vec![0u8; len.max(0) as usize];
  let mut written: GLsizei = 0;
  gl::GetShaderInfoLog(handle, len, &mut written, log.as_mut_ptr() as *mut GLchar);
  log.truncate(written.max(0) as usize);
  String::from_utf8_lossy(&log).into_owned()
}

unsafe fn program_info_log(handle: GLuint) -> String {
  let mut len: GLint = 0;
  gl::GetProgramiv(handle, gl::INFO_LOG_LENGTH, &mut len);
  let mut log = vec![0u8; len.max(0) as usize];
  let mut written: GLsizei = 0;
  gl::GetProgramInfoLog(handle, len, &mut written, log.as_mut_ptr() as *mut GLchar);
  log.truncate(written.max(0) as usize);
  String::from_utf8_lossy(&log).into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn broken_sampler_drivers_are_detected() {
    assert!(detect_quirks("ANGLE (NVIDIA GeForce GTX 1080 Direct3D11 vs_5_0)").pin_sampler_units);
    assert!(detect_quirks("Adreno (TM) 320").pin_sampler_units);
    assert!(!detect_quirks("AMD Radeon Pro 5500M OpenGL Engine").pin_sampler_units);
    assert!(!detect_quirks("").pin_sampler_units);
  }
}
