//! The hardware-facing device interface.
//!
//! Everything above this boundary, trackers, the texture-unit pool and the synchronizer, is
//! backend-agnostic and talks to hardware exclusively through [`Device`]. One implementation
//! exists per backend. The trait is object-safe on purpose so a renderer can hold a
//! `Box<dyn Device>` picked at startup.
//!
//! Raw handles returned by the device are plain newtypes with no lifecycle attached. The
//! renderer pairs them with registry identities and is responsible for deleting them.

use crate::blending::BlendMode;
use crate::buffer::{BufferTarget, BufferUsage, IndexFormat};
use crate::caps::{Capability, FeatureSet};
use crate::color::Color;
use crate::depth_test::DepthComparison;
use crate::face_culling::FaceCullingMode;
use crate::framebuffer::{Attachment, ClearFlags};
use crate::rect::{IntRect, Rect};
use crate::shader::{ProgramError, StageError, StageKind, UniformType};
use crate::texture::{MagFilter, MinFilter, PixelFormat, TextureKind, Wrap};
use crate::vertex_array::{Primitive, VertexAttribFormat};

/// Raw device texture handle.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RawTexture(pub u32);

/// Raw device buffer handle.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RawBuffer(pub u32);

/// Raw device framebuffer handle.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RawFramebuffer(pub u32);

/// Raw device shader stage handle.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RawShaderStage(pub u32);

/// Raw device program handle.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RawProgram(pub u32);

/// Raw device vertex array handle.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RawVertexArray(pub u32);

/// Raw device fence handle.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RawFence(pub u64);

/// Driver workarounds a backend asks the renderer to honor.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceQuirks {
  /// Pin every sampler uniform to a fixed texture unit at link time and never rewrite the
  /// sampler values afterwards. Works around drivers that miscompile programs when sampler
  /// uniforms are updated. With this quirk a texture may be bound to several units at once.
  pub pin_sampler_units: bool,
}

/// One active uniform reflected from a linked program.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformInfo {
  /// Name as the driver reports it, possibly with a trailing `[0]`.
  pub name: String,
  pub location: i32,
  /// `None` for types the renderer doesn’t handle; such uniforms are skipped.
  pub ty: Option<UniformType>,
  pub array_size: usize,
}

/// Outcome of waiting on a fence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FenceStatus {
  /// The fence was already signaled before the wait.
  AlreadySignaled,
  /// The fence signaled within the timeout.
  Signaled,
  /// The timeout expired first.
  TimedOut,
  /// The wait failed.
  Failed,
}

impl FenceStatus {
  /// Whether the fenced work is known to have completed.
  pub fn is_signaled(self) -> bool {
    matches!(self, FenceStatus::AlreadySignaled | FenceStatus::Signaled)
  }
}

/// A concrete hardware backend.
///
/// Calls are issued in renderer-chosen order and must apply immediately; all diffing happens
/// above this layer, so a device never has to (and must not) skip a call it receives. Slice
/// and option parameters borrow only for the duration of the call.
pub trait Device {
  /// Human-readable backend name for logs.
  fn name(&self) -> &str;

  /// Optional features this device supports.
  fn features(&self) -> FeatureSet;

  /// Driver workarounds the renderer should honor.
  fn quirks(&self) -> DeviceQuirks;

  /// Number of texture units usable in a single draw.
  fn texture_unit_count(&mut self) -> usize;

  /// Pixel size of the default framebuffer.
  fn default_framebuffer_size(&mut self) -> (u32, u32);

  // fixed-function state

  fn apply_capability(&mut self, cap: Capability, enabled: bool);
  fn apply_viewport(&mut self, rect: Rect);
  fn apply_scissor(&mut self, rect: IntRect);
  fn apply_scissor_enabled(&mut self, enabled: bool);
  fn apply_blend_enabled(&mut self, enabled: bool);
  fn apply_blend_mode(&mut self, mode: BlendMode);
  fn apply_cull_mode(&mut self, mode: FaceCullingMode);
  fn apply_depth_comparison(&mut self, cmp: DepthComparison);
  fn apply_srgb_write(&mut self, enabled: bool);
  fn apply_clear_color(&mut self, color: Color);
  fn apply_clear_depth(&mut self, depth: f32);

  /// Clear the bound draw framebuffer.
  fn clear(&mut self, flags: ClearFlags);

  // textures

  fn create_texture(&mut self) -> RawTexture;
  fn delete_texture(&mut self, raw: RawTexture);

  /// Select the unit subsequent texture calls operate on.
  fn set_active_unit(&mut self, unit: usize);

  /// Bind `raw` to the active unit, or unbind the kind when `None`.
  fn bind_texture(&mut self, kind: TextureKind, raw: Option<RawTexture>);

  fn set_texture_filter(&mut self, kind: TextureKind, min: MinFilter, mag: MagFilter);
  fn set_texture_wrap(&mut self, kind: TextureKind, wrap_s: Wrap, wrap_t: Wrap);
  fn set_texture_mip_range(&mut self, kind: TextureKind, base: u32, max: u32);

  /// Allocate storage for one mip level of the texture bound to the active unit. `data` of
  /// `None` leaves the contents undefined.
  fn texture_image(
    &mut self,
    kind: TextureKind,
    layer: u32,
    level: u32,
    format: PixelFormat,
    width: u32,
    height: u32,
    data: Option<&[u8]>,
  );

  /// Update a region of one mip level. `data` of `None` sources pixels from the buffer bound
  /// to [`BufferTarget::PixelUnpack`].
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
  );

  /// Regenerate the mip chain of the texture bound to the active unit.
  fn generate_mipmaps(&mut self, kind: TextureKind);

  // buffers

  fn create_buffer(&mut self) -> RawBuffer;
  fn delete_buffer(&mut self, raw: RawBuffer);
  fn bind_buffer(&mut self, target: BufferTarget, raw: Option<RawBuffer>);

  /// (Re)allocate the bound buffer’s storage. `data` of `None` leaves it undefined.
  fn buffer_data(&mut self, target: BufferTarget, size: usize, data: Option<&[u8]>, usage: BufferUsage);

  fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]);

  /// Copy `size` bytes out of the bound pixel-pack buffer into `out`. Returns false if the
  /// mapping failed.
  fn read_pack_buffer(&mut self, size: usize, out: &mut Vec<u8>) -> bool;

  // framebuffers

  fn create_framebuffer(&mut self) -> RawFramebuffer;
  fn delete_framebuffer(&mut self, raw: RawFramebuffer);

  /// Bind for drawing; `None` is the default framebuffer.
  fn bind_draw_framebuffer(&mut self, raw: Option<RawFramebuffer>);

  /// Bind for reading and select the attachment pixels come from.
  fn bind_read_framebuffer(&mut self, raw: Option<RawFramebuffer>, attachment: Attachment);

  /// Attach `raw` to a slot of the bound draw framebuffer, or detach with `None`.
  fn framebuffer_texture(&mut self, slot: Attachment, raw: Option<RawTexture>, level: u32);

  /// Map fragment outputs to color attachment indices for the bound draw framebuffer.
  fn set_draw_buffers(&mut self, outputs: &[Option<usize>]);

  /// Start an asynchronous read of `region` from the bound read framebuffer into the bound
  /// pixel-pack buffer.
  fn read_pixels_to_pack_buffer(&mut self, region: IntRect, format: PixelFormat);

  // shaders

  fn create_shader_stage(&mut self, kind: StageKind, source: &str)
    -> Result<RawShaderStage, StageError>;
  fn delete_shader_stage(&mut self, raw: RawShaderStage);

  fn link_program(&mut self, stages: &[RawShaderStage]) -> Result<RawProgram, ProgramError>;
  fn delete_program(&mut self, raw: RawProgram);
  fn use_program(&mut self, raw: Option<RawProgram>);

  /// Reflect the active uniforms of a linked program.
  fn active_uniforms(&mut self, raw: RawProgram) -> Vec<UniformInfo>;

  /// Upload float scalars to `location` of the program in use. The location already accounts
  /// for the first dirty array element.
  fn upload_uniform_floats(&mut self, location: i32, ty: UniformType, data: &[f32]);

  /// Upload int scalars, as [`upload_uniform_floats`].
  ///
  /// [`upload_uniform_floats`]: Device::upload_uniform_floats
  fn upload_uniform_ints(&mut self, location: i32, ty: UniformType, data: &[i32]);

  // vertex arrays

  fn create_vertex_array(&mut self) -> RawVertexArray;
  fn delete_vertex_array(&mut self, raw: RawVertexArray);
  fn bind_vertex_array(&mut self, raw: Option<RawVertexArray>);

  /// Configure attribute `index` of the bound vertex array from the buffer bound to
  /// [`BufferTarget::Array`].
  fn set_vertex_attribute(&mut self, index: usize, format: &VertexAttribFormat);
  fn disable_vertex_attribute(&mut self, index: usize);

  // draws

  fn draw_arrays(&mut self, primitive: Primitive, first: usize, count: usize, instances: usize);

  fn draw_elements(
    &mut self,
    primitive: Primitive,
    count: usize,
    format: IndexFormat,
    byte_offset: usize,
    instances: usize,
  );

  // fences

  fn create_fence(&mut self) -> RawFence;

  /// Wait for `fence` up to `timeout_ns`, optionally flushing queued commands first.
  fn wait_fence(&mut self, fence: RawFence, flush: bool, timeout_ns: u64) -> FenceStatus;

  fn delete_fence(&mut self, fence: RawFence);
}

#[cfg(test)]
pub(crate) use recording::RecordingDevice;
