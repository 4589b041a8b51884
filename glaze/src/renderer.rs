//! The deferred renderer core.
//!
//! [`Renderer`] owns every live GPU resource plus a client-side mirror of the hardware state
//! machine. Public setters only restage values on the mirror's pending side; nothing reaches
//! the [`Device`] until a draw is submitted, at which point [`Renderer::draw`] walks the
//! mirror in a fixed order and issues exactly the calls whose pending side moved. Issuing the
//! same draw twice therefore costs one draw call and zero state changes the second time.
//!
//! The synchronization order is load-bearing in two places: sampler uniforms are resolved to
//! texture-unit indices before the unit pool is applied, and the unit pool is applied before
//! the draw so every lock taken during resolution is released again. Everything else is
//! ordered for readability.
//!
//! Resource handles ([`TextureId`] and friends) are never reused, so a handle kept past
//! destruction is harmless: lookups miss and state diffs against a dead handle still fire.

use std::collections::HashMap;
use std::error;
use std::fmt;

use log::{debug, error, info, warn};

use crate::blending::BlendMode;
use crate::buffer::{BufferEntry, BufferTarget, BufferUsage, BufferWriter, IndexFormat};
use crate::caps::{Capability, CapabilitySet, FeatureSet};
use crate::color::Color;
use crate::depth_test::DepthComparison;
use crate::device::{Device, DeviceQuirks, RawFramebuffer};
use crate::env;
use crate::face_culling::FaceCullingMode;
use crate::framebuffer::{
  Attachment, ClearFlags, FramebufferAttachment, FramebufferEntry, MAX_OUTPUTS,
};
use crate::handle::{BufferId, FramebufferId, ProgramId, Registry, TextureId, VertexArrayId};
use crate::readback::{ReadbackQueue, prepare_pack_buffer};
use crate::rect::{IntRect, Rect};
use crate::shader::{
  MAT4_IDENTITY, MagicUniform, Mat4, ProgramEntry, ProgramError, StageKind, Uniform,
  UniformStore, UniformType, base_name, mat4_scalars,
};
use crate::state::{StateCache, sync_capabilities, with_buffer_bound};
use crate::texture::{
  MagFilter, MinFilter, MipmapMode, PixelFormat, Pixmap, TextureEntry, TextureError,
  TextureKind, TextureParams, Wrap, fill_region_is_valid, max_mip_levels, mip_extent,
};
use crate::texunits::TextureUnits;
use crate::vertex_array::{Primitive, VertexArrayEntry, VertexAttribFormat};

/// Fewest hardware texture units the renderer will run on.
pub const MIN_TEXTURE_UNITS: usize = 8;

/// Default ceiling on managed texture units, overridable with `GLAZE_MAX_TEXUNITS`.
const DEFAULT_MAX_TEXTURE_UNITS: usize = 32;

/// Errors creating a [`Renderer`].
#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContextError {
  /// The device exposes fewer texture units than the renderer requires.
  TooFewTextureUnits {
    /// Units the device reported.
    available: usize,
    /// Units the renderer needs at minimum.
    required: usize,
  },
}

impl fmt::Display for ContextError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ContextError::TooFewTextureUnits { available, required } => write!(
        f,
        "insufficient texture units: {} available, {} required",
        available, required
      ),
    }
  }
}

impl error::Error for ContextError {}

/// Hardware traffic counters for the current frame, reset by [`Renderer::finish_frame`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameStats {
  /// Draw commands issued.
  pub draw_calls: u32,
  /// Texture bind calls issued.
  pub texture_rebinds: u32,
}

/// Stable handle to one uniform of one program.
///
/// Cheap to copy and to keep around; a handle naming a destroyed program turns every
/// operation using it into a no-op.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct UniformHandle {
  program: ProgramId,
  index: usize,
}

/// Value payload for [`Renderer::set_uniform`].
#[derive(Copy, Clone, Debug)]
pub enum UniformData<'a> {
  /// Scalars for float-backed uniforms, packed per element.
  Floats(&'a [f32]),
  /// Scalars for int-backed, non-sampler uniforms.
  Ints(&'a [i32]),
  /// Textures for sampler uniforms, one per array element.
  Textures(&'a [Option<TextureId>]),
}

/// The renderer: resource registries, the state mirror, and the draw path tying them
/// together.
pub struct Renderer {
  device: Box<dyn Device>,
  features: FeatureSet,
  quirks: DeviceQuirks,

  state: StateCache,
  texunits: TextureUnits,

  textures: Registry<TextureId, TextureEntry>,
  buffers: Registry<BufferId, BufferEntry>,
  framebuffers: Registry<FramebufferId, FramebufferEntry>,
  programs: Registry<ProgramId, ProgramEntry>,
  vertex_arrays: Registry<VertexArrayId, VertexArrayEntry>,

  /// Every sampler uniform of every live program, so texture destruction can null the slots
  /// in one pass proportional to the number of samplers.
  sampler_uniforms: Vec<(ProgramId, usize)>,
  /// Fallback staged when the pending program is destroyed.
  default_program: Option<ProgramId>,

  model_view_matrix: Mat4,
  projection_matrix: Mat4,
  texture_matrix: Mat4,
  color: Color,

  drawable_size: (u32, u32),
  /// Lazily created framebuffer used to clear texture levels.
  scratch_framebuffer: Option<RawFramebuffer>,
  readback: ReadbackQueue,
  stats: FrameStats,
  warned_instancing: bool,
}

impl Renderer {
  /// Wrap a device, size the texture-unit pool and seed the hardware clear values.
  ///
  /// The pool takes every unit the device offers up to a ceiling of 32; `GLAZE_MAX_TEXUNITS`
  /// moves the ceiling and `GLAZE_TEXUNITS` requests an exact count. Either way the result is
  /// clamped to what the hardware has, and fewer than [`MIN_TEXTURE_UNITS`] is fatal.
  /// `GLAZE_PIN_SAMPLER_UNITS` overrides the backend's sampler-pinning quirk in both
  /// directions.
  pub fn new(mut device: Box<dyn Device>) -> Result<Renderer, ContextError> {
    let available = device.texture_unit_count();
    if available < MIN_TEXTURE_UNITS {
      return Err(ContextError::TooFewTextureUnits {
        available,
        required: MIN_TEXTURE_UNITS,
      });
    }

    let ceiling = env::usize_var("GLAZE_MAX_TEXUNITS", DEFAULT_MAX_TEXTURE_UNITS);
    let units = env::opt_usize_var("GLAZE_TEXUNITS")
      .unwrap_or_else(|| available.min(ceiling))
      .clamp(MIN_TEXTURE_UNITS, available);
    info!("using {} of {} texture units", units, available);

    let mut quirks = device.quirks();
    if let Some(pin) = env::opt_bool_var("GLAZE_PIN_SAMPLER_UNITS") {
      quirks.pin_sampler_units = pin;
    }
    if quirks.pin_sampler_units {
      info!("sampler uniforms are pinned to fixed texture units");
    }

    let features = device.features();
    let drawable_size = device.default_framebuffer_size();
    let mut state = StateCache::new(Rect::new(
      0.,
      0.,
      drawable_size.0 as f32,
      drawable_size.1 as f32,
    ));

    // Seed the clear values so the first clear doesn't depend on driver defaults.
    device.apply_clear_color(Color::TRANSPARENT);
    device.apply_clear_depth(1.);
    state.clear_color.force(Color::TRANSPARENT);
    state.clear_depth.force(1.);

    info!("renderer initialized on {}", device.name());

    Ok(Renderer {
      device,
      features,
      quirks,
      state,
      texunits: TextureUnits::new(units),
      textures: Registry::new(),
      buffers: Registry::new(),
      framebuffers: Registry::new(),
      programs: Registry::new(),
      vertex_arrays: Registry::new(),
      sampler_uniforms: Vec::new(),
      default_program: None,
      model_view_matrix: MAT4_IDENTITY,
      projection_matrix: MAT4_IDENTITY,
      texture_matrix: MAT4_IDENTITY,
      color: Color::WHITE,
      drawable_size,
      scratch_framebuffer: None,
      readback: ReadbackQueue::new(),
      stats: FrameStats::default(),
      warned_instancing: false,
    })
  }

  /// Features the device reported at creation.
  pub fn features(&self) -> FeatureSet {
    self.features
  }

  /// Quirks in effect, after environment overrides.
  pub fn quirks(&self) -> DeviceQuirks {
    self.quirks
  }

  /// Name of the underlying device.
  pub fn device_name(&self) -> &str {
    self.device.name()
  }

  /// Counters accumulated since the last frame boundary.
  pub fn stats(&self) -> FrameStats {
    self.stats
  }

  // --- fixed-function state ---

  /// Stage one capability bit.
  pub fn set_capability(&mut self, cap: Capability, enabled: bool) {
    let mut set = *self.state.capabilities.current();
    set.set(cap, enabled);
    self.state.capabilities.set(set);
  }

  /// Stage the whole capability set at once.
  pub fn set_capabilities(&mut self, caps: CapabilitySet) {
    self.state.capabilities.set(caps);
  }

  pub fn capabilities(&self) -> CapabilitySet {
    *self.state.capabilities.current()
  }

  /// Stage the blend mode; `None` disables blending.
  pub fn set_blend_mode(&mut self, mode: Option<BlendMode>) {
    self.state.blend_pending = mode;
  }

  pub fn blend_mode(&self) -> Option<BlendMode> {
    self.state.blend_pending
  }

  pub fn set_cull_mode(&mut self, mode: FaceCullingMode) {
    self.state.cull.set(mode);
  }

  pub fn cull_mode(&self) -> FaceCullingMode {
    *self.state.cull.current()
  }

  pub fn set_depth_comparison(&mut self, cmp: DepthComparison) {
    self.state.depth_comparison.set(cmp);
  }

  pub fn depth_comparison(&self) -> DepthComparison {
    *self.state.depth_comparison.current()
  }

  /// Stage the scissor rectangle, in the space of the current render target. A zero-area
  /// rectangle disables the scissor test.
  pub fn set_scissor(&mut self, rect: IntRect) {
    self.state.scissor_pending = rect;
  }

  pub fn scissor(&self) -> IntRect {
    self.state.scissor_pending
  }

  /// Stage the global color, fed to shaders through `gz_color`.
  pub fn set_color(&mut self, color: Color) {
    self.color = color;
  }

  pub fn color(&self) -> Color {
    self.color
  }

  pub fn set_model_view_matrix(&mut self, m: Mat4) {
    self.model_view_matrix = m;
  }

  pub fn model_view_matrix(&self) -> Mat4 {
    self.model_view_matrix
  }

  pub fn set_projection_matrix(&mut self, m: Mat4) {
    self.projection_matrix = m;
  }

  pub fn projection_matrix(&self) -> Mat4 {
    self.projection_matrix
  }

  pub fn set_texture_matrix(&mut self, m: Mat4) {
    self.texture_matrix = m;
  }

  pub fn texture_matrix(&self) -> Mat4 {
    self.texture_matrix
  }

  // --- render targets ---

  /// Stage the draw target; `None` is the default framebuffer.
  pub fn set_framebuffer(&mut self, target: Option<FramebufferId>) {
    if let Some(id) = target {
      if self.framebuffers.get(id).is_none() {
        debug_assert!(false, "staging a dead framebuffer");
        error!("ignoring a dead framebuffer");
        return;
      }
    }
    self.state.framebuffer.set(target);
  }

  pub fn framebuffer(&self) -> Option<FramebufferId> {
    *self.state.framebuffer.current()
  }

  pub fn create_framebuffer(&mut self, label: &str) -> FramebufferId {
    let raw = self.device.create_framebuffer();
    debug!("{}: created framebuffer", label);
    self
      .framebuffers
      .insert(FramebufferEntry::new(raw, label.to_string()))
  }

  pub fn destroy_framebuffer(&mut self, id: FramebufferId) {
    let Some(entry) = self.framebuffers.remove(id) else {
      return;
    };

    // A dead id on the tracker's active side still diffs correctly since ids are never
    // reused; only the pending side has to fall back to the default framebuffer.
    if *self.state.framebuffer.current() == Some(id) {
      self.state.framebuffer.set(None);
    }

    self.device.delete_framebuffer(entry.raw);
    debug!("{}: destroyed framebuffer", entry.debug_label);
  }

  /// Attach a texture level to a framebuffer slot, or detach with `None`. The first
  /// attachment of an untouched framebuffer also initializes its viewport to the full
  /// attachment size.
  pub fn framebuffer_attach(
    &mut self,
    framebuffer: FramebufferId,
    slot: Attachment,
    attachment: Option<FramebufferAttachment>,
  ) {
    if self.framebuffers.get(framebuffer).is_none() {
      debug_assert!(false, "attaching to a dead framebuffer");
      error!("ignoring attach to a dead framebuffer");
      return;
    }

    let mut raw_texture = None;
    let mut level = 0;
    let mut size = None;

    if let Some(a) = attachment {
      let Some(texture) = self.textures.get(a.texture) else {
        debug_assert!(false, "attaching a dead texture");
        error!("ignoring attach of a dead texture");
        return;
      };

      let depth_slot = slot == Attachment::Depth;
      if texture.params.format.is_depth() != depth_slot {
        debug_assert!(false, "attachment format does not fit the slot");
        error!(
          "{}: {:?} does not fit framebuffer slot {:?}",
          texture.debug_label, texture.params.format, slot
        );
        return;
      }
      if a.mip_level >= texture.params.mipmaps {
        debug_assert!(false, "attaching a mip level that does not exist");
        error!("{}: no mip level {}", texture.debug_label, a.mip_level);
        return;
      }

      raw_texture = Some(texture.raw);
      level = a.mip_level;
      size = Some(texture.mip_size(a.mip_level));
    }

    let Renderer { device, state, framebuffers, .. } = self;
    let device = device.as_mut();
    let Some(entry) = framebuffers.get_mut(framebuffer) else {
      return;
    };

    // The attach call itself needs the framebuffer bound; restage the previous target after.
    let saved = *state.framebuffer.current();
    state.framebuffer.set(Some(framebuffer));
    let raw = Some(entry.raw);
    state.framebuffer.sync(|_| device.bind_draw_framebuffer(raw));
    device.framebuffer_texture(slot, raw_texture, level);
    state.framebuffer.set(saved);

    entry.attachments[slot.index()] = attachment;
    entry.draw_buffers_dirty = true;

    if entry.viewport.is_empty() {
      if let Some((w, h)) = size {
        entry.viewport = Rect::new(0., 0., w as f32, h as f32);
      }
    }
  }

  pub fn framebuffer_attachment(
    &self,
    framebuffer: FramebufferId,
    slot: Attachment,
  ) -> Option<FramebufferAttachment> {
    self
      .framebuffers
      .get(framebuffer)?
      .attachment(slot)
  }

  /// Route shader color outputs to attachment slots. Output `i` renders into `mapping[i]`;
  /// a `None` (or anything past the end of `mapping`) discards that output.
  pub fn set_output_mapping(&mut self, framebuffer: FramebufferId, mapping: &[Option<Attachment>]) {
    debug_assert!(mapping.len() <= MAX_OUTPUTS, "too many shader outputs");
    let Some(entry) = self.framebuffers.get_mut(framebuffer) else {
      debug_assert!(false, "mapping outputs of a dead framebuffer");
      error!("ignoring output mapping of a dead framebuffer");
      return;
    };

    let mut next = [None; MAX_OUTPUTS];
    for (i, slot) in mapping.iter().take(MAX_OUTPUTS).enumerate() {
      debug_assert!(
        slot.map_or(true, |a| a.color_index().is_some()),
        "only color slots can receive shader output"
      );
      next[i] = slot.filter(|a| a.color_index().is_some());
    }

    if entry.output_mapping != next {
      entry.output_mapping = next;
      entry.draw_buffers_dirty = true;
    }
  }

  pub fn output_mapping(&self, framebuffer: FramebufferId) -> [Option<Attachment>; MAX_OUTPUTS] {
    self
      .framebuffers
      .get(framebuffer)
      .map(|e| e.output_mapping)
      .unwrap_or([None; MAX_OUTPUTS])
  }

  /// Set the viewport of a render target. Rectangles use a top-left origin; the conversion to
  /// the hardware convention happens internally and [`Renderer::viewport`] undoes it.
  pub fn set_viewport(&mut self, target: Option<FramebufferId>, rect: Rect) {
    match target {
      None => self.state.default_viewport = rect,
      Some(id) => {
        let height =
          target_height(&self.framebuffers, &self.textures, target, self.drawable_size) as f32;
        let Some(entry) = self.framebuffers.get_mut(id) else {
          debug_assert!(false, "setting the viewport of a dead framebuffer");
          error!("ignoring viewport of a dead framebuffer");
          return;
        };
        entry.viewport = rect.flipped_y(height);
      }
    }
  }

  pub fn viewport(&self, target: Option<FramebufferId>) -> Rect {
    match target {
      None => self.state.default_viewport,
      Some(id) => {
        let height =
          target_height(&self.framebuffers, &self.textures, target, self.drawable_size) as f32;
        self
          .framebuffers
          .get(id)
          .map(|e| e.viewport.flipped_y(height))
          .unwrap_or_default()
      }
    }
  }

  /// Pixel size of a render target: the first attachment's level size, or the drawable size
  /// for the default framebuffer.
  pub fn size(&self, target: Option<FramebufferId>) -> (u32, u32) {
    match target {
      None => self.drawable_size,
      Some(id) => self
        .framebuffers
        .get(id)
        .and_then(|e| e.first_attachment())
        .and_then(|a| self.textures.get(a.texture).map(|t| t.mip_size(a.mip_level)))
        .unwrap_or((0, 0)),
    }
  }

  /// Clear buffers of a render target immediately. The clear values go through the state
  /// mirror, so repeated clears with the same values only upload them once.
  pub fn clear(&mut self, target: Option<FramebufferId>, flags: ClearFlags, color: Color, depth: f32) {
    if flags.is_empty() {
      return;
    }

    let Renderer { device, state, framebuffers, textures, .. } = self;
    let device = device.as_mut();

    let saved = *state.framebuffer.current();
    state.framebuffer.set(target);
    let raw = target.and_then(|id| framebuffers.get(id)).map(|e| e.raw);
    state.framebuffer.sync(|_| device.bind_draw_framebuffer(raw));

    // The clear must not be cut down by a stale scissor or a disabled depth mask.
    if state.scissor_active_enabled != Some(false) {
      device.apply_scissor_enabled(false);
      state.scissor_active_enabled = Some(false);
    }
    if flags.contains(ClearFlags::DEPTH)
      && !state.capabilities.current().contains(Capability::DepthWrite)
    {
      device.apply_capability(Capability::DepthWrite, true);
      state.capabilities.invalidate();
    }

    if flags.contains(ClearFlags::COLOR) {
      state.clear_color.set(color);
      state.clear_color.sync(|c| device.apply_clear_color(*c));
    }
    if flags.contains(ClearFlags::DEPTH) {
      state.clear_depth.set(depth);
      state.clear_depth.sync(|d| device.apply_clear_depth(*d));
    }

    device.clear(flags);
    state.framebuffer.set(saved);

    if let Some(entry) = target.and_then(|id| framebuffers.get(id)) {
      for slot in Attachment::ALL {
        let written = match slot {
          Attachment::Depth => flags.contains(ClearFlags::DEPTH),
          _ => flags.contains(ClearFlags::COLOR),
        };
        if !written {
          continue;
        }
        if let Some(a) = entry.attachment(slot) {
          if let Some(texture) = textures.get_mut(a.texture) {
            texture.mipmaps_outdated = true;
          }
        }
      }
    }
  }

  // --- textures ---

  /// Create a texture and allocate storage for every level.
  pub fn create_texture(
    &mut self,
    params: TextureParams,
    label: &str,
  ) -> Result<TextureId, TextureError> {
    if params.width == 0 || params.height == 0 {
      return Err(TextureError::InvalidSize {
        width: params.width,
        height: params.height,
      });
    }

    let mut params = params;
    let max_levels = max_mip_levels(params.width, params.height);
    if params.mipmaps == 0 {
      params.mipmaps = match params.mipmap_mode {
        MipmapMode::Auto => max_levels,
        MipmapMode::Manual => 1,
      };
    }
    params.mipmaps = params.mipmaps.min(max_levels);

    let raw = self.device.create_texture();
    let transfer_buffer = if params.stream {
      Some(self.device.create_buffer())
    } else {
      None
    };

    let id = self.textures.insert(TextureEntry {
      raw,
      params,
      binding_unit: None,
      mipmaps_outdated: false,
      transfer_buffer,
      debug_label: label.to_string(),
    });

    self.edit_texture(id);

    let device = self.device.as_mut();
    device.set_texture_filter(params.kind, params.filter_min, params.filter_mag);
    device.set_texture_wrap(params.kind, params.wrap_s, params.wrap_t);
    if self.features.contains(FeatureSet::PARTIAL_MIPMAPS) {
      device.set_texture_mip_range(params.kind, 0, params.mipmaps - 1);
    }
    for level in 0..params.mipmaps {
      let w = mip_extent(params.width, level);
      let h = mip_extent(params.height, level);
      for layer in 0..params.kind.layers() {
        device.texture_image(params.kind, layer, level, params.format, w, h, None);
      }
    }

    debug!(
      "{}: created {:?} {}x{} {:?}, {} mip levels",
      label, params.kind, params.width, params.height, params.format, params.mipmaps
    );
    Ok(id)
  }

  pub fn destroy_texture(&mut self, id: TextureId) {
    let Some(entry) = self.textures.remove(id) else {
      return;
    };

    self.texunits.notify_texture_deleted(id);

    for &(program, index) in &self.sampler_uniforms {
      if let Some(p) = self.programs.get_mut(program) {
        p.uniforms[index].clear_texture(id);
      }
    }

    // Hardware only drops attachments of the bound framebuffer on its own; every other
    // framebuffer must be detached by hand or it goes incomplete.
    let mut stale = Vec::new();
    for (framebuffer, entry) in self.framebuffers.iter() {
      for slot in Attachment::ALL {
        if entry.attachment(slot).map_or(false, |a| a.texture == id) {
          stale.push((framebuffer, slot));
        }
      }
    }
    for (framebuffer, slot) in stale {
      self.detach_framebuffer_slot(framebuffer, slot);
    }

    if let Some(pbo) = entry.transfer_buffer {
      let tracker = self.state.buffer(BufferTarget::PixelUnpack);
      if *tracker.current() == Some(pbo) {
        tracker.set(None);
      }
      if tracker.active() == Some(&Some(pbo)) {
        tracker.invalidate();
      }
      self.device.delete_buffer(pbo);
    }

    self.device.delete_texture(entry.raw);
    debug!("{}: destroyed texture", entry.debug_label);
  }

  /// Upload a whole level (of one cube face, for cube maps).
  pub fn texture_fill(&mut self, id: TextureId, level: u32, layer: u32, pixmap: &Pixmap) {
    self.fill_texture(id, level, layer, 0, 0, pixmap);
  }

  /// Upload a region of a level.
  pub fn texture_fill_region(
    &mut self,
    id: TextureId,
    level: u32,
    layer: u32,
    x: u32,
    y: u32,
    pixmap: &Pixmap,
  ) {
    self.fill_texture(id, level, layer, x, y, pixmap);
  }

  fn fill_texture(&mut self, id: TextureId, level: u32, layer: u32, x: u32, y: u32, pixmap: &Pixmap) {
    let Some(entry) = self.textures.get(id) else {
      debug_assert!(false, "filling a dead texture");
      error!("ignoring fill of a dead texture");
      return;
    };

    if !fill_region_is_valid(entry, level, layer, x, y, pixmap) {
      debug_assert!(false, "texture fill out of range");
      error!("{}: ignoring out-of-range fill", entry.debug_label);
      return;
    }
    let params = entry.params;

    self.edit_texture(id);

    let Renderer { device, state, textures, .. } = self;
    let device = device.as_mut();
    let Some(entry) = textures.get_mut(id) else {
      return;
    };

    match entry.transfer_buffer {
      Some(pbo) => {
        with_buffer_bound(state, device, BufferTarget::PixelUnpack, pbo, |device| {
          device.buffer_data(
            BufferTarget::PixelUnpack,
            pixmap.data.len(),
            Some(&pixmap.data),
            BufferUsage::Stream,
          );
          device.texture_sub_image(
            params.kind,
            layer,
            level,
            x,
            y,
            pixmap.width,
            pixmap.height,
            params.format,
            None,
          );
        });
      }
      None => {
        device.texture_sub_image(
          params.kind,
          layer,
          level,
          x,
          y,
          pixmap.width,
          pixmap.height,
          params.format,
          Some(&pixmap.data),
        );
      }
    }

    if level == 0 && params.mipmaps > 1 {
      entry.mipmaps_outdated = true;
    }
  }

  /// Drop the contents of every level. The storage stays allocated but becomes undefined.
  pub fn texture_invalidate(&mut self, id: TextureId) {
    let Some(entry) = self.textures.get(id) else {
      debug_assert!(false, "invalidating a dead texture");
      error!("ignoring invalidation of a dead texture");
      return;
    };
    let params = entry.params;

    self.edit_texture(id);

    let device = self.device.as_mut();
    for level in 0..params.mipmaps {
      let w = mip_extent(params.width, level);
      let h = mip_extent(params.height, level);
      for layer in 0..params.kind.layers() {
        device.texture_image(params.kind, layer, level, params.format, w, h, None);
      }
    }
  }

  /// Clear every level of a 2D texture to a constant. Depth formats take the value from the
  /// red channel. This goes through a scratch framebuffer, which is the one path every
  /// supported device has.
  pub fn texture_clear(&mut self, id: TextureId, color: Color) {
    let Some(entry) = self.textures.get(id) else {
      debug_assert!(false, "clearing a dead texture");
      error!("ignoring clear of a dead texture");
      return;
    };
    let raw = entry.raw;
    let params = entry.params;

    if params.kind != TextureKind::TwoD {
      debug_assert!(false, "clearing cube maps is unsupported");
      error!("{}: clearing cube maps is unsupported", entry.debug_label);
      return;
    }

    let scratch = match self.scratch_framebuffer {
      Some(fb) => fb,
      None => {
        let fb = self.device.create_framebuffer();
        self.scratch_framebuffer = Some(fb);
        fb
      }
    };
    let mrt = self.features.contains(FeatureSet::MULTIPLE_RENDER_TARGETS);

    let Renderer { device, state, textures, .. } = self;
    let device = device.as_mut();

    // The scratch framebuffer is not in the registry, so bypass the tracker and invalidate
    // it; the next draw rebinds whatever is staged.
    device.bind_draw_framebuffer(Some(scratch));
    state.framebuffer.invalidate();

    if state.scissor_active_enabled != Some(false) {
      device.apply_scissor_enabled(false);
      state.scissor_active_enabled = Some(false);
    }

    let depth = params.format.is_depth();
    let slot = if depth { Attachment::Depth } else { Attachment::Color0 };
    let flags = if depth { ClearFlags::DEPTH } else { ClearFlags::COLOR };

    if depth {
      if !state.capabilities.current().contains(Capability::DepthWrite) {
        device.apply_capability(Capability::DepthWrite, true);
        state.capabilities.invalidate();
      }
      state.clear_depth.set(color.r);
      state.clear_depth.sync(|d| device.apply_clear_depth(*d));
    } else {
      if mrt {
        device.set_draw_buffers(&[Some(0), None, None, None]);
      }
      state.clear_color.set(color);
      state.clear_color.sync(|c| device.apply_clear_color(*c));
    }

    for level in 0..params.mipmaps {
      device.framebuffer_texture(slot, Some(raw), level);
      device.clear(flags);
    }
    device.framebuffer_texture(slot, None, 0);

    if let Some(entry) = textures.get_mut(id) {
      entry.mipmaps_outdated = false;
    }
  }

  pub fn set_texture_filter(&mut self, id: TextureId, min: MinFilter, mag: MagFilter) {
    let Some(entry) = self.textures.get(id) else {
      debug_assert!(false, "filtering a dead texture");
      return;
    };
    if entry.params.filter_min == min && entry.params.filter_mag == mag {
      return;
    }
    let kind = entry.params.kind;

    self.edit_texture(id);
    self.device.set_texture_filter(kind, min, mag);

    if let Some(entry) = self.textures.get_mut(id) {
      entry.params.filter_min = min;
      entry.params.filter_mag = mag;
    }
  }

  pub fn set_texture_wrap(&mut self, id: TextureId, wrap_s: Wrap, wrap_t: Wrap) {
    let Some(entry) = self.textures.get(id) else {
      debug_assert!(false, "wrapping a dead texture");
      return;
    };
    if entry.params.wrap_s == wrap_s && entry.params.wrap_t == wrap_t {
      return;
    }
    let kind = entry.params.kind;

    self.edit_texture(id);
    self.device.set_texture_wrap(kind, wrap_s, wrap_t);

    if let Some(entry) = self.textures.get_mut(id) {
      entry.params.wrap_s = wrap_s;
      entry.params.wrap_t = wrap_t;
    }
  }

  /// Parameters a texture was created with, with the mip count normalized.
  pub fn texture_params(&self, id: TextureId) -> Option<TextureParams> {
    self.textures.get(id).map(|e| e.params)
  }

  /// Stage `texture` on a unit for the next draw and return the unit used. `preferred_unit` is a
  /// placement hint; it decides placement outright only under the sampler-pinning quirk or
  /// when clearing (`texture` = `None`, which unbinds a stale binding of `kind`).
  pub fn set_texture(
    &mut self,
    texture: Option<TextureId>,
    kind: TextureKind,
    preferred_unit: Option<usize>,
  ) -> usize {
    let Renderer { texunits, textures, quirks, .. } = self;

    match texture {
      Some(id) => {
        let Some(entry) = textures.get(id) else {
          debug_assert!(false, "staging a dead texture");
          error!("ignoring a dead texture");
          return 0;
        };
        debug_assert!(entry.params.kind == kind, "texture kind mismatch");
        let kind = entry.params.kind;
        texunits.assign(textures, Some(id), Some(kind), preferred_unit, quirks.pin_sampler_units)
      }
      None => texunits.assign(textures, None, Some(kind), preferred_unit, false),
    }
  }

  /// Bind `id` on some unit and leave the hardware selector there, ahead of an edit.
  fn edit_texture(&mut self, id: TextureId) {
    let Renderer { device, texunits, textures, stats, .. } = self;
    let device = device.as_mut();

    let unit = texunits.assign(textures, Some(id), None, None, false);
    texunits.sync_unit(unit, textures, device, &mut stats.texture_rebinds, false, true);
  }

  fn detach_framebuffer_slot(&mut self, framebuffer: FramebufferId, slot: Attachment) {
    let Renderer { device, state, framebuffers, .. } = self;
    let device = device.as_mut();
    let Some(entry) = framebuffers.get_mut(framebuffer) else {
      return;
    };

    let saved = *state.framebuffer.current();
    state.framebuffer.set(Some(framebuffer));
    let raw = Some(entry.raw);
    state.framebuffer.sync(|_| device.bind_draw_framebuffer(raw));
    device.framebuffer_texture(slot, None, 0);
    state.framebuffer.set(saved);

    entry.attachments[slot.index()] = None;
    entry.draw_buffers_dirty = true;
  }

  // --- shader programs ---

  /// Compile both stages, link them and reflect the uniforms. Magic uniforms with the wrong
  /// type fail the whole link rather than corrupting uploads later.
  pub fn create_program(
    &mut self,
    vertex_source: &str,
    fragment_source: &str,
    label: &str,
  ) -> Result<ProgramId, ProgramError> {
    let device = self.device.as_mut();

    let vertex = device.create_shader_stage(StageKind::Vertex, vertex_source)?;
    let fragment = match device.create_shader_stage(StageKind::Fragment, fragment_source) {
      Ok(stage) => stage,
      Err(e) => {
        device.delete_shader_stage(vertex);
        return Err(e.into());
      }
    };

    let linked = device.link_program(&[vertex, fragment]);
    device.delete_shader_stage(vertex);
    device.delete_shader_stage(fragment);
    let raw = linked?;

    let mut uniforms: Vec<Uniform> = Vec::new();
    let mut by_name = HashMap::new();
    let mut magic = [None; MagicUniform::COUNT];

    for info in device.active_uniforms(raw) {
      let Some(ty) = info.ty else {
        debug!("{}: skipping uniform {} of an unsupported type", label, info.name);
        continue;
      };
      let name = base_name(&info.name).to_string();
      let index = uniforms.len();

      if let Some(m) = MagicUniform::from_name(&name) {
        if ty != m.expected_type() {
          device.delete_program(raw);
          return Err(ProgramError::MagicTypeMismatch {
            name: m.name(),
            expected: m.expected_type(),
            found: ty,
          });
        }
        magic[m.index()] = Some(index);
      }

      by_name.insert(name.clone(), index);
      uniforms.push(Uniform::new(name, info.location, ty, info.array_size.max(1)));
    }

    // Wire up the `<name>_SIZE` companions of sampler uniforms.
    for index in 0..uniforms.len() {
      if !uniforms[index].ty.is_sampler() {
        continue;
      }
      let companion = format!("{}_SIZE", uniforms[index].name);
      if let Some(&size_index) = by_name.get(companion.as_str()) {
        if uniforms[size_index].ty == UniformType::Vec2 {
          uniforms[index].size_uniform = Some(size_index);
        }
      }
    }

    // Under the pinning quirk every sampler element gets its unit now and keeps it forever.
    if self.quirks.pin_sampler_units {
      let mut next_unit = 0;
      for uniform in &mut uniforms {
        if !uniform.ty.is_sampler() {
          continue;
        }
        for element in 0..uniform.array_size {
          if next_unit >= self.texunits.len() {
            warn!("{}: more sampler elements than texture units, wrapping", label);
            next_unit = 0;
          }
          uniform.write_ints(element, &[next_unit as i32]);
          next_unit += 1;
        }
      }
    }

    let samplers: Vec<usize> = uniforms
      .iter()
      .enumerate()
      .filter(|(_, u)| u.ty.is_sampler())
      .map(|(i, _)| i)
      .collect();
    let count = uniforms.len();

    let id = self.programs.insert(ProgramEntry {
      raw,
      uniforms,
      by_name,
      magic,
      debug_label: label.to_string(),
    });
    self
      .sampler_uniforms
      .extend(samplers.into_iter().map(|index| (id, index)));

    debug!("{}: linked, {} uniforms", label, count);
    Ok(id)
  }

  pub fn destroy_program(&mut self, id: ProgramId) {
    let Some(entry) = self.programs.remove(id) else {
      return;
    };

    self.sampler_uniforms.retain(|&(program, _)| program != id);
    if self.default_program == Some(id) {
      self.default_program = None;
    }
    if *self.state.program.current() == Some(id) {
      // The staged program just died; fall back to the known-good default.
      self.state.program.set(self.default_program);
    }

    self.device.delete_program(entry.raw);
    debug!("{}: destroyed program", entry.debug_label);
  }

  /// Stage the program the next draw runs with.
  pub fn set_shader(&mut self, program: ProgramId) {
    if self.programs.get(program).is_none() {
      debug_assert!(false, "staging a dead shader program");
      error!("ignoring a dead shader program");
      return;
    }
    self.state.program.set(Some(program));
  }

  pub fn shader(&self) -> Option<ProgramId> {
    *self.state.program.current()
  }

  /// Register the program staged whenever the pending one is destroyed, and used when no
  /// program was ever staged.
  pub fn set_default_program(&mut self, program: ProgramId) {
    if self.programs.get(program).is_none() {
      debug_assert!(false, "registering a dead default program");
      error!("ignoring a dead default program");
      return;
    }
    self.default_program = Some(program);
  }

  // --- uniforms ---

  pub fn uniform_handle(&self, program: ProgramId, name: &str) -> Option<UniformHandle> {
    let index = self.programs.get(program)?.uniform_index(name)?;
    Some(UniformHandle { program, index })
  }

  pub fn uniform_type(&self, handle: UniformHandle) -> Option<UniformType> {
    Some(self.programs.get(handle.program)?.uniforms[handle.index].ty)
  }

  /// Stage a uniform value starting at array element 0.
  pub fn set_uniform(&mut self, handle: UniformHandle, data: UniformData) {
    self.set_uniform_at(handle, 0, data);
  }

  /// Stage a uniform value starting at `first_element`. Writes past the array end are
  /// clamped; a payload kind not matching the uniform type is rejected.
  pub fn set_uniform_at(&mut self, handle: UniformHandle, first_element: usize, data: UniformData) {
    let Renderer { programs, textures, .. } = self;
    let Some(entry) = programs.get_mut(handle.program) else {
      return;
    };
    let uniform = &mut entry.uniforms[handle.index];

    match data {
      UniformData::Floats(values) => {
        if !uniform.ty.is_float_backed() {
          debug_assert!(false, "float payload for a non-float uniform");
          error!("{}: ignoring float payload for {}", uniform.name, uniform.ty);
          return;
        }
        uniform.write_floats(first_element, values);
      }
      UniformData::Ints(values) => {
        if uniform.ty.is_float_backed() || uniform.ty.is_sampler() {
          debug_assert!(false, "int payload for a non-int uniform");
          error!("{}: ignoring int payload for {}", uniform.name, uniform.ty);
          return;
        }
        uniform.write_ints(first_element, values);
      }
      UniformData::Textures(staged) => {
        if !uniform.ty.is_sampler() {
          debug_assert!(false, "texture payload for a non-sampler uniform");
          error!("{}: ignoring texture payload for {}", uniform.name, uniform.ty);
          return;
        }
        if cfg!(debug_assertions) {
          for texture in staged.iter().flatten() {
            debug_assert!(
              textures.get(*texture).is_some(),
              "staging a dead texture on a sampler"
            );
          }
        }
        uniform.set_textures(first_element, staged);
      }
    }
  }

  /// Convenience lookup-and-set; silently does nothing when the program has no uniform of
  /// that name, which is common across shader permutations.
  pub fn set_uniform_by_name(&mut self, program: ProgramId, name: &str, data: UniformData) {
    if let Some(handle) = self.uniform_handle(program, name) {
      self.set_uniform(handle, data);
    }
  }

  /// The texture staged on a sampler uniform's array element.
  pub fn sampler_texture(&self, handle: UniformHandle, element: usize) -> Option<TextureId> {
    self
      .programs
      .get(handle.program)?
      .uniforms[handle.index]
      .textures
      .get(element)
      .copied()
      .flatten()
  }

  // --- buffers and vertex arrays ---

  /// Create a vertex buffer with `capacity` bytes of storage (rounded up to a power of two).
  pub fn create_vertex_buffer(&mut self, capacity: usize, usage: BufferUsage, label: &str) -> BufferId {
    self.create_buffer(BufferTarget::Array, None, capacity, usage, label)
  }

  /// Create an index buffer; `format` fixes the width of its indices.
  pub fn create_index_buffer(
    &mut self,
    capacity: usize,
    format: IndexFormat,
    usage: BufferUsage,
    label: &str,
  ) -> BufferId {
    self.create_buffer(BufferTarget::ElementArray, Some(format), capacity, usage, label)
  }

  fn create_buffer(
    &mut self,
    target: BufferTarget,
    index_format: Option<IndexFormat>,
    capacity: usize,
    usage: BufferUsage,
    label: &str,
  ) -> BufferId {
    let raw = self.device.create_buffer();
    let mut entry = BufferEntry::new(raw, target, usage, capacity, label.to_string());
    entry.index_format = index_format;

    let Renderer { device, state, .. } = self;
    with_buffer_bound(state, device.as_mut(), target, raw, |device| {
      device.buffer_data(target, entry.cache.len(), None, usage);
    });

    debug!("{}: created {} byte {:?} buffer", label, entry.cache.len(), target);
    self.buffers.insert(entry)
  }

  pub fn destroy_buffer(&mut self, id: BufferId) {
    let Some(entry) = self.buffers.remove(id) else {
      return;
    };

    for target in [
      BufferTarget::Array,
      BufferTarget::ElementArray,
      BufferTarget::PixelUnpack,
      BufferTarget::PixelPack,
    ] {
      let tracker = self.state.buffer(target);
      if *tracker.current() == Some(entry.raw) {
        tracker.set(None);
      }
      if tracker.active() == Some(&Some(entry.raw)) {
        // The driver unbinds deleted buffers on its own and may reuse the raw handle.
        tracker.invalidate();
      }
    }

    for (_, vertex_array) in self.vertex_arrays.iter_mut() {
      vertex_array.detach_buffer(id);
    }

    self.device.delete_buffer(entry.raw);
    debug!("{}: destroyed buffer", entry.debug_label);
  }

  /// Streaming write access to a buffer's local cache. Dirty bytes upload at the next draw
  /// that uses the buffer.
  pub fn buffer_writer(&mut self, id: BufferId) -> Option<BufferWriter<'_>> {
    self.buffers.get_mut(id).map(BufferWriter::new)
  }

  /// Forget the buffer contents and reallocate hardware storage at the next flush, which
  /// lets the driver orphan storage still referenced by in-flight frames.
  pub fn buffer_invalidate(&mut self, id: BufferId) {
    let Some(entry) = self.buffers.get_mut(id) else {
      return;
    };
    entry.invalidate();
    entry.committed_size = 0;
  }

  pub fn create_vertex_array(&mut self, label: &str) -> VertexArrayId {
    let raw = self.device.create_vertex_array();
    debug!("{}: created vertex array", label);
    self
      .vertex_arrays
      .insert(VertexArrayEntry::new(raw, label.to_string()))
  }

  pub fn destroy_vertex_array(&mut self, id: VertexArrayId) {
    let Some(entry) = self.vertex_arrays.remove(id) else {
      return;
    };
    if *self.state.vertex_array.current() == Some(id) {
      self.state.vertex_array.set(None);
    }
    self.device.delete_vertex_array(entry.raw);
    debug!("{}: destroyed vertex array", entry.debug_label);
  }

  /// Replace the attribute layout. Every attribute is replayed at the next draw.
  pub fn vertex_array_layout(&mut self, id: VertexArrayId, layout: &[VertexAttribFormat]) {
    let Some(entry) = self.vertex_arrays.get_mut(id) else {
      debug_assert!(false, "laying out a dead vertex array");
      error!("ignoring layout of a dead vertex array");
      return;
    };
    debug_assert!(
      layout.iter().all(|a| (1..=4).contains(&a.elements)),
      "attributes carry 1 to 4 scalars"
    );

    entry.layout = layout.to_vec();
    entry.mark_layout_dirty();
  }

  /// Attach a vertex buffer to a slot of the array, or clear the slot with `None`.
  pub fn attach_vertex_buffer(&mut self, id: VertexArrayId, slot: usize, buffer: Option<BufferId>) {
    if let Some(b) = buffer {
      debug_assert!(
        self.buffers.get(b).map_or(false, |e| e.target == BufferTarget::Array),
        "vertex attachments take vertex buffers"
      );
    }
    let Some(entry) = self.vertex_arrays.get_mut(id) else {
      debug_assert!(false, "attaching to a dead vertex array");
      error!("ignoring attachment to a dead vertex array");
      return;
    };

    if entry.attachments.len() <= slot {
      entry.attachments.resize(slot + 1, None);
    }
    entry.attachments[slot] = buffer;
    entry.mark_slot_dirty(slot);
  }

  /// Attach the index buffer of the array, or detach with `None`.
  pub fn attach_index_buffer(&mut self, id: VertexArrayId, buffer: Option<BufferId>) {
    if let Some(b) = buffer {
      debug_assert!(
        self
          .buffers
          .get(b)
          .map_or(false, |e| e.target == BufferTarget::ElementArray),
        "index attachments take index buffers"
      );
    }
    let Some(entry) = self.vertex_arrays.get_mut(id) else {
      debug_assert!(false, "attaching to a dead vertex array");
      error!("ignoring attachment to a dead vertex array");
      return;
    };

    entry.index_attachment = buffer;
    entry.mark_index_dirty();
  }

  // --- draw submission ---

  /// Draw `count` vertices starting at `first`. This is the synchronization point: every
  /// staged state delta is applied here, then the draw is issued.
  pub fn draw(
    &mut self,
    vertex_array: VertexArrayId,
    primitive: Primitive,
    first: usize,
    count: usize,
    instances: usize,
  ) {
    if !self.predraw_checks(vertex_array, count) {
      return;
    }
    let instances = self.clamp_instances(instances);

    let previous = *self.state.vertex_array.current();
    self.state.vertex_array.set(Some(vertex_array));
    self.sync_state();
    self.flush_vertex_array(vertex_array);

    self.device.draw_arrays(primitive, first, count, instances);
    self.stats.draw_calls += 1;

    self.state.vertex_array.set(previous);
    self.taint_render_target();
  }

  /// Draw `count` indices starting at index `first_index` of the array's index buffer.
  pub fn draw_indexed(
    &mut self,
    vertex_array: VertexArrayId,
    primitive: Primitive,
    first_index: usize,
    count: usize,
    instances: usize,
  ) {
    if !self.predraw_checks(vertex_array, count) {
      return;
    }
    let format = self
      .vertex_arrays
      .get(vertex_array)
      .and_then(|e| e.index_attachment)
      .and_then(|id| self.buffers.get(id))
      .and_then(|b| b.index_format);
    let Some(format) = format else {
      debug_assert!(false, "indexed draw without an index buffer");
      error!("ignoring indexed draw without an index buffer");
      return;
    };
    let instances = self.clamp_instances(instances);

    let previous = *self.state.vertex_array.current();
    self.state.vertex_array.set(Some(vertex_array));
    self.sync_state();
    self.flush_vertex_array(vertex_array);

    let byte_offset = first_index * format.byte_len();
    self
      .device
      .draw_elements(primitive, count, format, byte_offset, instances);
    self.stats.draw_calls += 1;

    self.state.vertex_array.set(previous);
    self.taint_render_target();
  }

  fn predraw_checks(&self, vertex_array: VertexArrayId, count: usize) -> bool {
    debug_assert!(count > 0, "draw with a vertex count of zero");
    debug_assert!(
      self.vertex_arrays.get(vertex_array).is_some(),
      "draw with a dead vertex array"
    );
    debug_assert!(
      self.state.program.current().is_some() || self.default_program.is_some(),
      "draw without a shader program"
    );

    if count == 0 {
      error!("ignoring draw with a vertex count of zero");
      return false;
    }
    if self.vertex_arrays.get(vertex_array).is_none() {
      error!("ignoring draw with a dead vertex array");
      return false;
    }
    if self.state.program.current().is_none() && self.default_program.is_none() {
      error!("ignoring draw without a shader program");
      return false;
    }
    true
  }

  fn clamp_instances(&mut self, instances: usize) -> usize {
    let instances = instances.max(1);
    if instances > 1 && !self.features.contains(FeatureSet::INSTANCED_DRAWS) {
      if !self.warned_instancing {
        self.warned_instancing = true;
        warn!("device does not support instancing, drawing single instances");
      }
      return 1;
    }
    instances
  }

  /// After a draw, the base levels of the target's attachments no longer match their mip
  /// chains.
  fn taint_render_target(&mut self) {
    let target = *self.state.framebuffer.current();
    let Some(entry) = target.and_then(|id| self.framebuffers.get(id)) else {
      return;
    };

    let attachments = entry.attachments;
    for attachment in attachments.iter().flatten() {
      if let Some(texture) = self.textures.get_mut(attachment.texture) {
        texture.mipmaps_outdated = true;
      }
    }
  }

  /// Apply every staged delta to the hardware.
  ///
  /// Ordering constraints: sampler uniforms resolve to unit indices (locking the units)
  /// before the unit pool is applied, and the pool pass releases the locks again. The
  /// framebuffer must be settled before the viewport and scissor, which live in its space.
  fn sync_state(&mut self) {
    let Renderer {
      device,
      features,
      quirks,
      state,
      texunits,
      textures,
      framebuffers,
      programs,
      vertex_arrays,
      default_program,
      model_view_matrix,
      projection_matrix,
      texture_matrix,
      color,
      drawable_size,
      stats,
      ..
    } = self;
    let device = device.as_mut();

    // 1. capability bits
    sync_capabilities(&mut state.capabilities, device);

    // 2. draw framebuffer, plus its draw-buffer routing while it is bound
    let target = *state.framebuffer.current();
    let target_raw = target.and_then(|id| framebuffers.get(id)).map(|e| e.raw);
    state
      .framebuffer
      .sync(|_| device.bind_draw_framebuffer(target_raw));
    if features.contains(FeatureSet::MULTIPLE_RENDER_TARGETS) {
      if let Some(entry) = target.and_then(|id| framebuffers.get_mut(id)) {
        if entry.draw_buffers_dirty {
          let outputs = entry
            .output_mapping
            .map(|slot| slot.and_then(|a| a.color_index()));
          device.set_draw_buffers(&outputs);
          entry.draw_buffers_dirty = false;
        }
      }
    }

    // 3. shader program
    if state.program.current().is_none() {
      if let Some(fallback) = *default_program {
        state.program.set(Some(fallback));
      }
    }
    let program = *state.program.current();
    let program_raw = program.and_then(|id| programs.get(id)).map(|e| e.raw);
    state.program.sync(|_| device.use_program(program_raw));

    // 4. viewport, in the space of the target
    let hw_viewport = match target.and_then(|id| framebuffers.get(id)) {
      Some(entry) => entry.viewport,
      None => state.default_viewport,
    };
    if state.viewport_active != Some(hw_viewport) {
      device.apply_viewport(hw_viewport);
      state.viewport_active = Some(hw_viewport);
    }

    // 5. scissor; a zero-area rectangle turns the test off
    let scissor = state.scissor_pending;
    let scissor_on = !scissor.is_empty();
    if scissor_on {
      let hw_scissor = if target.is_some() {
        let height = target_height(framebuffers, textures, target, *drawable_size) as i32;
        scissor.flipped_y(height)
      } else {
        scissor
      };
      if state.scissor_active_rect != Some(hw_scissor) {
        device.apply_scissor(hw_scissor);
        state.scissor_active_rect = Some(hw_scissor);
      }
    }
    if state.scissor_active_enabled != Some(scissor_on) {
      device.apply_scissor_enabled(scissor_on);
      state.scissor_active_enabled = Some(scissor_on);
    }

    // 6 and 7. uniforms of the active program: magic values, sampler resolution, commit
    if let Some(entry) = program.and_then(|id| programs.get_mut(id)) {
      if let Some(i) = entry.magic_index(MagicUniform::ModelViewMatrix) {
        entry.uniforms[i].write_floats(0, &mat4_scalars(model_view_matrix));
      }
      if let Some(i) = entry.magic_index(MagicUniform::ProjectionMatrix) {
        entry.uniforms[i].write_floats(0, &mat4_scalars(projection_matrix));
      }
      if let Some(i) = entry.magic_index(MagicUniform::TextureMatrix) {
        entry.uniforms[i].write_floats(0, &mat4_scalars(texture_matrix));
      }
      if let Some(i) = entry.magic_index(MagicUniform::Color) {
        entry.uniforms[i].write_floats(0, &color.to_array());
      }
      if let Some(i) = entry.magic_index(MagicUniform::Viewport) {
        let logical = match target.and_then(|id| framebuffers.get(id)) {
          Some(fb) => {
            let height = target_height(framebuffers, textures, target, *drawable_size) as f32;
            fb.viewport.flipped_y(height)
          }
          None => state.default_viewport,
        };
        entry.uniforms[i].write_floats(
          0,
          &[logical.x, logical.y, logical.width, logical.height],
        );
      }
      if let Some(i) = entry.magic_index(MagicUniform::ColorOutputSizes) {
        for output in 0..entry.uniforms[i].array_size.min(MAX_OUTPUTS) {
          let size = match target.and_then(|id| framebuffers.get(id)) {
            Some(fb) => fb.output_mapping[output]
              .and_then(|slot| fb.attachment(slot))
              .and_then(|a| textures.get(a.texture).map(|t| t.mip_size(a.mip_level)))
              .unwrap_or((0, 0)),
            None if output == 0 => *drawable_size,
            None => (0, 0),
          };
          entry.uniforms[i].write_floats(output, &[size.0 as f32, size.1 as f32]);
        }
      }
      if let Some(i) = entry.magic_index(MagicUniform::DepthOutputSize) {
        let size = match target.and_then(|id| framebuffers.get(id)) {
          Some(fb) => fb
            .attachment(Attachment::Depth)
            .and_then(|a| textures.get(a.texture).map(|t| t.mip_size(a.mip_level)))
            .unwrap_or((0, 0)),
          None => *drawable_size,
        };
        entry.uniforms[i].write_floats(0, &[size.0 as f32, size.1 as f32]);
      }

      // Resolve samplers to unit indices. Each assignment locks its unit so later
      // assignments in the same pass cannot steal it.
      let mut size_writes: Vec<(usize, usize, [f32; 2])> = Vec::new();
      for index in 0..entry.uniforms.len() {
        let Some(sampler_kind) = entry.uniforms[index].ty.sampler_kind() else {
          continue;
        };

        for element in 0..entry.uniforms[index].array_size {
          let Some(texture) = entry.uniforms[index].textures[element] else {
            continue;
          };

          let Some(texture_entry) = textures.get(texture) else {
            debug_assert!(false, "sampler slot holds a dead texture id");
            entry.uniforms[index].textures[element] = None;
            continue;
          };
          if texture_entry.params.kind != sampler_kind {
            error!(
              "{}: {:?} texture staged on a {} sampler, skipping",
              entry.uniforms[index].name, texture_entry.params.kind, entry.uniforms[index].ty
            );
            continue;
          }
          let texture_size = (texture_entry.params.width, texture_entry.params.height);

          if quirks.pin_sampler_units {
            let pinned = match &entry.uniforms[index].store {
              UniformStore::Ints { pending, .. } => pending[element].max(0) as usize,
              UniformStore::Floats { .. } => 0,
            };
            let pinned = pinned.min(texunits.len() - 1);
            texunits.assign(textures, Some(texture), Some(sampler_kind), Some(pinned), true);
          } else {
            let unit = texunits.assign(textures, Some(texture), Some(sampler_kind), None, false);
            entry.uniforms[index].write_ints(element, &[unit as i32]);
          }

          if let Some(companion) = entry.uniforms[index].size_uniform {
            size_writes.push((
              companion,
              element,
              [texture_size.0 as f32, texture_size.1 as f32],
            ));
          }
        }
      }
      for (index, element, size) in size_writes {
        entry.uniforms[index].write_floats(element, &size);
      }

      for uniform in &mut entry.uniforms {
        uniform.commit(device);
      }
    }

    // 8. texture units: bind, regenerate tainted mip chains, release locks
    texunits.sync_all(textures, device, &mut stats.texture_rebinds);

    // 9. vertex array; the element-array binding travels with it
    if state.vertex_array.is_dirty() {
      let vertex_array = *state.vertex_array.current();
      let vertex_array_raw = vertex_array
        .and_then(|id| vertex_arrays.get(id))
        .map(|e| e.raw);
      state
        .vertex_array
        .sync(|_| device.bind_vertex_array(vertex_array_raw));
      state.buffer(BufferTarget::ElementArray).invalidate();
    }

    // 10. blending, with the mode memory surviving disables
    match state.blend_pending {
      Some(mode) => {
        if state.blend_enabled != Some(true) {
          device.apply_blend_enabled(true);
          state.blend_enabled = Some(true);
        }
        if state.blend_applied_mode != Some(mode) {
          device.apply_blend_mode(mode);
          state.blend_applied_mode = Some(mode);
        }
      }
      None => {
        if state.blend_enabled != Some(false) {
          device.apply_blend_enabled(false);
          state.blend_enabled = Some(false);
        }
      }
    }

    // 11. cull mode, deferred while the capability is off
    if state.capabilities.current().contains(Capability::CullFace) {
      state.cull.sync(|m| device.apply_cull_mode(*m));
    }

    // 12. depth comparison, deferred while depth testing is off
    if state.capabilities.current().contains(Capability::DepthTest) {
      state
        .depth_comparison
        .sync(|c| device.apply_depth_comparison(*c));
    }

    // 13. sRGB encoding is on exactly for the default framebuffer
    if features.contains(FeatureSet::SRGB_WRITES) {
      state.srgb_write.set(target.is_none());
      state.srgb_write.sync(|on| device.apply_srgb_write(*on));
    }
  }

  /// Upload dirty buffer ranges and replay changed attributes of the bound vertex array.
  fn flush_vertex_array(&mut self, id: VertexArrayId) {
    let Renderer { device, state, vertex_arrays, buffers, .. } = self;
    let device = device.as_mut();
    let Some(entry) = vertex_arrays.get_mut(id) else {
      return;
    };

    for buffer in entry.referenced_buffers() {
      if let Some(b) = buffers.get_mut(buffer) {
        flush_buffer(state, device, b);
      }
    }

    if entry.dirty_bits != 0 {
      for (index, format) in entry.layout.iter().enumerate().take(31) {
        if entry.dirty_bits & (1 << index) == 0 {
          continue;
        }
        let attached = entry
          .attachments
          .get(format.attachment)
          .copied()
          .flatten()
          .and_then(|b| buffers.get(b))
          .map(|b| b.raw);
        match attached {
          Some(raw) => {
            // The attribute pointer captures whatever is on the array binding point.
            state.buffer(BufferTarget::Array).set(Some(raw));
            state
              .buffer(BufferTarget::Array)
              .sync(|r| device.bind_buffer(BufferTarget::Array, *r));
            device.set_vertex_attribute(index, format);
          }
          None => device.disable_vertex_attribute(index),
        }
      }
    }

    for index in entry.layout.len()..entry.prev_num_attributes {
      device.disable_vertex_attribute(index);
    }
    entry.prev_num_attributes = entry.layout.len();

    // The element binding is vertex-array state, so it is restated under the bound array
    // every draw; the tracker turns that into a call only when it actually changed.
    let index_raw = entry
      .index_attachment
      .and_then(|b| buffers.get(b))
      .map(|b| b.raw);
    state.buffer(BufferTarget::ElementArray).set(index_raw);
    state
      .buffer(BufferTarget::ElementArray)
      .sync(|r| device.bind_buffer(BufferTarget::ElementArray, *r));

    entry.dirty_bits = 0;
  }

  // --- readback ---

  /// Read a region of a framebuffer attachment without stalling. The callback runs from a
  /// later [`Renderer::poll_read_requests`] or [`Renderer::finish_frame`] with the pixels,
  /// or with `None` when the read failed.
  pub fn read_framebuffer_async(
    &mut self,
    target: Option<FramebufferId>,
    attachment: Attachment,
    region: IntRect,
    callback: impl FnOnce(Option<&Pixmap>) + 'static,
  ) {
    let format = match target {
      Some(id) => self
        .framebuffers
        .get(id)
        .and_then(|e| e.attachment(attachment))
        .and_then(|a| self.textures.get(a.texture))
        .map(|t| t.params.format),
      None => Some(PixelFormat::Rgba8),
    };
    let Some(format) = format else {
      debug_assert!(false, "reading a framebuffer slot with nothing attached");
      error!("reading a framebuffer slot with nothing attached");
      callback(None);
      return;
    };
    if region.is_empty() {
      debug_assert!(false, "reading an empty region");
      error!("ignoring read of an empty region");
      callback(None);
      return;
    }

    let Renderer { device, state, framebuffers, textures, drawable_size, readback, .. } = self;
    let device = device.as_mut();

    let slot = readback.claim_slot(state, device);
    let pbo = readback.slot_pbo(slot, device);

    let width = region.width.max(0) as u32;
    let height = region.height.max(0) as u32;
    let size = width as usize * height as usize * format.pixel_size();
    prepare_pack_buffer(state, device, pbo, size);

    let hw_region = if target.is_some() {
      let extent = target_height(framebuffers, textures, target, *drawable_size) as i32;
      region.flipped_y(extent)
    } else {
      region
    };

    let read_raw = target.and_then(|id| framebuffers.get(id)).map(|e| e.raw);
    device.bind_read_framebuffer(read_raw, attachment);

    // The pack binding must be live for the read itself.
    state.buffer(BufferTarget::PixelPack).set(Some(pbo));
    state
      .buffer(BufferTarget::PixelPack)
      .sync(|r| device.bind_buffer(BufferTarget::PixelPack, *r));
    device.read_pixels_to_pack_buffer(hw_region, format);
    state.buffer(BufferTarget::PixelPack).set(None);

    let fence = device.create_fence();
    readback.submit(slot, fence, width, height, format, Box::new(callback));
  }

  /// Complete every finished read request. Cheap; safe to call any time.
  pub fn poll_read_requests(&mut self) {
    let Renderer { device, state, readback, .. } = self;
    readback.poll(state, device.as_mut());
  }

  /// Frame boundary: resolve finished readbacks, restage the default framebuffer for
  /// presentation, refresh the drawable size and reset the frame counters.
  pub fn finish_frame(&mut self) {
    {
      let Renderer { device, state, readback, .. } = self;
      let device = device.as_mut();

      readback.poll(state, device);

      state.framebuffer.set(None);
      state.framebuffer.sync(|_| device.bind_draw_framebuffer(None));
    }

    self.drawable_size = self.device.default_framebuffer_size();

    // Presentation code outside the renderer touches the viewport behind our back.
    self.state.viewport_active = None;

    debug!(
      "frame: {} draw calls, {} texture rebinds",
      self.stats.draw_calls, self.stats.texture_rebinds
    );
    self.stats = FrameStats::default();
  }
}

impl Drop for Renderer {
  fn drop(&mut self) {
    let Renderer {
      device,
      state,
      readback,
      textures,
      buffers,
      framebuffers,
      programs,
      vertex_arrays,
      scratch_framebuffer,
      ..
    } = self;
    let device = device.as_mut();

    readback.finalize(state, device);

    debug!(
      "destroying renderer: {} textures, {} buffers, {} framebuffers, {} programs, {} vertex arrays",
      textures.len(),
      buffers.len(),
      framebuffers.len(),
      programs.len(),
      vertex_arrays.len()
    );

    for (_, texture) in textures.iter() {
      if let Some(pbo) = texture.transfer_buffer {
        device.delete_buffer(pbo);
      }
      device.delete_texture(texture.raw);
    }
    for (_, buffer) in buffers.iter() {
      device.delete_buffer(buffer.raw);
    }
    for (_, framebuffer) in framebuffers.iter() {
      device.delete_framebuffer(framebuffer.raw);
    }
    if let Some(scratch) = scratch_framebuffer.take() {
      device.delete_framebuffer(scratch);
    }
    for (_, program) in programs.iter() {
      device.delete_program(program.raw);
    }
    for (_, vertex_array) in vertex_arrays.iter() {
      device.delete_vertex_array(vertex_array.raw);
    }
  }
}

/// Vertical extent of a render target, which anchors the flip between caller space and
/// hardware space. Offscreen targets measure by their first attachment's base size.
fn target_height(
  framebuffers: &Registry<FramebufferId, FramebufferEntry>,
  textures: &Registry<TextureId, TextureEntry>,
  target: Option<FramebufferId>,
  drawable_size: (u32, u32),
) -> u32 {
  match target.and_then(|id| framebuffers.get(id)) {
    Some(entry) => entry
      .first_attachment()
      .and_then(|a| textures.get(a.texture))
      .map(|t| t.params.height)
      .unwrap_or(0),
    None => drawable_size.1,
  }
}

/// Push a buffer's dirty range to the hardware, reallocating storage first when the cache
/// outgrew the last committed size.
fn flush_buffer(state: &mut StateCache, device: &mut dyn Device, entry: &mut BufferEntry) {
  let realloc = entry.committed_size != entry.cache.len();
  let dirty = entry.dirty_range();

  if !realloc && dirty.is_none() {
    return;
  }

  with_buffer_bound(state, device, entry.target, entry.raw, |device| {
    if realloc {
      device.buffer_data(entry.target, entry.cache.len(), None, entry.usage);
    }
    if let Some((begin, end)) = dirty {
      device.buffer_sub_data(entry.target, begin, &entry.cache[begin..end]);
    }
  });

  entry.committed_size = entry.cache.len();
  entry.reset_dirty();
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::io::{Seek as _, SeekFrom, Write as _};
  use std::rc::Rc;

  use super::*;
  use crate::device::{RecordingDevice, UniformInfo};
  use crate::null::NullDevice;
  use crate::vertex_array::{AttributeConversion, AttributeType};

  fn renderer_with(
    configure: impl FnOnce(&mut RecordingDevice),
  ) -> (Renderer, Rc<RefCell<Vec<String>>>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut device = RecordingDevice::new();
    configure(&mut device);
    let log = device.log_handle();
    let renderer = Renderer::new(Box::new(device)).unwrap();
    log.borrow_mut().clear();
    (renderer, log)
  }

  fn renderer() -> (Renderer, Rc<RefCell<Vec<String>>>) {
    renderer_with(|_| {})
  }

  fn drain(log: &Rc<RefCell<Vec<String>>>) -> Vec<String> {
    log.borrow_mut().drain(..).collect()
  }

  fn count_prefixed(lines: &[String], prefix: &str) -> usize {
    lines.iter().filter(|l| l.starts_with(prefix)).count()
  }

  fn info(name: &str, location: i32, ty: UniformType, array_size: usize) -> UniformInfo {
    UniformInfo {
      name: name.to_string(),
      location,
      ty: Some(ty),
      array_size,
    }
  }

  fn attribute(attachment: usize) -> VertexAttribFormat {
    VertexAttribFormat {
      elements: 2,
      scalar: AttributeType::F32,
      conversion: AttributeConversion::Float,
      stride: 8,
      offset: 0,
      divisor: 0,
      attachment,
    }
  }

  /// Program, vertex buffer and vertex array wired up for a plain draw.
  fn draw_setup(r: &mut Renderer) -> VertexArrayId {
    let program = r.create_program("vs", "fs", "setup").unwrap();
    r.set_shader(program);

    let buffer = r.create_vertex_buffer(64, BufferUsage::Dynamic, "setup-vertices");
    let mut w = r.buffer_writer(buffer).unwrap();
    w.write_all(&[0; 48]).unwrap();

    let array = r.create_vertex_array("setup-array");
    r.vertex_array_layout(array, &[attribute(0)]);
    r.attach_vertex_buffer(array, 0, Some(buffer));
    array
  }

  #[test]
  fn too_few_texture_units_is_fatal() {
    let device = RecordingDevice::with_inner(NullDevice::new().with_texture_units(4));
    let err = match Renderer::new(Box::new(device)) {
      Err(err) => err,
      Ok(_) => panic!("a four unit context must be rejected"),
    };
    assert_eq!(
      err,
      ContextError::TooFewTextureUnits {
        available: 4,
        required: MIN_TEXTURE_UNITS
      }
    );
  }

  #[test]
  fn a_repeated_draw_costs_only_the_draw_call() {
    let (mut r, log) = renderer();
    let array = draw_setup(&mut r);

    r.draw(array, Primitive::Triangles, 0, 3, 1);
    drain(&log);

    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(lines, vec!["draw_arrays Triangles first=0 count=3 instances=1"]);
  }

  #[test]
  fn state_deltas_apply_exactly_once() {
    let (mut r, log) = renderer();
    let array = draw_setup(&mut r);
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    drain(&log);

    r.set_capability(Capability::CullFace, true);
    r.set_cull_mode(FaceCullingMode::Front);
    r.set_blend_mode(Some(BlendMode::ALPHA));
    r.draw(array, Primitive::Triangles, 0, 3, 1);

    let lines = drain(&log);
    assert_eq!(lines.len(), 5, "unexpected calls: {:?}", lines);
    assert_eq!(count_prefixed(&lines, "apply_capability CullFace true"), 1);
    assert_eq!(count_prefixed(&lines, "apply_cull_mode Front"), 1);
    assert_eq!(count_prefixed(&lines, "apply_blend_enabled true"), 1);
    assert_eq!(count_prefixed(&lines, "apply_blend_mode"), 1);
    assert_eq!(count_prefixed(&lines, "draw_arrays"), 1);

    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(lines, vec!["draw_arrays Triangles first=0 count=3 instances=1"]);
  }

  #[test]
  fn viewports_round_trip_through_the_flip() {
    let (mut r, _log) = renderer();
    let texture = r
      .create_texture(TextureParams::new(256, 128, PixelFormat::Rgba8), "target")
      .unwrap();
    let framebuffer = r.create_framebuffer("fb");
    r.framebuffer_attach(
      framebuffer,
      Attachment::Color0,
      Some(FramebufferAttachment { texture, mip_level: 0 }),
    );

    // The first attachment seeds a full-size viewport.
    assert_eq!(r.viewport(Some(framebuffer)), Rect::new(0., 0., 256., 128.));

    let rect = Rect::new(10., 20., 100., 50.);
    r.set_viewport(Some(framebuffer), rect);
    assert_eq!(r.viewport(Some(framebuffer)), rect);
    // Stored flipped into the hardware convention.
    assert_eq!(
      r.framebuffers.get(framebuffer).unwrap().viewport,
      Rect::new(10., 58., 100., 50.)
    );

    r.set_viewport(None, rect);
    assert_eq!(r.viewport(None), rect);
  }

  #[test]
  fn offscreen_scissors_are_flipped_and_gated() {
    let (mut r, log) = renderer();
    let array = draw_setup(&mut r);
    let texture = r
      .create_texture(TextureParams::new(256, 128, PixelFormat::Rgba8), "target")
      .unwrap();
    let framebuffer = r.create_framebuffer("fb");
    r.framebuffer_attach(
      framebuffer,
      Attachment::Color0,
      Some(FramebufferAttachment { texture, mip_level: 0 }),
    );

    r.set_framebuffer(Some(framebuffer));
    r.set_scissor(IntRect::new(10, 20, 100, 50));
    drain(&log);
    r.draw(array, Primitive::Triangles, 0, 3, 1);

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "apply_scissor 10 58 100 50"), 1);
    assert_eq!(count_prefixed(&lines, "apply_scissor_enabled true"), 1);
    // Offscreen targets render without sRGB encoding.
    assert_eq!(count_prefixed(&lines, "apply_srgb_write false"), 1);

    // An empty scissor turns the test off rather than clipping everything.
    r.set_scissor(IntRect::new(0, 0, 0, 0));
    drain(&log);
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "apply_scissor_enabled false"), 1);
  }

  #[test]
  fn sampler_uniforms_resolve_to_units() {
    let (mut r, log) = renderer_with(|d| {
      d.stage_uniforms(vec![
        info("u_tex", 7, UniformType::Sampler2D, 1),
        info("u_tex_SIZE", 8, UniformType::Vec2, 1),
      ]);
    });
    let array = draw_setup(&mut r);

    // Park a texture on unit 0 so the sampler has to claim a later unit. A sampler resolving
    // to unit 0 matches the post-link default and uploads nothing.
    let parked = r
      .create_texture(TextureParams::new(8, 8, PixelFormat::Rgba8), "parked")
      .unwrap();
    assert_eq!(r.set_texture(Some(parked), TextureKind::TwoD, None), 0);

    let texture = r
      .create_texture(TextureParams::new(64, 32, PixelFormat::Rgba8), "sprite")
      .unwrap();
    let handle = r.uniform_handle(r.shader().unwrap(), "u_tex").unwrap();
    r.set_uniform(handle, UniformData::Textures(&[Some(texture)]));
    drain(&log);

    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);

    assert_eq!(count_prefixed(&lines, "upload_uniform_ints 7 sampler2D x1"), 1);
    assert_eq!(count_prefixed(&lines, "upload_uniform_floats 8 vec2 x2"), 1);
    assert_eq!(r.texunits.unit(1).pending, Some(texture));
    assert_eq!(r.sampler_texture(handle, 0), Some(texture));

    // Unchanged sampler state costs nothing on the next draw.
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(lines, vec!["draw_arrays Triangles first=0 count=3 instances=1"]);
  }

  #[test]
  fn destroying_a_texture_clears_every_reference() {
    let (mut r, log) = renderer_with(|d| {
      d.stage_uniforms(vec![info("u_tex", 3, UniformType::Sampler2D, 1)]);
    });
    let array = draw_setup(&mut r);
    let texture = r
      .create_texture(TextureParams::new(64, 64, PixelFormat::Rgba8), "doomed")
      .unwrap();
    let framebuffer = r.create_framebuffer("fb");
    r.framebuffer_attach(
      framebuffer,
      Attachment::Color0,
      Some(FramebufferAttachment { texture, mip_level: 0 }),
    );
    let handle = r.uniform_handle(r.shader().unwrap(), "u_tex").unwrap();
    r.set_uniform(handle, UniformData::Textures(&[Some(texture)]));
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    drain(&log);

    r.destroy_texture(texture);

    assert_eq!(r.sampler_texture(handle, 0), None);
    assert_eq!(r.framebuffer_attachment(framebuffer, Attachment::Color0), None);
    assert!(r.framebuffers.get(framebuffer).unwrap().draw_buffers_dirty);
    for idx in 0..r.texunits.len() {
      assert_ne!(r.texunits.unit(idx).pending, Some(texture));
      assert_ne!(r.texunits.unit(idx).active, Some(texture));
    }

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "framebuffer_texture Color0 None"), 1);
    assert_eq!(count_prefixed(&lines, "delete_texture"), 1);
  }

  #[test]
  fn destroying_the_staged_program_falls_back_to_the_default() {
    let (mut r, log) = renderer();
    let fallback = r.create_program("vs", "fs", "fallback").unwrap();
    let doomed = r.create_program("vs", "fs", "doomed").unwrap();
    r.set_default_program(fallback);
    r.set_shader(doomed);

    r.destroy_program(doomed);
    assert_eq!(r.shader(), Some(fallback));

    let array = {
      let buffer = r.create_vertex_buffer(16, BufferUsage::Static, "vb");
      let array = r.create_vertex_array("va");
      r.vertex_array_layout(array, &[attribute(0)]);
      r.attach_vertex_buffer(array, 0, Some(buffer));
      array
    };
    drain(&log);
    r.draw(array, Primitive::Triangles, 0, 3, 1);

    let fallback_raw = r.programs.get(fallback).unwrap().raw.0;
    let lines = drain(&log);
    assert_eq!(
      count_prefixed(&lines, &format!("use_program Some({})", fallback_raw)),
      1
    );
  }

  #[cfg(debug_assertions)]
  #[test]
  #[should_panic(expected = "vertex count of zero")]
  fn zero_count_draws_are_rejected() {
    let (mut r, _log) = renderer();
    let array = draw_setup(&mut r);
    r.draw(array, Primitive::Triangles, 0, 0, 1);
  }

  #[test]
  fn instancing_degrades_without_the_feature() {
    let device = RecordingDevice::with_inner(
      NullDevice::new().with_features(FeatureSet::ALL.difference(FeatureSet::INSTANCED_DRAWS)),
    );
    let log = device.log_handle();
    let mut r = Renderer::new(Box::new(device)).unwrap();
    log.borrow_mut().clear();

    let array = draw_setup(&mut r);
    drain(&log);
    r.draw(array, Primitive::Triangles, 0, 3, 4);

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "draw_arrays Triangles first=0 count=3 instances=1"), 1);
  }

  #[test]
  fn magic_uniforms_follow_renderer_state() {
    let (mut r, log) = renderer_with(|d| {
      d.stage_uniforms(vec![
        info("gz_color", 2, UniformType::Vec4, 1),
        info("gz_projectionMatrix", 5, UniformType::Mat4, 1),
      ]);
    });
    let array = draw_setup(&mut r);

    r.set_color(Color::new(1., 0., 0., 1.));
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "upload_uniform_floats 2 vec4 x4"), 1);
    assert_eq!(count_prefixed(&lines, "upload_uniform_floats 5 mat4 x16"), 1);

    // Restating the same values uploads nothing.
    r.set_color(Color::new(1., 0., 0., 1.));
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "upload_uniform_floats"), 0);

    r.set_color(Color::WHITE);
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "upload_uniform_floats 2 vec4 x4"), 1);
    assert_eq!(count_prefixed(&lines, "upload_uniform_floats 5"), 0);
  }

  #[test]
  fn magic_uniforms_with_the_wrong_type_fail_the_link() {
    let (mut r, log) = renderer_with(|d| {
      d.stage_uniforms(vec![info("gz_color", 0, UniformType::Float, 1)]);
    });

    let err = r.create_program("vs", "fs", "broken").unwrap_err();
    assert_eq!(
      err,
      ProgramError::MagicTypeMismatch {
        name: "gz_color",
        expected: UniformType::Vec4,
        found: UniformType::Float,
      }
    );

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "delete_program"), 1);
  }

  #[test]
  fn buffer_edits_upload_once_per_draw() {
    let (mut r, log) = renderer();
    let array = draw_setup(&mut r);
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    drain(&log);

    let buffer = r
      .vertex_arrays
      .get(array)
      .unwrap()
      .attachments[0]
      .unwrap();
    let mut w = r.buffer_writer(buffer).unwrap();
    w.seek(SeekFrom::Start(8)).unwrap();
    w.write_all(&[7; 4]).unwrap();

    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "buffer_sub_data Array offset=8 len=4"), 1);
    assert_eq!(count_prefixed(&lines, "buffer_data"), 0);

    // Growing the cache reallocates hardware storage and re-uploads everything.
    let mut w = r.buffer_writer(buffer).unwrap();
    w.seek(SeekFrom::Start(100)).unwrap();
    w.write_all(&[1; 8]).unwrap();

    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(
      count_prefixed(&lines, "buffer_data Array size=128 data=false Dynamic"),
      1
    );
    assert_eq!(count_prefixed(&lines, "buffer_sub_data Array offset=0 len=128"), 1);
  }

  #[test]
  fn destroying_a_buffer_detaches_it_everywhere() {
    let (mut r, log) = renderer();
    let array = draw_setup(&mut r);
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    drain(&log);

    let buffer = r
      .vertex_arrays
      .get(array)
      .unwrap()
      .attachments[0]
      .unwrap();
    r.destroy_buffer(buffer);
    assert_eq!(r.vertex_arrays.get(array).unwrap().attachments[0], None);

    r.draw(array, Primitive::Triangles, 0, 3, 1);
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "disable_vertex_attribute 0"), 1);
  }

  #[test]
  fn pinned_samplers_never_rewrite_their_uniforms() {
    let (mut r, log) = renderer_with(|d| {
      d.stage_uniforms(vec![info("u_layers", 4, UniformType::Sampler2D, 2)]);
    });
    r.quirks.pin_sampler_units = true;

    let array = draw_setup(&mut r);
    let first = r
      .create_texture(TextureParams::new(8, 8, PixelFormat::Rgba8), "first")
      .unwrap();
    let second = r
      .create_texture(TextureParams::new(8, 8, PixelFormat::Rgba8), "second")
      .unwrap();
    let handle = r.uniform_handle(r.shader().unwrap(), "u_layers").unwrap();

    r.set_uniform(handle, UniformData::Textures(&[Some(first), Some(second)]));
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    drain(&log);

    // Swapping the textures repoints the pinned units without touching the uniform.
    r.set_uniform(handle, UniformData::Textures(&[Some(second), Some(first)]));
    r.draw(array, Primitive::Triangles, 0, 3, 1);

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "upload_uniform_ints"), 0);
    assert_eq!(count_prefixed(&lines, "bind_texture TwoD Some"), 2);
  }

  #[test]
  fn drawing_into_an_attachment_taints_its_mipmaps() {
    let (mut r, log) = renderer_with(|d| {
      d.stage_uniforms(vec![info("u_tex", 0, UniformType::Sampler2D, 1)]);
    });
    let array = draw_setup(&mut r);

    let mut params = TextureParams::new(64, 64, PixelFormat::Rgba8);
    params.mipmaps = 0;
    params.mipmap_mode = MipmapMode::Auto;
    let texture = r.create_texture(params, "target").unwrap();
    let framebuffer = r.create_framebuffer("fb");
    r.framebuffer_attach(
      framebuffer,
      Attachment::Color0,
      Some(FramebufferAttachment { texture, mip_level: 0 }),
    );

    r.set_framebuffer(Some(framebuffer));
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    assert!(r.textures.get(texture).unwrap().mipmaps_outdated);

    // Sampling it afterwards regenerates the chain during unit synchronization.
    r.set_framebuffer(None);
    let handle = r.uniform_handle(r.shader().unwrap(), "u_tex").unwrap();
    r.set_uniform(handle, UniformData::Textures(&[Some(texture)]));
    drain(&log);
    r.draw(array, Primitive::Triangles, 0, 3, 1);

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "generate_mipmaps TwoD"), 1);
    assert!(!r.textures.get(texture).unwrap().mipmaps_outdated);
  }

  #[test]
  fn clears_reuse_staged_values() {
    let (mut r, log) = renderer();
    r.clear(None, ClearFlags::COLOR | ClearFlags::DEPTH, Color::BLACK, 1.);

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "apply_clear_color 0 0 0 1"), 1);
    // The depth value matches the seeded one, so only the color value uploads.
    assert_eq!(count_prefixed(&lines, "apply_clear_depth"), 0);
    assert_eq!(count_prefixed(&lines, "clear color=true depth=true"), 1);

    r.clear(None, ClearFlags::COLOR, Color::BLACK, 1.);
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "apply_clear_color"), 0);
    assert_eq!(count_prefixed(&lines, "clear color=true depth=false"), 1);
  }

  #[test]
  fn readbacks_complete_through_the_fence_queue() {
    let (mut r, log) = renderer();
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);

    r.read_framebuffer_async(None, Attachment::Color0, IntRect::new(0, 0, 8, 4), move |px: Option<&Pixmap>| {
      *sink.borrow_mut() = px.map(|p| (p.width, p.height, p.data.len()));
    });
    r.poll_read_requests();

    assert_eq!(*seen.borrow(), Some((8, 4, 128)));
    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "read_pixels_to_pack_buffer 0 0 8 4"), 1);
    assert_eq!(count_prefixed(&lines, "read_pack_buffer 128"), 1);
    assert_eq!(count_prefixed(&lines, "delete_fence"), 1);
  }

  #[test]
  fn finish_frame_restages_the_default_framebuffer() {
    let (mut r, log) = renderer();
    let array = draw_setup(&mut r);
    let texture = r
      .create_texture(TextureParams::new(32, 32, PixelFormat::Rgba8), "target")
      .unwrap();
    let framebuffer = r.create_framebuffer("fb");
    r.framebuffer_attach(
      framebuffer,
      Attachment::Color0,
      Some(FramebufferAttachment { texture, mip_level: 0 }),
    );
    r.set_framebuffer(Some(framebuffer));
    r.draw(array, Primitive::Triangles, 0, 3, 1);
    assert_eq!(r.stats().draw_calls, 1);
    drain(&log);

    r.finish_frame();

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "bind_draw_framebuffer None"), 1);
    assert_eq!(r.framebuffer(), None);
    assert_eq!(r.stats(), FrameStats::default());
  }

  #[test]
  fn unit_pool_size_comes_from_the_environment() {
    std::env::set_var("GLAZE_TEXUNITS", "9");
    let (r, _log) = renderer();
    std::env::remove_var("GLAZE_TEXUNITS");
    assert_eq!(r.texunits.len(), 9);
  }

  #[test]
  fn texture_fills_stream_through_the_transfer_buffer() {
    let (mut r, log) = renderer();
    let mut params = TextureParams::new(16, 16, PixelFormat::Rgba8);
    params.stream = true;
    let texture = r.create_texture(params, "streamed").unwrap();
    drain(&log);

    let pixmap = Pixmap::new(16, 16, PixelFormat::Rgba8);
    r.texture_fill(texture, 0, 0, &pixmap);

    let lines = drain(&log);
    assert_eq!(count_prefixed(&lines, "bind_buffer PixelUnpack Some"), 1);
    assert_eq!(
      count_prefixed(&lines, "buffer_data PixelUnpack size=1024 data=true Stream"),
      1
    );
    assert_eq!(
      count_prefixed(
        &lines,
        "texture_sub_image TwoD layer=0 level=0 at 0,0 16x16 Rgba8 data=false"
      ),
      1
    );
  }
}
