//! Binding trackers: pending versus active render state.
//!
//! Every piece of hardware state the renderer touches lives in a [`Tracked`] cell. Setters
//! write the pending side and never talk to hardware; synchronization compares pending to
//! active and issues a call only on mismatch, then records what hardware now holds. The
//! active side starts out unknown so the first synchronization applies everything and the
//! cache never has to guess at driver defaults.

use crate::blending::BlendMode;
use crate::buffer::BufferTarget;
use crate::caps::{Capability, CapabilitySet};
use crate::color::Color;
use crate::depth_test::DepthComparison;
use crate::device::{Device, RawBuffer};
use crate::face_culling::FaceCullingMode;
use crate::handle::{FramebufferId, ProgramId, VertexArrayId};
use crate::rect::{IntRect, Rect};

/// One piece of diffed state.
///
/// `active` is `None` while the hardware side is unknown; a sync in that state always
/// applies. Client-facing getters must go through [`current`], never `active`: callers
/// observe what they asked for, not what hardware happens to hold.
///
/// [`current`]: Tracked::current
#[derive(Debug)]
pub(crate) struct Tracked<T> {
  pending: T,
  active: Option<T>,
}

impl<T: Clone + PartialEq> Tracked<T> {
  /// A tracker with unknown hardware state.
  pub fn new(pending: T) -> Self {
    Tracked {
      pending,
      active: None,
    }
  }

  /// A tracker for state that has already been applied out-of-band.
  pub fn new_synced(value: T) -> Self {
    Tracked {
      pending: value.clone(),
      active: Some(value),
    }
  }

  /// Stage a value. Never touches hardware.
  pub fn set(&mut self, value: T) {
    self.pending = value;
  }

  /// The staged value.
  pub fn current(&self) -> &T {
    &self.pending
  }

  /// What hardware last received, if known.
  pub fn active(&self) -> Option<&T> {
    self.active.as_ref()
  }

  pub fn is_dirty(&self) -> bool {
    self.active.as_ref() != Some(&self.pending)
  }

  /// Run `apply` with the pending value if it differs from the active one, then remember it
  /// as applied. Returns whether `apply` ran.
  pub fn sync(&mut self, apply: impl FnOnce(&T)) -> bool {
    if !self.is_dirty() {
      return false;
    }

    apply(&self.pending);
    self.active = Some(self.pending.clone());
    true
  }

  /// Forget what hardware holds; the next sync applies unconditionally.
  pub fn invalidate(&mut self) {
    self.active = None;
  }

  /// Set both sides at once, bypassing the diff. Used by deletion hooks to null out stale
  /// handles and by eager initialization.
  pub fn force(&mut self, value: T) {
    self.pending = value.clone();
    self.active = Some(value);
  }
}

/// All diffed state of one rendering context.
///
/// Field layout follows the synchronization order; the handful of states that don’t fit the
/// plain [`Tracked`] shape (scissor with its enable toggle, blending with its mode memory,
/// the viewport with its per-framebuffer storage) keep their pieces spelled out.
pub(crate) struct StateCache {
  pub capabilities: Tracked<CapabilitySet>,
  pub framebuffer: Tracked<Option<FramebufferId>>,
  pub program: Tracked<Option<ProgramId>>,

  /// Hardware-space viewport last applied; `None` after a frame boundary.
  pub viewport_active: Option<Rect>,
  /// Viewport of the default framebuffer. Offscreen targets carry theirs themselves.
  pub default_viewport: Rect,

  /// Requested scissor, in the space of the target framebuffer. Zero width or height means
  /// the scissor test is off.
  pub scissor_pending: IntRect,
  pub scissor_active_rect: Option<IntRect>,
  pub scissor_active_enabled: Option<bool>,

  /// Requested blend mode; `None` means blending off.
  pub blend_pending: Option<BlendMode>,
  /// Last mode equations hardware received. Survives disabling, so toggling blending on and
  /// off doesn’t re-upload the mode.
  pub blend_applied_mode: Option<BlendMode>,
  pub blend_enabled: Option<bool>,

  pub cull: Tracked<FaceCullingMode>,
  pub depth_comparison: Tracked<DepthComparison>,

  /// One tracker per buffer binding point, holding raw handles.
  pub buffers: [Tracked<Option<RawBuffer>>; BufferTarget::COUNT],
  pub vertex_array: Tracked<Option<VertexArrayId>>,

  pub clear_color: Tracked<Color>,
  pub clear_depth: Tracked<f32>,
  pub srgb_write: Tracked<bool>,
}

impl StateCache {
  pub fn new(default_viewport: Rect) -> Self {
    StateCache {
      capabilities: Tracked::new(CapabilitySet::NONE),
      framebuffer: Tracked::new(None),
      program: Tracked::new(None),
      viewport_active: None,
      default_viewport,
      scissor_pending: IntRect::new(0, 0, 0, 0),
      scissor_active_rect: None,
      scissor_active_enabled: None,
      blend_pending: None,
      blend_applied_mode: None,
      blend_enabled: None,
      cull: Tracked::new(FaceCullingMode::default()),
      depth_comparison: Tracked::new(DepthComparison::default()),
      buffers: [
        Tracked::new(None),
        Tracked::new(None),
        Tracked::new(None),
        Tracked::new(None),
      ],
      vertex_array: Tracked::new(None),
      clear_color: Tracked::new(Color::TRANSPARENT),
      clear_depth: Tracked::new(1.),
      srgb_write: Tracked::new(true),
    }
  }

  pub fn buffer(&mut self, target: BufferTarget) -> &mut Tracked<Option<RawBuffer>> {
    &mut self.buffers[target.index()]
  }
}

/// Apply capability deltas bit by bit, one hardware call per changed capability.
pub(crate) fn sync_capabilities(caps: &mut Tracked<CapabilitySet>, device: &mut dyn Device) {
  if !caps.is_dirty() {
    return;
  }

  let pending = *caps.current();

  match caps.active() {
    Some(active) => {
      let active = *active;
      for cap in Capability::ALL {
        let enabled = pending.contains(cap);
        if active.contains(cap) != enabled {
          device.apply_capability(cap, enabled);
        }
      }
    }

    None => {
      for cap in Capability::ALL {
        device.apply_capability(cap, pending.contains(cap));
      }
    }
  }

  caps.force(pending);
}

/// Bind `raw` to `target` for the duration of `f`, then restage whatever was pending before.
/// The restore is itself deferred, so no extra hardware call happens here when `f` is the
/// last user of the binding point before the next sync.
pub(crate) fn with_buffer_bound<R>(
  state: &mut StateCache,
  device: &mut dyn Device,
  target: BufferTarget,
  raw: RawBuffer,
  f: impl FnOnce(&mut dyn Device) -> R,
) -> R {
  let saved = *state.buffer(target).current();

  state.buffer(target).set(Some(raw));
  state.buffer(target).sync(|r| device.bind_buffer(target, *r));

  let out = f(device);

  state.buffer(target).set(saved);
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::RecordingDevice;

  #[test]
  fn sync_is_idempotent() {
    let mut tracked = Tracked::new(3u32);
    let mut applies = 0;

    assert!(tracked.sync(|_| applies += 1));
    assert!(!tracked.sync(|_| applies += 1));
    assert!(!tracked.sync(|_| applies += 1));
    assert_eq!(applies, 1);

    tracked.set(4);
    assert!(tracked.sync(|_| applies += 1));
    assert_eq!(applies, 2);
  }

  #[test]
  fn setters_never_touch_the_active_side() {
    let mut tracked = Tracked::new(1u32);
    tracked.sync(|_| {});

    tracked.set(2);
    assert_eq!(*tracked.current(), 2);
    assert_eq!(tracked.active(), Some(&1));
  }

  #[test]
  fn invalidate_forces_a_reapply() {
    let mut tracked = Tracked::new(7u32);
    tracked.sync(|_| {});
    assert!(!tracked.is_dirty());

    tracked.invalidate();
    assert!(tracked.is_dirty());

    let mut applies = 0;
    assert!(tracked.sync(|_| applies += 1));
    assert_eq!(applies, 1);
  }

  #[test]
  fn force_skips_the_diff() {
    let mut tracked = Tracked::new(1u32);
    tracked.force(9);

    assert_eq!(*tracked.current(), 9);
    assert!(!tracked.is_dirty());
    assert!(!tracked.sync(|_| panic!("forced state must not reapply")));
  }

  #[test]
  fn capability_sync_applies_only_changed_bits() {
    let mut device = RecordingDevice::new();
    let log = device.log_handle();

    let mut caps = Tracked::new(CapabilitySet::new().with(Capability::DepthTest));
    sync_capabilities(&mut caps, &mut device);

    // Unknown hardware state: every capability gets an explicit apply.
    assert_eq!(log.borrow().len(), Capability::ALL.len());

    log.borrow_mut().clear();
    let mut set = *caps.current();
    set.insert(Capability::CullFace);
    caps.set(set);
    sync_capabilities(&mut caps, &mut device);

    assert_eq!(log.borrow().as_slice(), ["apply_capability CullFace true"]);

    log.borrow_mut().clear();
    sync_capabilities(&mut caps, &mut device);
    assert!(log.borrow().is_empty());
  }

  #[test]
  fn scoped_buffer_bind_restores_the_pending_side() {
    let mut device = RecordingDevice::new();
    let log = device.log_handle();
    let mut state = StateCache::new(Rect::new(0., 0., 640., 480.));

    state.buffer(BufferTarget::Array).set(Some(RawBuffer(5)));

    with_buffer_bound(&mut state, &mut device, BufferTarget::Array, RawBuffer(9), |_| {});

    assert_eq!(log.borrow().as_slice(), ["bind_buffer Array Some(9)"]);
    assert_eq!(*state.buffer(BufferTarget::Array).current(), Some(RawBuffer(5)));
    assert_eq!(state.buffer(BufferTarget::Array).active(), Some(&Some(RawBuffer(9))));
  }
}
