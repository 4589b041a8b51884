//! The texture-unit pool.
//!
//! Hardware offers a fixed number of texture units; draws compete for them. The pool hands
//! out units by priority so the cheapest unit is always sacrificed first: an unused unit
//! beats one with a live hardware binding, which beats one with an unsynchronized pending
//! binding, which beats one locked for the draw being assembled. Units of equal priority are
//! ordered by a doubly-linked list per priority level, kept as array indices into the flat
//! unit array.
//!
//! Placement within a level is deliberately asymmetric: pending and locked units go to the
//! tail of their level while free and active-only units go to the head. Under pressure this
//! decides which binding is evicted first, and it must stay this way; see the eviction test.
//!
//! A texture remembers the unit carrying it (`binding_unit`), so rebinding the same texture
//! draw after draw reuses its unit without a search. The back-reference is non-owning and
//! cleared on eviction.

use log::warn;

use crate::device::Device;
use crate::handle::{Registry, TextureId};
use crate::texture::{TextureEntry, TextureKind};

/// Allocation priority of one unit, lowest first.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum UnitPriority {
  /// Nothing bound, nothing requested.
  Free = 0,
  /// Hardware holds a binding, but nothing is requested for the next draw.
  Active = 1,
  /// A binding is staged but not yet applied.
  Pending = 2,
  /// Reserved for the draw currently being assembled.
  Locked = 3,
}

const PRIORITY_LEVELS: usize = 4;

/// One hardware texture unit.
#[derive(Debug)]
pub(crate) struct TextureUnit {
  /// Texture requested for the next draw.
  pub pending: Option<TextureId>,
  /// Texture hardware holds, updated only by real bind calls.
  pub active: Option<TextureId>,
  /// Kind of the binding hardware holds; a unit carries one kind at a time.
  pub bound_kind: Option<TextureKind>,
  /// While set, the allocator must not reassign this unit.
  pub locked_for: Option<TextureKind>,
  /// Priority the unit was last filed under, so relocation can skip list churn.
  old_priority: UnitPriority,
  prev: Option<usize>,
  next: Option<usize>,
}

impl TextureUnit {
  fn priority(&self) -> UnitPriority {
    if self.locked_for.is_some() {
      UnitPriority::Locked
    } else if self.pending.is_some() {
      UnitPriority::Pending
    } else if self.active.is_some() {
      UnitPriority::Active
    } else {
      UnitPriority::Free
    }
  }
}

/// The fixed pool of texture units plus the active-unit selector cache.
pub(crate) struct TextureUnits {
  units: Vec<TextureUnit>,
  heads: [Option<usize>; PRIORITY_LEVELS],
  tails: [Option<usize>; PRIORITY_LEVELS],
  /// Unit the hardware selector points at, if known.
  active_unit: Option<usize>,
}

impl TextureUnits {
  pub fn new(count: usize) -> Self {
    assert!(count > 0);

    let units = (0..count)
      .map(|i| TextureUnit {
        pending: None,
        active: None,
        bound_kind: None,
        locked_for: None,
        old_priority: UnitPriority::Free,
        prev: i.checked_sub(1),
        next: if i + 1 < count { Some(i + 1) } else { None },
      })
      .collect();

    let mut heads = [None; PRIORITY_LEVELS];
    let mut tails = [None; PRIORITY_LEVELS];
    heads[UnitPriority::Free as usize] = Some(0);
    tails[UnitPriority::Free as usize] = Some(count - 1);

    TextureUnits {
      units,
      heads,
      tails,
      active_unit: None,
    }
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn unit(&self, idx: usize) -> &TextureUnit {
    &self.units[idx]
  }

  /// Pick a unit for `texture`, to be physically bound at the next synchronization.
  ///
  /// `lock` reserves the unit for the upcoming draw, with the sampler kind it must carry;
  /// pass `None` for out-of-band binds (texture edits) that any later draw may evict.
  /// `preferred` is honored for explicit unbinds and, with `pin_to_preferred`, forces the
  /// placement outright; the latter serves the sampler-pinning quirk and may legitimately
  /// put one texture on several units.
  pub fn assign(
    &mut self,
    textures: &mut Registry<TextureId, TextureEntry>,
    texture: Option<TextureId>,
    lock: Option<TextureKind>,
    preferred: Option<usize>,
    pin_to_preferred: bool,
  ) -> usize {
    match texture {
      // An explicit "nothing of this kind here" binding.
      None => {
        debug_assert!(lock.is_some(), "unbinding a unit requires the sampler kind");

        let idx = match preferred {
          Some(p) if p < self.units.len() && self.compatible_lock(p, lock) => p,
          _ => self.acquire(),
        };

        self.set_binding(idx, textures, None);
        self.lock(idx, lock);
        idx
      }

      Some(id) => {
        // Texture affinity: reuse the unit already carrying this texture.
        if let Some(u) = textures.get(id).and_then(|e| e.binding_unit) {
          let pinned_elsewhere =
            pin_to_preferred && preferred.map_or(false, |p| p != u);

          if self.units[u].pending == Some(id) && !pinned_elsewhere {
            self.lock(u, lock);
            return u;
          }
        }

        let idx = match preferred {
          Some(p) if pin_to_preferred && p < self.units.len() => p,
          _ => self.acquire(),
        };

        self.set_binding(idx, textures, Some(id));
        self.lock(idx, lock);
        idx
      }
    }
  }

  /// Whether unit `idx` can take a lock of `lock` without conflicting.
  fn compatible_lock(&self, idx: usize, lock: Option<TextureKind>) -> bool {
    match (self.units[idx].locked_for, lock) {
      (None, _) => true,
      (Some(held), Some(wanted)) => held == wanted,
      (Some(_), None) => false,
    }
  }

  /// The lowest-priority unit. All units being locked is a content bug (more samplers in
  /// flight than hardware units); rendering degrades but continues.
  fn acquire(&mut self) -> usize {
    for level in 0..PRIORITY_LEVELS {
      if let Some(idx) = self.heads[level] {
        if level == UnitPriority::Locked as usize {
          warn!(
            "ran out of texture units ({}), expect rendering errors",
            self.units.len()
          );
        }

        return idx;
      }
    }

    unreachable!("texture unit lists are corrupt: no unit on any priority level")
  }

  /// Stage `texture` on unit `idx`, evicting whatever was pending there.
  fn set_binding(
    &mut self,
    idx: usize,
    textures: &mut Registry<TextureId, TextureEntry>,
    texture: Option<TextureId>,
  ) {
    let evicted = self.units[idx].pending;

    if evicted == texture {
      return;
    }

    if let Some(old) = evicted {
      if let Some(entry) = textures.get_mut(old) {
        // Only clear the back-reference if it still points here; under the pinning quirk
        // the texture may meanwhile live on another unit.
        if entry.binding_unit == Some(idx) {
          entry.binding_unit = None;
        }
      }
    }

    self.units[idx].pending = texture;

    if let Some(id) = texture {
      if let Some(entry) = textures.get_mut(id) {
        entry.binding_unit = Some(idx);
      }
    }

    self.relocate(idx);
  }

  fn lock(&mut self, idx: usize, lock: Option<TextureKind>) {
    if let Some(kind) = lock {
      self.units[idx].locked_for = Some(kind);
      self.relocate(idx);
    }
  }

  /// Make the hardware selector point at `idx`.
  fn activate(&mut self, idx: usize, device: &mut dyn Device) {
    if self.active_unit != Some(idx) {
      device.set_active_unit(idx);
      self.active_unit = Some(idx);
    }
  }

  /// Apply unit `idx` to hardware: bind its pending texture or unbind a stale one, counting
  /// real bind calls into `rebinds`.
  ///
  /// With `prepare` set (the per-draw pass) the bound texture gets its mip chain regenerated
  /// if tainted, and the unit's lock is released. `ensure_active` additionally leaves the
  /// hardware selector on this unit, for callers about to edit the bound texture.
  pub fn sync_unit(
    &mut self,
    idx: usize,
    textures: &mut Registry<TextureId, TextureEntry>,
    device: &mut dyn Device,
    rebinds: &mut u32,
    prepare: bool,
    ensure_active: bool,
  ) {
    match self.units[idx].pending {
      None => {
        if let Some(kind) = self.units[idx].bound_kind {
          self.activate(idx, device);
          device.bind_texture(kind, None);

          let unit = &mut self.units[idx];
          unit.active = None;
          unit.bound_kind = None;
        }
      }

      Some(id) => match textures.get(id) {
        Some(entry) if self.units[idx].active != Some(id) => {
          let raw = entry.raw;
          let kind = entry.params.kind;

          self.activate(idx, device);

          // A unit holds one sampler kind at a time; switching kinds unbinds the old one.
          if let Some(old_kind) = self.units[idx].bound_kind {
            if old_kind != kind {
              device.bind_texture(old_kind, None);
            }
          }

          device.bind_texture(kind, Some(raw));
          *rebinds += 1;

          let unit = &mut self.units[idx];
          unit.active = Some(id);
          unit.bound_kind = Some(kind);
        }

        Some(_) => {
          if ensure_active {
            self.activate(idx, device);
          }
        }

        None => {
          // Deletion hooks clear units before the registry entry goes away.
          debug_assert!(false, "unit {} holds a dead texture id", idx);
          self.units[idx].pending = None;
        }
      },
    }

    if prepare {
      if let Some(id) = self.units[idx].active {
        if let Some(entry) = textures.get_mut(id) {
          if entry.needs_mipmap_refresh() {
            let kind = entry.params.kind;
            self.activate(idx, device);
            device.generate_mipmaps(kind);
            entry.mipmaps_outdated = false;
          }
        }
      }

      self.units[idx].locked_for = None;
    }

    self.relocate(idx);
  }

  /// The per-draw pass: apply every unit and release its lock.
  pub fn sync_all(
    &mut self,
    textures: &mut Registry<TextureId, TextureEntry>,
    device: &mut dyn Device,
    rebinds: &mut u32,
  ) {
    for idx in 0..self.units.len() {
      self.sync_unit(idx, textures, device, rebinds, true, false);
    }
  }

  /// Deletion hook: drop every reference to `id`. Hardware unbinds deleted textures on its
  /// own, so the active side is cleared without a call.
  pub fn notify_texture_deleted(&mut self, id: TextureId) {
    for idx in 0..self.units.len() {
      let unit = &mut self.units[idx];
      let mut changed = false;

      if unit.pending == Some(id) {
        unit.pending = None;
        changed = true;
      }

      if unit.active == Some(id) {
        unit.active = None;
        unit.bound_kind = None;
        changed = true;
      }

      if changed {
        self.relocate(idx);
      }
    }
  }

  /// Re-file unit `idx` under its current priority. No-op when the priority didn’t change.
  fn relocate(&mut self, idx: usize) {
    let priority = self.units[idx].priority();

    if priority == self.units[idx].old_priority {
      return;
    }

    self.unlink(idx);
    self.insert(idx, priority);
    self.units[idx].old_priority = priority;
  }

  fn unlink(&mut self, idx: usize) {
    let level = self.units[idx].old_priority as usize;
    let prev = self.units[idx].prev;
    let next = self.units[idx].next;

    match prev {
      Some(p) => self.units[p].next = next,
      None => self.heads[level] = next,
    }

    match next {
      Some(n) => self.units[n].prev = prev,
      None => self.tails[level] = prev,
    }

    self.units[idx].prev = None;
    self.units[idx].next = None;
  }

  fn insert(&mut self, idx: usize, priority: UnitPriority) {
    let level = priority as usize;

    if priority > UnitPriority::Active {
      // Pending and locked units queue up at the tail, so the oldest lease is evicted first
      // under exhaustion.
      let tail = self.tails[level];
      self.units[idx].prev = tail;
      self.units[idx].next = None;

      match tail {
        Some(t) => self.units[t].next = Some(idx),
        None => self.heads[level] = Some(idx),
      }

      self.tails[level] = Some(idx);
    } else {
      let head = self.heads[level];
      self.units[idx].prev = None;
      self.units[idx].next = head;

      match head {
        Some(h) => self.units[h].prev = Some(idx),
        None => self.tails[level] = Some(idx),
      }

      self.heads[level] = Some(idx);
    }
  }

  #[cfg(test)]
  fn level_order(&self, priority: UnitPriority) -> Vec<usize> {
    let mut out = Vec::new();
    let mut cursor = self.heads[priority as usize];

    while let Some(idx) = cursor {
      out.push(idx);
      cursor = self.units[idx].next;
    }

    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::{RawTexture, RecordingDevice};
  use crate::texture::{MipmapMode, TextureParams};

  fn registry_with(count: usize) -> (Registry<TextureId, TextureEntry>, Vec<TextureId>) {
    let mut textures = Registry::new();
    let ids = (0..count)
      .map(|i| {
        textures.insert(TextureEntry {
          raw: RawTexture(100 + i as u32),
          params: TextureParams::new(64, 64, crate::texture::PixelFormat::Rgba8),
          binding_unit: None,
          mipmaps_outdated: false,
          transfer_buffer: None,
          debug_label: format!("tex{}", i),
        })
      })
      .collect();

    (textures, ids)
  }

  #[test]
  fn fresh_pool_hands_out_unit_zero() {
    let (mut textures, _) = registry_with(0);
    let mut pool = TextureUnits::new(8);

    let idx = pool.assign(&mut textures, None, Some(TextureKind::TwoD), None, false);

    assert_eq!(idx, 0);
    assert_eq!(pool.unit(0).locked_for, Some(TextureKind::TwoD));
    assert_eq!(pool.unit(0).pending, None);
  }

  #[test]
  fn same_texture_reuses_its_unit() {
    let (mut textures, ids) = registry_with(1);
    let mut pool = TextureUnits::new(4);

    let a = pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), None, false);
    let b = pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), None, false);

    assert_eq!(a, b);
    assert_eq!(textures.get(ids[0]).unwrap().binding_unit, Some(a));
  }

  #[test]
  fn allocation_prefers_the_lowest_priority() {
    let (mut textures, ids) = registry_with(3);
    let mut pool = TextureUnits::new(3);

    // Fill unit 0 and 1 with pending bindings; unit 2 stays free.
    pool.assign(&mut textures, Some(ids[0]), None, None, false);
    pool.assign(&mut textures, Some(ids[1]), None, None, false);

    let idx = pool.assign(&mut textures, Some(ids[2]), None, None, false);
    assert_eq!(idx, 2);

    // Walking the levels lowest-first yields non-decreasing priorities.
    let mut seen = Vec::new();
    for level in [
      UnitPriority::Free,
      UnitPriority::Active,
      UnitPriority::Pending,
      UnitPriority::Locked,
    ] {
      for idx in pool.level_order(level) {
        seen.push(pool.unit(idx).priority());
      }
    }

    assert_eq!(seen.len(), 3);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
  }

  #[test]
  fn placement_is_asymmetric_per_level() {
    let (mut textures, ids) = registry_with(2);
    let mut pool = TextureUnits::new(6);

    // Pending bindings queue at the tail, in assignment order.
    let a = pool.assign(&mut textures, Some(ids[0]), None, None, false);
    let b = pool.assign(&mut textures, Some(ids[1]), None, None, false);
    assert_eq!(pool.level_order(UnitPriority::Pending), vec![a, b]);

    // Active-only units stack at the head, most recent first.
    pool.units[4].active = Some(ids[0]);
    pool.relocate(4);
    pool.units[5].active = Some(ids[1]);
    pool.relocate(5);
    assert_eq!(pool.level_order(UnitPriority::Active), vec![5, 4]);
  }

  #[test]
  fn eviction_clears_the_back_reference() {
    let (mut textures, ids) = registry_with(2);
    let mut pool = TextureUnits::new(1);

    pool.assign(&mut textures, Some(ids[0]), None, None, false);
    assert_eq!(textures.get(ids[0]).unwrap().binding_unit, Some(0));

    pool.assign(&mut textures, Some(ids[1]), None, None, false);

    assert_eq!(textures.get(ids[0]).unwrap().binding_unit, None);
    assert_eq!(textures.get(ids[1]).unwrap().binding_unit, Some(0));
    assert_eq!(pool.unit(0).pending, Some(ids[1]));
  }

  #[test]
  fn exhaustion_steals_the_oldest_lock() {
    let (mut textures, ids) = registry_with(3);
    let mut pool = TextureUnits::new(2);

    let a = pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), None, false);
    let b = pool.assign(&mut textures, Some(ids[1]), Some(TextureKind::TwoD), None, false);
    assert_eq!((a, b), (0, 1));

    // Every unit is locked; the pool degrades by reusing the oldest lock instead of failing.
    let c = pool.assign(&mut textures, Some(ids[2]), Some(TextureKind::TwoD), None, false);

    assert_eq!(c, 0);
    assert_eq!(pool.unit(0).pending, Some(ids[2]));
    assert_eq!(textures.get(ids[0]).unwrap().binding_unit, None);
  }

  #[test]
  fn sync_binds_once_and_releases_locks() {
    let (mut textures, ids) = registry_with(1);
    let mut pool = TextureUnits::new(2);
    let mut device = RecordingDevice::new();
    let log = device.log_handle();
    let mut rebinds = 0;

    let idx = pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), None, false);
    pool.sync_all(&mut textures, &mut device, &mut rebinds);

    assert_eq!(rebinds, 1);
    assert_eq!(pool.unit(idx).active, Some(ids[0]));
    assert_eq!(pool.unit(idx).locked_for, None);
    assert_eq!(
      log.borrow().as_slice(),
      ["set_active_unit 0", "bind_texture TwoD Some(100)"]
    );

    // Nothing changed; a second pass is silent.
    log.borrow_mut().clear();
    pool.sync_all(&mut textures, &mut device, &mut rebinds);
    assert_eq!(rebinds, 1);
    assert!(log.borrow().is_empty());
  }

  #[test]
  fn switching_kinds_unbinds_the_old_one_first() {
    let mut textures = Registry::new();
    let cube = textures.insert(TextureEntry {
      raw: RawTexture(7),
      params: TextureParams {
        kind: TextureKind::CubeMap,
        ..TextureParams::new(32, 32, crate::texture::PixelFormat::Rgba8)
      },
      binding_unit: None,
      mipmaps_outdated: false,
      transfer_buffer: None,
      debug_label: "cube".to_string(),
    });
    let flat = textures.insert(TextureEntry {
      raw: RawTexture(8),
      params: TextureParams::new(32, 32, crate::texture::PixelFormat::Rgba8),
      binding_unit: None,
      mipmaps_outdated: false,
      transfer_buffer: None,
      debug_label: "flat".to_string(),
    });

    let mut pool = TextureUnits::new(1);
    let mut device = RecordingDevice::new();
    let log = device.log_handle();
    let mut rebinds = 0;

    pool.assign(&mut textures, Some(cube), None, None, false);
    pool.sync_all(&mut textures, &mut device, &mut rebinds);

    log.borrow_mut().clear();
    pool.assign(&mut textures, Some(flat), None, None, false);
    pool.sync_all(&mut textures, &mut device, &mut rebinds);

    assert_eq!(
      log.borrow().as_slice(),
      ["bind_texture CubeMap None", "bind_texture TwoD Some(8)"]
    );
  }

  #[test]
  fn tainted_mipmaps_regenerate_during_the_draw_pass() {
    let (mut textures, ids) = registry_with(1);
    {
      let entry = textures.get_mut(ids[0]).unwrap();
      entry.params.mipmaps = 4;
      entry.params.mipmap_mode = MipmapMode::Auto;
      entry.mipmaps_outdated = true;
    }

    let mut pool = TextureUnits::new(2);
    let mut device = RecordingDevice::new();
    let log = device.log_handle();
    let mut rebinds = 0;

    pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), None, false);
    pool.sync_all(&mut textures, &mut device, &mut rebinds);

    assert!(log
      .borrow()
      .iter()
      .any(|l| l == "generate_mipmaps TwoD"));
    assert!(!textures.get(ids[0]).unwrap().mipmaps_outdated);

    // Regeneration happens once, not every draw.
    log.borrow_mut().clear();
    pool.sync_all(&mut textures, &mut device, &mut rebinds);
    assert!(log.borrow().is_empty());
  }

  #[test]
  fn deleted_textures_vanish_from_every_unit() {
    let (mut textures, ids) = registry_with(1);
    let mut pool = TextureUnits::new(2);
    let mut device = RecordingDevice::new();
    let mut rebinds = 0;

    pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), None, false);
    pool.sync_all(&mut textures, &mut device, &mut rebinds);

    textures.remove(ids[0]);
    pool.notify_texture_deleted(ids[0]);

    for idx in 0..pool.len() {
      assert_eq!(pool.unit(idx).pending, None);
      assert_eq!(pool.unit(idx).active, None);
    }

    // The freed unit is reusable and synchronizing it is silent: hardware already dropped
    // the binding when the texture was deleted.
    let log = device.log_handle();
    log.borrow_mut().clear();
    pool.sync_all(&mut textures, &mut device, &mut rebinds);
    assert!(log.borrow().is_empty());
  }

  #[test]
  fn unbind_request_prefers_the_hinted_unit() {
    let (mut textures, ids) = registry_with(1);
    let mut pool = TextureUnits::new(4);
    let mut device = RecordingDevice::new();
    let mut rebinds = 0;

    // Put a synced binding on unit 0, then ask for "nothing" there.
    pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), None, false);
    pool.sync_all(&mut textures, &mut device, &mut rebinds);

    let idx = pool.assign(&mut textures, None, Some(TextureKind::TwoD), Some(0), false);
    assert_eq!(idx, 0);
    assert_eq!(pool.unit(0).pending, None);
    assert_eq!(textures.get(ids[0]).unwrap().binding_unit, None);

    let log = device.log_handle();
    log.borrow_mut().clear();
    pool.sync_all(&mut textures, &mut device, &mut rebinds);
    assert_eq!(log.borrow().as_slice(), ["bind_texture TwoD None"]);
  }

  #[test]
  fn pinning_can_duplicate_a_texture_across_units() {
    let (mut textures, ids) = registry_with(1);
    let mut pool = TextureUnits::new(4);

    let a = pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), Some(2), true);
    assert_eq!(a, 2);

    let b = pool.assign(&mut textures, Some(ids[0]), Some(TextureKind::TwoD), Some(3), true);
    assert_eq!(b, 3);

    assert_eq!(pool.unit(2).pending, Some(ids[0]));
    assert_eq!(pool.unit(3).pending, Some(ids[0]));
  }
}
