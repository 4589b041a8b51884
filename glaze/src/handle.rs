//! Opaque identities for renderer-owned GPU objects.
//!
//! Every object kind gets its own copyable id newtype minted by a [`Registry`]. Ids are never
//! reused within one renderer context, so a stale id reliably fails lookup instead of silently
//! aliasing a newer object. This is what makes the deletion hooks honest: once an object is
//! destroyed, everything still carrying its id resolves to nothing.

use std::collections::HashMap;
use std::marker::PhantomData;

/// Conversion between an id newtype and its registry key.
pub(crate) trait Handle: Copy + Eq {
  fn from_raw(raw: u32) -> Self;
  fn raw(self) -> u32;
}

macro_rules! handles {
  ($($(#[$attr:meta])* $name:ident,)+) => {
    $(
      $(#[$attr])*
      #[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
      pub struct $name(pub(crate) u32);

      impl Handle for $name {
        fn from_raw(raw: u32) -> Self {
          $name(raw)
        }

        fn raw(self) -> u32 {
          self.0
        }
      }
    )+
  };
}

handles! {
  /// Identity of a texture.
  TextureId,
  /// Identity of a buffer object.
  BufferId,
  /// Identity of a framebuffer.
  FramebufferId,
  /// Identity of a shader program.
  ProgramId,
  /// Identity of a vertex array.
  VertexArrayId,
}

/// Storage for one kind of GPU object, keyed by monotonically growing ids.
pub(crate) struct Registry<I, T> {
  entries: HashMap<u32, T>,
  next: u32,
  _ids: PhantomData<I>,
}

impl<I: Handle, T> Registry<I, T> {
  pub fn new() -> Self {
    Registry {
      entries: HashMap::new(),
      next: 1,
      _ids: PhantomData,
    }
  }

  pub fn insert(&mut self, value: T) -> I {
    let raw = self.next;
    self.next += 1;
    self.entries.insert(raw, value);
    I::from_raw(raw)
  }

  pub fn get(&self, id: I) -> Option<&T> {
    self.entries.get(&id.raw())
  }

  pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
    self.entries.get_mut(&id.raw())
  }

  pub fn remove(&mut self, id: I) -> Option<T> {
    self.entries.remove(&id.raw())
  }

  pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
    self.entries.iter().map(|(raw, v)| (I::from_raw(*raw), v))
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
    self
      .entries
      .iter_mut()
      .map(|(raw, v)| (I::from_raw(*raw), v))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_never_reused() {
    let mut reg: Registry<TextureId, &str> = Registry::new();
    let a = reg.insert("a");
    let b = reg.insert("b");
    assert_ne!(a, b);

    reg.remove(a);
    let c = reg.insert("c");
    assert_ne!(a, c);
    assert!(reg.get(a).is_none());
    assert_eq!(reg.get(c), Some(&"c"));
    assert_eq!(reg.len(), 2);
  }
}
