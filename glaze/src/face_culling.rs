//! Face culling related types.

/// Side(s) of a triangle to discard when face culling is enabled.
///
/// Culling is gated by [`Capability::CullFace`](crate::caps::Capability::CullFace); the mode is
/// only pushed to hardware while that capability is on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaceCullingMode {
  /// Cull triangles facing the viewer.
  Front,
  /// Cull triangles facing away from the viewer.
  Back,
  /// Cull everything.
  Both,
}

impl Default for FaceCullingMode {
  fn default() -> Self {
    FaceCullingMode::Back
  }
}
