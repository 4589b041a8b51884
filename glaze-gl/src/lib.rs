//! OpenGL backends.
//!
//! This crate provides [OpenGL](https://www.khronos.org/opengl/) devices for
//! [glaze](https://crates.io/crates/glaze). It can be used via two mechanisms:
//!
//! - Through [`select_backend`], which resolves a backend by name, falling back to the
//!   `GLAZE_BACKEND` environment variable and then to OpenGL 3.3. This is the option the
//!   window layer should probably go to, so the backend can be swapped at launch without
//!   recompiling.
//! - Manually picked. In this case, construct one of the device types directly, such as
//!   [`Gl33Device`].
//!
//! Every device expects a context to be current on the calling thread and a loader that
//! resolves entry point names, typically `|name| window.get_proc_address(name)`.

use std::error;
use std::fmt;
use std::os::raw::c_void;

use glaze::device::Device;
use glaze::null::NullDevice;
use log::debug;

mod conv;
pub mod gl33;
pub mod gles;

pub use gl33::Gl33Device;
pub use gles::{Gles20Device, Gles30Device};

/// Error while constructing a backend device.
#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendError {
  /// No OpenGL context is current, or the loader cannot resolve entry points.
  NoActiveContext,
  /// The requested backend name is not one this crate provides.
  UnknownBackend(String),
}

impl fmt::Display for BackendError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      BackendError::NoActiveContext => write!(f, "no active OpenGL context"),
      BackendError::UnknownBackend(name) => write!(f, "unknown backend {:?}", name),
    }
  }
}

impl error::Error for BackendError {}

/// Build the device named by `name`, by `GLAZE_BACKEND` when `name` is `None`, or OpenGL 3.3
/// when neither is set.
///
/// Known names are `"gl33"`, `"gles30"`, `"gles20"` and `"null"`; matching ignores case. The
/// null backend swallows every call, which makes headless runs and frontend benchmarks
/// possible on machines without a usable context.
pub fn select_backend<F, S>(
  name: Option<&str>,
  loader: F,
  mut drawable_size: S,
) -> Result<Box<dyn Device>, BackendError>
where
  F: FnMut(&'static str) -> *const c_void,
  S: FnMut() -> (u32, u32) + 'static,
{
  let resolved = match name {
    Some(name) => name.to_owned(),
    None => std::env::var("GLAZE_BACKEND").unwrap_or_else(|_| "gl33".to_owned()),
  };

  debug!("selecting backend {:?}", resolved);

  match resolved.to_lowercase().as_str() {
    "gl33" => Ok(Box::new(Gl33Device::new(loader, drawable_size)?)),
    "gles30" => Ok(Box::new(Gles30Device::new(loader, drawable_size)?)),
    "gles20" => Ok(Box::new(Gles20Device::new(loader, drawable_size)?)),
    "null" => {
      let (width, height) = drawable_size();
      Ok(Box::new(NullDevice::new().with_drawable_size(width, height)))
    }
    _ => Err(BackendError::UnknownBackend(resolved)),
  }
}
