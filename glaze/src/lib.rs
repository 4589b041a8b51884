//! # A deferred, diffing renderer core
//!
//! glaze sits between a game's drawing code and the GPU. It keeps a client-side mirror of the
//! whole device state machine and lets callers restage renderer state as often as they like
//! for free: nothing reaches the driver until a draw is submitted, at which point the mirror
//! is walked in a fixed order and only the values that actually moved are applied. Drawing the
//! same thing twice costs one draw call and zero state changes the second time, no matter how
//! much redundant staging happened in between.
//!
//! The API is deliberately retained-and-imperative rather than typed-to-the-hilt: resources
//! are plain copyable handles, state setters are plain methods, and correctness is enforced at
//! runtime by the [`Renderer`] rather than in the type system. That fits the intended use, a
//! game engine managing thousands of short-lived draws per frame where the caller cannot
//! thread lifetimes through its scene graph.
//!
//! # What's included?
//!
//! - **State diffing**: blending, depth test, face culling, scissor, viewport and clear values
//!   are all tracked pending-versus-active and synchronized on demand.
//! - **A texture unit pool**: sampler uniforms name textures, not units. The pool assigns
//!   units by eviction priority, keeps textures resident across draws and regenerates mipmap
//!   chains that a render pass left stale.
//! - **Uniform caching**: uniform writes land in client memory and are range-trimmed against
//!   the last committed values, so a redundant `set_uniform` never becomes a driver call.
//! - **Magic uniforms**: shader inputs like the projection matrix or the draw color are
//!   declared by name in the shader and fed automatically from renderer state.
//! - **Buffers, framebuffers and vertex arrays** with cached layouts, lazy flushing and
//!   orphaning-aware uploads.
//! - **Asynchronous readbacks** through a small ring of pixel-pack buffers and fences.
//!
//! # Architecture
//!
//! glaze comprises a core crate and backend crates:
//!
//! - This crate holds the renderer logic and is completely hardware-agnostic.
//! - Backend crates such as `glaze-gl` implement the [`Device`] trait, a thin, stateless
//!   command interface. Backends do not diff or cache anything; the core already guarantees
//!   they only see calls that change device state.
//!
//! A [`NullDevice`] backend ships in the core crate. It accepts every call and does nothing,
//! which is handy for tests and for running a game headless.
//!
//! glaze knows nothing about windowing. Creating a context, pumping events and swapping
//! buffers belong to the embedding application; the renderer only needs a [`Device`] and the
//! drawable size the device reports.
//!
//! [`Renderer`]: crate::renderer::Renderer
//! [`Device`]: crate::device::Device
//! [`NullDevice`]: crate::null::NullDevice

pub mod blending;
pub mod buffer;
pub mod caps;
pub mod color;
pub mod device;
mod env;
pub mod face_culling;
pub mod framebuffer;
pub mod handle;
pub mod null;
mod readback;
pub mod rect;
pub mod renderer;
pub mod shader;
mod state;
pub mod texture;
mod texunits;
pub mod vertex_array;
