//! `engine_shared`
//!
//! Entity event dispatch shared by every host process.
//!
//! Design goals:
//! - Handlers run on one dispatch thread; other threads queue.
//! - Traits at the seams (component storage, networking) for dependency
//!   injection.
//! - No `unsafe`.

pub mod config;
pub mod ecs;
pub mod event;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::event::*;
    pub use crate::net::*;
}
