//! `engine_server`
//!
//! Server host for the event engine:
//! - Fixed timestep loop draining the cross-thread event queue
//! - Gameplay systems (combat, armor, health) registered on startup
//! - Console commands, read on their own thread

pub mod console;
pub mod gameplay;
pub mod network;
pub mod server;

pub use server::GameServer;
