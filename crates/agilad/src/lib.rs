//! agilad: HTTP face service.
//!
//! Detection and embedding run on one engine thread; registrations fan out
//! to object storage, the local feature file and the account directory.

pub mod config;
pub mod engine;
pub mod handlers;
pub mod server;
pub mod state;
