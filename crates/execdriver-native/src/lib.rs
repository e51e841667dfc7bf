//! Native exec driver.
//!
//! Turns a [`command::Command`] into a live container through an external
//! container primitive library ([`backend`]), wires its standard streams,
//! watches it for exit and OOM kills, and tears it down exactly once.
//! Running containers can be checkpointed to disk and restored through an
//! external checkpoint/restore engine.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod checkpoint;
pub mod command;
pub mod container;
pub mod create;
pub mod driver;
pub mod oom;
pub mod pipes;
pub mod process;
pub mod registry;
pub mod restore;
pub mod state;
pub mod stats;
mod wait;

pub use driver::{Driver, Info};
