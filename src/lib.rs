//! vbostream: paced delivery of per-tick GPU buffer sets to many clients.
//!
//! A simulation produces snapshots on a fixed cadence. Each connected client
//! gets its own pipeline that computes a compressed buffer set from the newest
//! snapshot, announces it over a WebSocket control channel, and waits for the
//! client to pull every buffer over HTTP and acknowledge before moving on. A
//! slow client only ever slows itself down.

pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod sim;
pub mod streaming;
pub mod tick;

pub use error::{Error, Result};
