// src/lib.rs
// Bridging sender: wraps a TrackingSender behind a private relay broker.

pub mod bridge;
pub mod config;
pub mod error;

pub use bridge::{BridgingSender, ThreadedBridgingSender};
pub use error::BridgeError;
