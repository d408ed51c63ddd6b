// src/lib.rs
// TrackingSender: the publishing half of the malaria load-testing engine.

pub mod error;
pub mod sender;

pub use error::SenderError;
pub use sender::{SenderAuth, TrackingSender};
