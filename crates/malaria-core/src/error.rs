// src/error.rs
// Error types shared by the generator, tracker and stats modules. Network-facing
// crates (malaria-sender, malaria-listener, malaria-bridge) define their own
// connection-oriented error enums and convert into/out of these where relevant.

use thiserror::Error;

// ParseError covers the ways an incoming publish can fail to become an
// ObservedRecord. Never fatal: callers log and skip (see spec section 4.2).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("topic has too few segments: {0:?}")]
    TooFewSegments(String),
    #[error("mid segment is not an integer: {0}")]
    BadMid(#[from] std::num::ParseIntError),
    #[error("leading payload token is not a float: {0}")]
    BadTimestamp(std::num::ParseFloatError),
    #[error("payload is not valid UTF-8")]
    BadPayloadEncoding,
}
