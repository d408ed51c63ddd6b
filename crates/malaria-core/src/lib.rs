// src/lib.rs
// Shared primitives for the malaria MQTT load-generation and observation engine:
// message generators, sent/observed trackers, and the statistics types each
// worker and the controller exchange.

pub mod error;
pub mod generator;
pub mod procutil;
pub mod psk;
pub mod report;
pub mod stats;
pub mod tracker;

pub use error::ParseError;
pub use generator::{
    GaussianSize, GeneratedMessage, JitteryRateLimited, MessageGenerator, RateLimited,
    TimeTracking,
};
pub use psk::{PskCredentials, parse_keyfile};
pub use stats::{
    AggregateStats, ListenerStats, SenderStats, SenderStatsInput, aggregate_sender_stats,
    compute_listener_stats, compute_sender_stats,
};
pub use tracker::{ObservedRecord, SentRecord};
