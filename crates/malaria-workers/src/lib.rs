// src/lib.rs
// Worker pool + aggregator: runs N independent publishers as true parallel
// OS processes and combines their stats.

pub mod error;
pub mod worker;

pub use error::WorkersError;
pub use worker::{PoolArgs, WorkerArgs, WORKER_INTERNAL_FLAG, run_single_worker, run_worker_pool};
