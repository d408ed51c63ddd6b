// src/error.rs

use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkersError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("worker process exited with {0:?}")]
    WorkerExited(ExitStatus),
    #[error("worker process produced no stats line on stdout")]
    MissingStatsLine,
    #[error("failed to parse worker stats line: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("every worker in the pool failed")]
    AllWorkersFailed,
    #[error(transparent)]
    Sender(#[from] malaria_sender::SenderError),
}
