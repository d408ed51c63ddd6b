// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to allocate a local listen port: {0}")]
    PortAllocation(#[source] std::io::Error),
    #[error("failed to write bridge config: {0}")]
    ConfigWrite(#[source] std::io::Error),
    #[error("failed to spawn relay broker process: {0}")]
    BrokerSpawn(#[source] std::io::Error),
    #[error(transparent)]
    Sender(#[from] malaria_sender::SenderError),
}
