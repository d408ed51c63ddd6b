// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("MQTT connect error: {0}")]
    Connect(#[from] rumqttc::ConnectionError),
    #[error("MQTT publish error: {0}")]
    Publish(#[from] rumqttc::ClientError),
}
