// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("MQTT connect error: {0}")]
    Connect(#[from] rumqttc::ConnectionError),
    #[error("MQTT subscribe error: {0}")]
    Subscribe(#[from] rumqttc::ClientError),
}
