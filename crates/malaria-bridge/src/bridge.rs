// src/bridge.rs
// BridgingSender + broker supervisor (component C6): each publisher owns a
// private relay broker that bridges to the real target, letting transport
// features the native MQTT client doesn't expose (TLS-PSK identities) be
// supplied via the relay instead.

use std::net::TcpListener;
use std::time::Duration;

use malaria_core::generator::MessageGenerator;
use malaria_core::procutil::ManagedChild;
use malaria_core::psk::parse_keyfile;
use malaria_core::stats::SenderStats;
use malaria_sender::TrackingSender;
use rumqttc::QoS;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config;
use crate::config::PskCredentials;
use crate::error::BridgeError;

const BROKER_STARTUP_DELAY: Duration = Duration::from_secs(1);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const DRAIN_DELAY: Duration = Duration::from_secs(2);

// allocate_free_port binds to ("localhost", 0), reads back the port the OS
// assigned, and immediately closes the socket. A race window exists between
// this and the broker binding the same port; spec explicitly tolerates it.
fn allocate_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("localhost", 0))?;
    listener.local_addr().map(|addr| addr.port())
}

pub struct BridgingSender {
    broker: ManagedChild,
    _config_file: NamedTempFile,
    sender: std::sync::Arc<TrackingSender>,
}

impl BridgingSender {
    // new allocates a port, renders and writes a bridge config, spawns
    // `broker_command -c <path>`, waits for it to come up, and connects a
    // TrackingSender against the relay.
    pub async fn new(
        broker_command: &str,
        target_host: &str,
        target_port: u16,
        label: &str,
        auth: Option<&str>,
    ) -> Result<Self, BridgeError> {
        let listen_port = allocate_free_port().map_err(BridgeError::PortAllocation)?;
        let psk = auth.and_then(PskCredentials::parse);
        let config_text = config::render(listen_port, target_host, target_port, label, 1, psk.as_ref());

        let mut config_file = NamedTempFile::new().map_err(BridgeError::ConfigWrite)?;
        {
            use std::io::Write;
            config_file
                .write_all(config_text.as_bytes())
                .map_err(BridgeError::ConfigWrite)?;
        }

        let mut command = Command::new(broker_command);
        command.arg("-c").arg(config_file.path());
        let broker = ManagedChild::spawn(command, format!("relay-broker-{label}"))
            .map_err(BridgeError::BrokerSpawn)?;

        tokio::time::sleep(BROKER_STARTUP_DELAY).await;

        // When PSK auth is in play the identity half becomes the effective
        // clientid; otherwise it's derived from the label as usual.
        let clientid = match &psk {
            Some(psk) => psk.identity.clone(),
            None => format!("ts_{label}"),
        };
        let sender = loop {
            match TrackingSender::new("localhost", listen_port, &clientid, None).await {
                Ok(sender) => break sender,
                Err(e) => {
                    debug!(error = %e, "relay broker not ready yet, retrying connect");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        };

        info!(listen_port, label, "bridging sender connected to relay broker");
        Ok(Self {
            broker,
            _config_file: config_file,
            sender,
        })
    }

    // run drives the wrapped TrackingSender to completion, then lets
    // in-flight acks reach the upstream broker before tearing down the
    // relay. The config temp file is unlinked when `self` is dropped.
    pub async fn run(
        &mut self,
        generator: Box<dyn MessageGenerator>,
        qos: QoS,
    ) -> Result<(), BridgeError> {
        self.sender.run(generator, qos).await?;
        tokio::time::sleep(DRAIN_DELAY).await;
        self.broker
            .terminate_and_wait()
            .await
            .map_err(BridgeError::BrokerSpawn)?;
        Ok(())
    }

    pub async fn stats(&self) -> SenderStats {
        self.sender.stats().await
    }
}

// ThreadedBridgingSender owns R BridgingSenders (the "thread-ratio" variant
// from spec section 4.6) and drives R concurrent tasks, one per broker,
// returning a stats vector.
pub struct ThreadedBridgingSender {
    bridges: Vec<BridgingSender>,
}

impl ThreadedBridgingSender {
    pub fn new(bridges: Vec<BridgingSender>) -> Self {
        Self { bridges }
    }

    // from_keyfile reads a PSK key file and spins up one BridgingSender per
    // line, distributing the R keys one per thread as spec section 4.6
    // requires: each bridge's clientid becomes that key's identity half
    // (see BridgingSender::new), not a label-derived name.
    pub async fn from_keyfile(
        broker_command: &str,
        target_host: &str,
        target_port: u16,
        label: &str,
        keyfile_contents: &str,
    ) -> Result<Self, BridgeError> {
        let keys = parse_keyfile(keyfile_contents);
        let mut bridges = Vec::with_capacity(keys.len());
        for key in &keys {
            let auth = key.to_auth_string();
            bridges.push(
                BridgingSender::new(broker_command, target_host, target_port, label, Some(&auth))
                    .await?,
            );
        }
        Ok(Self::new(bridges))
    }

    // run_all pairs each bridge with a generator by index (bridges.len()
    // must equal generators.len()) and runs them concurrently, returning
    // one SenderStats per bridge in the original order.
    pub async fn run_all(
        mut self,
        mut generators: Vec<Box<dyn MessageGenerator>>,
        qos: QoS,
    ) -> Result<Vec<SenderStats>, BridgeError> {
        assert_eq!(
            self.bridges.len(),
            generators.len(),
            "one generator is required per bridge"
        );

        let mut handles = Vec::with_capacity(self.bridges.len());
        for (mut bridge, generator) in self.bridges.drain(..).zip(generators.drain(..)) {
            handles.push(tokio::spawn(async move {
                bridge.run(generator, qos).await?;
                Ok::<SenderStats, BridgeError>(bridge.stats().await)
            }));
        }

        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await.expect("bridge task panicked") {
                Ok(s) => stats.push(s),
                Err(e) => warn!(error = %e, "threaded bridge worker failed"),
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_free_port_returns_nonzero_port() {
        let port = allocate_free_port().expect("bind should succeed");
        assert_ne!(port, 0);
    }

    #[test]
    fn allocate_free_port_is_reusable_after_close() {
        let first = allocate_free_port().expect("bind should succeed");
        let second = allocate_free_port().expect("bind should succeed");
        // Not asserting first != second: the OS is free to reissue the
        // same port once the listener is dropped, this just exercises that
        // binding twice in a row doesn't error out.
        assert_ne!(first, 0);
        assert_ne!(second, 0);
    }
}
