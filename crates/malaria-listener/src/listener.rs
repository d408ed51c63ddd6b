// src/listener.rs
// TrackingListener (component C4): subscribes to a known message sequence,
// tracks completeness/dedup/flight-time, and watches the broker's drop
// counter for signs the test is no longer trustworthy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use malaria_core::stats::{ListenerStats, compute_listener_stats};
use malaria_core::tracker::ObservedRecord;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ListenerError;

const DROP_COUNTER_TOPIC: &str = "$SYS/broker/publish/messages/dropped";
const MAX_INFLIGHT: u16 = 200;
const COMPLETENESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ListenerOptions mirrors the knobs TrackingListener needs: how many
// messages each client is expected to emit, and how many clients are
// expected, together defining `expected = msg_count * client_count`.
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    pub msg_count: u64,
    pub client_count: u64,
}

impl ListenerOptions {
    pub fn new(msg_count: u64, client_count: u64) -> Self {
        Self { msg_count, client_count }
    }

    fn expected(&self) -> u64 {
        self.msg_count * self.client_count
    }
}

// DropMonitor tracks the broker's publish/messages/dropped counter. The
// first observation seeds a baseline; any later value greater than it
// flips `dropping`.
#[derive(Default)]
struct DropMonitor {
    baseline: AtomicU64,
    seen_baseline: AtomicBool,
    dropping: AtomicBool,
}

impl DropMonitor {
    fn observe(&self, value: u64) {
        if !self.seen_baseline.swap(true, Ordering::AcqRel) {
            self.baseline.store(value, Ordering::Release);
            return;
        }
        let baseline = self.baseline.load(Ordering::Acquire);
        if value > baseline {
            warn!(
                baseline,
                value,
                delta = value - baseline,
                "broker drop counter increased, aborting run"
            );
            self.dropping.store(true, Ordering::Release);
        }
    }

    fn is_dropping(&self) -> bool {
        self.dropping.load(Ordering::Acquire)
    }
}

pub struct TrackingListener {
    client: AsyncClient,
    clientid: String,
    options: ListenerOptions,
    observed: Arc<Mutex<Vec<ObservedRecord>>>,
    drop_monitor: Arc<DropMonitor>,
    time_start: Arc<std::sync::Mutex<Option<Instant>>>,
    event_loop_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl TrackingListener {
    // new connects, subscribes to the drop-counter system topic at QoS 0,
    // sets max in-flight to 200, and starts the network loop.
    pub async fn new(
        host: &str,
        port: u16,
        clientid: &str,
        options: ListenerOptions,
    ) -> Result<Arc<Self>, ListenerError> {
        let mut mqtt_options = MqttOptions::new(clientid, host, port);
        mqtt_options.set_inflight(MAX_INFLIGHT);

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, MAX_INFLIGHT as usize * 2);

        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code == rumqttc::ConnectReturnCode::Success => {}
            Ok(other) => debug!(?other, "unexpected first event while connecting"),
            Err(e) => return Err(ListenerError::Connect(e)),
        }

        client
            .subscribe(DROP_COUNTER_TOPIC, QoS::AtMostOnce)
            .await
            .map_err(ListenerError::Subscribe)?;

        let observed = Arc::new(Mutex::new(Vec::new()));
        let drop_monitor = Arc::new(DropMonitor::default());
        let time_start = Arc::new(std::sync::Mutex::new(None));

        let listener = Arc::new(Self {
            client,
            clientid: clientid.to_string(),
            options,
            observed: observed.clone(),
            drop_monitor: drop_monitor.clone(),
            time_start: time_start.clone(),
            event_loop_handle: std::sync::Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let task_observed = observed.clone();
        let task_drop_monitor = drop_monitor.clone();
        let task_time_start = time_start.clone();
        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic == DROP_COUNTER_TOPIC {
                            match std::str::from_utf8(&publish.payload)
                                .ok()
                                .and_then(|s| s.trim().parse::<u64>().ok())
                            {
                                Some(count) => task_drop_monitor.observe(count),
                                None => warn!("unparseable drop-counter payload"),
                            }
                            continue;
                        }

                        match ObservedRecord::parse(&publish.topic, &publish.payload, SystemTime::now()) {
                            Ok(record) => {
                                let mut start = task_time_start.lock().expect("mutex poisoned");
                                if start.is_none() {
                                    *start = Some(Instant::now());
                                }
                                drop(start);
                                task_observed.lock().await.push(record);
                            }
                            Err(e) => {
                                warn!(error = %e, topic = %publish.topic, "dropping unparseable message");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT event loop error: {e:?}");
                        break;
                    }
                }
            }
        });
        *listener.event_loop_handle.lock().expect("mutex poisoned") = Some(handle);

        info!("TrackingListener connected as {clientid} to {host}:{port}");
        Ok(listener)
    }

    // run subscribes to the application topic filter at `qos`, then polls
    // every second until either the expected message count is observed or
    // a broker drop is detected. Returns whether the run completed cleanly
    // (`test_complete`). time_start is seeded by the receive task on the
    // first non-system message, not here.
    pub async fn run(&self, topic_filter: &str, qos: QoS) -> Result<bool, ListenerError> {
        self.client
            .subscribe(topic_filter, qos)
            .await
            .map_err(ListenerError::Subscribe)?;

        let expected = self.options.expected();
        let test_complete = loop {
            tokio::time::sleep(COMPLETENESS_POLL_INTERVAL).await;

            if self.drop_monitor.is_dropping() {
                break false;
            }
            let observed_count = self.observed.lock().await.len() as u64;
            if observed_count >= expected {
                break true;
            }
        };

        self.stop().await?;
        Ok(test_complete)
    }

    // stats computes ListenerStats over every record observed so far.
    // `test_complete` should be the value run() returned.
    pub async fn stats(&self, test_complete: bool) -> ListenerStats {
        let observed = self.observed.lock().await.clone();
        let time_total = self
            .time_start
            .lock()
            .expect("mutex poisoned")
            .map(|start| start.elapsed())
            .unwrap_or_default();

        compute_listener_stats(
            &self.clientid,
            &observed,
            self.options.msg_count,
            time_total,
            test_complete,
        )
    }

    // stop disconnects and tears down the event-loop task. Idempotent: run()
    // already calls this on exit, and callers are free to call it again
    // afterwards (e.g. unconditionally, for symmetry with TrackingSender) --
    // a second call is a no-op rather than a spurious disconnect error.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client
            .disconnect()
            .await
            .map_err(ListenerError::Subscribe)?;
        if let Some(handle) = self.event_loop_handle.lock().expect("mutex poisoned").take() {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_monitor_first_observation_seeds_baseline() {
        let monitor = DropMonitor::default();
        monitor.observe(10);
        assert!(!monitor.is_dropping());
    }

    #[test]
    fn drop_monitor_flips_on_increase() {
        let monitor = DropMonitor::default();
        monitor.observe(10);
        monitor.observe(10);
        assert!(!monitor.is_dropping());
        monitor.observe(14);
        assert!(monitor.is_dropping());
    }

    #[test]
    fn listener_options_expected_multiplies_counts() {
        let options = ListenerOptions::new(5, 2);
        assert_eq!(options.expected(), 10);
    }
}
