// src/sender.rs
// TrackingSender (component C3): publishes a generated message stream and
// correlates asynchronous publish acknowledgements back to origin records to
// compute per-publisher latency/loss statistics.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use malaria_core::generator::MessageGenerator;
use malaria_core::stats::{SenderStats, SenderStatsInput, compute_sender_stats};
use malaria_core::tracker::SentRecord;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::SenderError;

const MAX_INFLIGHT: u16 = 200;
const STARVATION_RETRY_DELAY: Duration = Duration::from_millis(500);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

// Username/password credentials, analogous to mqttea's ClientCredentials.
#[derive(Clone, Debug)]
pub struct SenderAuth {
    pub username: String,
    pub password: String,
}

// Correlation state shared between the producer (publish loop / drain loop)
// and the event-loop task driving rumqttc's callbacks. QoS1/QoS2 messages
// are acknowledged by a real protocol packet id (PubAck/PubComp) which we
// predict deterministically (see reserve_ack_id below); QoS0 messages have
// no protocol-level ack at all, so they are matched in strict FIFO order
// against rumqttc's "packet handed to the socket" notification instead.
struct Correlation {
    records: HashMap<u16, SentRecord>,
    pending_qos0: VecDeque<u16>,
}

pub struct TrackingSender {
    client: AsyncClient,
    clientid: String,
    correlation: Arc<Mutex<Correlation>>,
    next_id: AtomicU16,
    count_total: std::sync::atomic::AtomicU64,
    time_start: std::sync::Mutex<Option<Instant>>,
    event_loop_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TrackingSender {
    // new establishes an MQTT session, sets max in-flight to 200, registers
    // the publish-ack handling task, and starts the client's network loop.
    pub async fn new(
        host: &str,
        port: u16,
        clientid: &str,
        auth: Option<SenderAuth>,
    ) -> Result<Arc<Self>, SenderError> {
        let mut mqtt_options = MqttOptions::new(clientid, host, port);
        mqtt_options.set_inflight(MAX_INFLIGHT);
        if let Some(auth) = auth {
            mqtt_options.set_credentials(auth.username, auth.password);
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, MAX_INFLIGHT as usize * 2);

        // Drive the connect handshake to completion before handing back a
        // usable sender: the first poll() performs the actual TCP connect,
        // and a non-zero/error outcome here is a fatal ConnectError for the
        // owning worker per spec section 7.
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code == rumqttc::ConnectReturnCode::Success => {}
            Ok(other) => {
                debug!(?other, "unexpected first event while connecting");
            }
            Err(e) => return Err(SenderError::Connect(e)),
        }

        let correlation = Arc::new(Mutex::new(Correlation {
            records: HashMap::new(),
            pending_qos0: VecDeque::new(),
        }));

        let sender = Arc::new(Self {
            client,
            clientid: clientid.to_string(),
            correlation: correlation.clone(),
            next_id: AtomicU16::new(0),
            count_total: std::sync::atomic::AtomicU64::new(0),
            time_start: std::sync::Mutex::new(None),
            event_loop_handle: std::sync::Mutex::new(None),
        });

        let task_correlation = correlation.clone();
        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        mark_received(&task_correlation, ack.pkid).await;
                    }
                    Ok(Event::Incoming(Packet::PubComp(comp))) => {
                        mark_received(&task_correlation, comp.pkid).await;
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(0))) => {
                        mark_next_qos0_received(&task_correlation).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT event loop error: {e:?}");
                        break;
                    }
                }
            }
        });
        *sender.event_loop_handle.lock().expect("mutex poisoned") = Some(handle);

        info!("TrackingSender connected as {clientid} to {host}:{port}");
        Ok(sender)
    }

    // reserve_ack_id predicts the packet id rumqttc's internal state machine
    // will assign to the next QoS1/2 publish. This is necessary because
    // AsyncClient::publish() does not return the id synchronously (unlike
    // the original tool's paho-mqtt client); see DESIGN.md for the
    // assumptions this relies on (single producer, sequential dispatch).
    //
    // rumqttc's own packet-id counter wraps at max_inflight (set_inflight
    // above), not at u16::MAX -- it recycles ids as soon as they cycle back
    // into the in-flight window, so the prediction must use the same
    // boundary or every publish past MAX_INFLIGHT keys its SentRecord under
    // an id the broker will never actually send.
    fn reserve_ack_id(&self) -> u16 {
        loop {
            let cur = self.next_id.load(Ordering::Relaxed);
            let next = next_ack_id(cur);
            if self
                .next_id
                .compare_exchange(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }

    // run iterates the generator, publishes each item, and records a
    // SentRecord keyed by its (predicted) mid. After the generator is
    // exhausted, polls for outstanding records until all are acknowledged.
    pub async fn run(
        &self,
        mut generator: Box<dyn MessageGenerator>,
        qos: QoS,
    ) -> Result<(), SenderError> {
        *self.time_start.lock().expect("mutex poisoned") = Some(Instant::now());

        loop {
            // advance() may sleep for rate limiting; run it off the async
            // runtime's own worker threads so pacing never stalls other
            // tasks sharing the executor.
            let (next, returned_generator) = tokio::task::spawn_blocking(move || {
                let next = generator.advance();
                (next, generator)
            })
            .await
            .expect("generator thread panicked");
            generator = returned_generator;

            let Some(msg) = next else { break };

            let id = self.reserve_ack_id();
            self.client
                .publish(msg.topic.as_str(), qos, false, msg.payload.to_vec())
                .await
                .map_err(SenderError::Publish)?;
            self.count_total.fetch_add(1, Ordering::Relaxed);

            let mut correlation = self.correlation.lock().await;
            if qos == QoS::AtMostOnce {
                correlation.pending_qos0.push_back(id);
            }
            correlation
                .records
                .insert(id, SentRecord::new(id, msg.payload.len()));
        }

        debug!("generator exhausted, draining outstanding acks");
        loop {
            let outstanding = {
                let correlation = self.correlation.lock().await;
                correlation
                    .records
                    .values()
                    .filter(|r| !r.received)
                    .count()
            };
            if outstanding == 0 {
                break;
            }
            info!("waiting for {outstanding} messages to be confirmed still...");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        Ok(())
    }

    // stats computes SenderStats over every record this sender ever
    // tracked. Panics (per spec section 4.3) if no message was ever
    // acknowledged -- callers must ensure run() observed at least one ack.
    pub async fn stats(&self) -> SenderStats {
        let correlation = self.correlation.lock().await;
        let records: Vec<SentRecord> = correlation.records.values().cloned().collect();
        let time_total = self
            .time_start
            .lock()
            .expect("mutex poisoned")
            .map(|start| start.elapsed())
            .unwrap_or_default();

        compute_sender_stats(SenderStatsInput {
            clientid: &self.clientid,
            records: &records,
            count_total: self.count_total.load(Ordering::Relaxed),
            time_total,
        })
    }

    // stop halts the network loop and disconnects. Safe to call once after
    // run() completes.
    pub async fn stop(&self) -> Result<(), SenderError> {
        self.client.disconnect().await.map_err(SenderError::Publish)?;
        if let Some(handle) = self.event_loop_handle.lock().expect("mutex poisoned").take() {
            handle.abort();
        }
        Ok(())
    }
}

// next_ack_id wraps at MAX_INFLIGHT, matching rumqttc's own packet-id
// counter: it recycles ids within the in-flight window rather than
// running up to u16::MAX.
fn next_ack_id(cur: u16) -> u16 {
    if cur >= MAX_INFLIGHT { 1 } else { cur + 1 }
}

// mark_received implements the ack-before-insert race mitigation from spec
// section 4.3: retry the lookup every 0.5s, logging a warning each attempt,
// until the record appears. This never gives up -- a permanently missing
// record would mean the producer never inserted it, which spec treats as
// impossible by construction.
async fn mark_received(correlation: &Arc<Mutex<Correlation>>, pkid: u16) {
    loop {
        let mut guard = correlation.lock().await;
        if let Some(record) = guard.records.get_mut(&pkid) {
            record.receive();
            return;
        }
        drop(guard);
        warn!(pkid, "ack arrived before record was inserted, retrying lookup");
        tokio::time::sleep(STARVATION_RETRY_DELAY).await;
    }
}

async fn mark_next_qos0_received(correlation: &Arc<Mutex<Correlation>>) {
    loop {
        let mut guard = correlation.lock().await;
        if let Some(id) = guard.pending_qos0.pop_front() {
            if let Some(record) = guard.records.get_mut(&id) {
                record.receive();
            }
            return;
        }
        drop(guard);
        warn!("qos0 send confirmation arrived before record was inserted, retrying lookup");
        tokio::time::sleep(STARVATION_RETRY_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_correlation() -> Arc<Mutex<Correlation>> {
        Arc::new(Mutex::new(Correlation {
            records: HashMap::new(),
            pending_qos0: VecDeque::new(),
        }))
    }

    #[test]
    fn reserve_ack_id_wraps_and_skips_zero() {
        assert_eq!(next_ack_id(0), 1);
        assert_eq!(next_ack_id(1), 2);
    }

    #[test]
    fn reserve_ack_id_wraps_at_max_inflight_not_u16_max() {
        assert_eq!(next_ack_id(MAX_INFLIGHT), 1);
        assert_eq!(next_ack_id(MAX_INFLIGHT - 1), MAX_INFLIGHT);
    }

    #[tokio::test]
    async fn mark_received_finds_record_inserted_before_ack() {
        let correlation = fresh_correlation();
        correlation
            .lock()
            .await
            .records
            .insert(7, SentRecord::new(7, 128));

        mark_received(&correlation, 7).await;

        let guard = correlation.lock().await;
        assert!(guard.records[&7].received);
    }

    #[tokio::test]
    async fn mark_received_retries_until_record_appears() {
        let correlation = fresh_correlation();
        let retry_correlation = correlation.clone();

        let inserter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            retry_correlation
                .lock()
                .await
                .records
                .insert(3, SentRecord::new(3, 16));
        });

        // mark_received races ahead of the insert above; it must retry
        // until the record shows up rather than giving up.
        let waiter = tokio::time::timeout(Duration::from_secs(3), mark_received(&correlation, 3));
        waiter.await.expect("mark_received should eventually succeed");
        inserter.await.unwrap();

        let guard = correlation.lock().await;
        assert!(guard.records[&3].received);
    }

    #[tokio::test]
    async fn qos0_confirmations_match_fifo_order() {
        let correlation = fresh_correlation();
        {
            let mut guard = correlation.lock().await;
            for id in [10u16, 11, 12] {
                guard.pending_qos0.push_back(id);
                guard.records.insert(id, SentRecord::new(id, 8));
            }
        }

        mark_next_qos0_received(&correlation).await;
        mark_next_qos0_received(&correlation).await;

        let guard = correlation.lock().await;
        assert!(guard.records[&10].received);
        assert!(guard.records[&11].received);
        assert!(!guard.records[&12].received);
    }
}
