// src/worker.rs
// Worker pool + aggregator (component C5). True parallel execution units
// are realized as OS child processes: the controller re-execs its own
// binary with a hidden internal flag carrying a worker's arguments as JSON,
// and each worker process prints its final SenderStats as one JSON line on
// stdout before exiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use malaria_core::generator::{GeneratorOptions, create_generator};
use malaria_core::psk::parse_keyfile;
use malaria_core::stats::{AggregateStats, SenderStats, aggregate_sender_stats};
use malaria_sender::TrackingSender;
use rand::Rng;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::WorkersError;

// The flag a re-exec'd worker process recognizes on its own argv. Never
// surfaced on the public CLI argument parser -- malaria-cli checks for it
// before handing control to clap.
pub const WORKER_INTERNAL_FLAG: &str = "--malaria-worker-internal";

const START_JITTER_MIN_SECS: f64 = 1.0;
const START_JITTER_MAX_SECS: f64 = 10.0;
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerArgs {
    pub index: u32,
    pub label: String,
    pub host: String,
    pub port: u16,
    pub qos: u8,
    pub msg_count: u64,
    pub msg_size: usize,
    pub timing: bool,
    pub msgs_per_second: f64,
    pub jitter: f64,
    // Set when a PSK key file drove this worker's assignment: the identity
    // half of that worker's key becomes its effective clientid instead of
    // the usual "{label}-{index}" derivation.
    pub psk_identity: Option<String>,
}

impl WorkerArgs {
    pub fn clientid(&self) -> String {
        match &self.psk_identity {
            Some(identity) => identity.clone(),
            None => format!("{}-{}", self.label, self.index),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolArgs {
    pub worker_count: u32,
    pub label: String,
    pub host: String,
    pub port: u16,
    pub qos: u8,
    pub msg_count: u64,
    pub msg_size: usize,
    pub timing: bool,
    pub msgs_per_second: f64,
    pub jitter: f64,
    // UTF-8 contents of an optional PSK key file (spec section 6): one
    // "identity:hex_key" entry per line. When present, its line count
    // overrides worker_count and each worker is assigned one key in order.
    pub psk_keyfile: Option<String>,
}

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

// run_single_worker is what a re-exec'd worker process runs: sleep a
// decorrelating start jitter, build a generator, publish to completion, and
// return the resulting SenderStats. Called directly by malaria-cli when it
// detects WORKER_INTERNAL_FLAG on its own argv.
pub async fn run_single_worker(args: &WorkerArgs) -> Result<SenderStats, WorkersError> {
    let jitter_secs = rand::rng().random_range(START_JITTER_MIN_SECS..=START_JITTER_MAX_SECS);
    tokio::time::sleep(Duration::from_secs_f64(jitter_secs)).await;

    let clientid = args.clientid();
    let sender = TrackingSender::new(&args.host, args.port, &clientid, None).await?;

    let generator = create_generator(
        &clientid,
        &GeneratorOptions {
            msg_count: args.msg_count,
            msg_size: args.msg_size,
            timing: args.timing,
            msgs_per_second: args.msgs_per_second,
            jitter: args.jitter,
        },
    );

    sender.run(generator, qos_from_u8(args.qos)).await?;
    let stats = sender.stats().await;
    sender.stop().await?;
    Ok(stats)
}

// spawn_worker_process re-execs the current binary as a worker and waits
// for its final stats line.
async fn spawn_worker_process(args: &WorkerArgs) -> Result<SenderStats, WorkersError> {
    let exe = std::env::current_exe().map_err(WorkersError::Spawn)?;
    let json = serde_json::to_string(args).expect("WorkerArgs always serializes");

    let mut command = Command::new(exe);
    command.arg(WORKER_INTERNAL_FLAG).arg(json);

    let (status, stdout) = malaria_core::procutil::spawn_and_capture_stdout(command)
        .await
        .map_err(WorkersError::Spawn)?;
    if !status.success() {
        return Err(WorkersError::WorkerExited(status));
    }

    let last_line = stdout
        .lines()
        .next_back()
        .ok_or(WorkersError::MissingStatsLine)?;
    serde_json::from_str(last_line).map_err(WorkersError::Deserialize)
}

// run_worker_pool spawns pool.worker_count workers as separate processes,
// polls progress once per second, and aggregates every worker that
// returned stats. Workers that exit non-zero are logged and excluded from
// the aggregate, per spec's propagation policy.
pub async fn run_worker_pool(pool: &PoolArgs) -> Result<AggregateStats, WorkersError> {
    let start = Instant::now();
    let completed = Arc::new(AtomicU32::new(0));

    // A PSK key file's line count determines the worker count when one is
    // supplied, overriding pool.worker_count (spec section 4.5/4.6); each
    // worker is then assigned one key, in order.
    let keys = pool.psk_keyfile.as_deref().map(parse_keyfile);
    let total = keys.as_ref().map_or(pool.worker_count, |keys| keys.len() as u32);

    let mut handles = Vec::with_capacity(total as usize);
    for index in 0..total {
        let psk_identity = keys
            .as_ref()
            .and_then(|keys| keys.get(index as usize))
            .map(|key| key.identity.clone());
        let args = WorkerArgs {
            index,
            label: pool.label.clone(),
            host: pool.host.clone(),
            port: pool.port,
            qos: pool.qos,
            msg_count: pool.msg_count,
            msg_size: pool.msg_size,
            timing: pool.timing,
            msgs_per_second: pool.msgs_per_second,
            jitter: pool.jitter,
            psk_identity,
        };
        let completed = completed.clone();
        handles.push(tokio::spawn(async move {
            let result = spawn_worker_process(&args).await;
            completed.fetch_add(1, Ordering::Relaxed);
            (index, result)
        }));
    }

    let progress_completed = completed.clone();
    let progress_handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(PROGRESS_POLL_INTERVAL).await;
            let done = progress_completed.load(Ordering::Relaxed);
            info!("{done}/{total} workers complete");
            if done >= total {
                break;
            }
        }
    });

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.expect("worker task panicked"));
    }
    progress_handle.abort();

    let mut stats = Vec::new();
    for (index, result) in results {
        match result {
            Ok(s) => stats.push(s),
            Err(e) => warn!(index, error = %e, "worker failed, excluding from aggregate"),
        }
    }

    if stats.is_empty() {
        return Err(WorkersError::AllWorkersFailed);
    }

    Ok(aggregate_sender_stats(&stats, start.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args(index: u32) -> WorkerArgs {
        WorkerArgs {
            index,
            label: "load-test".into(),
            host: "localhost".into(),
            port: 1883,
            qos: 1,
            msg_count: 10,
            msg_size: 64,
            timing: false,
            msgs_per_second: 0.0,
            jitter: 0.0,
            psk_identity: None,
        }
    }

    #[test]
    fn clientid_derives_from_label_and_index() {
        assert_eq!(sample_args(3).clientid(), "load-test-3");
    }

    #[test]
    fn clientid_prefers_psk_identity_when_present() {
        let mut args = sample_args(3);
        args.psk_identity = Some("malaria-tlspsk-4".into());
        assert_eq!(args.clientid(), "malaria-tlspsk-4");
    }

    #[test]
    fn qos_from_u8_maps_known_values() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
    }

    #[test]
    fn worker_args_round_trip_through_json() {
        let args = sample_args(1);
        let json = serde_json::to_string(&args).unwrap();
        let decoded: WorkerArgs = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.clientid(), args.clientid());
        assert_eq!(decoded.msg_count, args.msg_count);
    }
}
