// src/stats.rs
// Statistics types and the pure math that turns raw SentRecord/ObservedRecord
// collections into them (spec section 3 data model + sections 4.3/4.4/4.5).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::tracker::{ObservedRecord, SentRecord};

#[derive(Debug, Clone, Serialize)]
pub struct SenderStats {
    pub clientid: String,
    pub count_ok: u64,
    pub count_total: u64,
    pub rate_ok: f64,
    pub time_mean: f64,
    pub time_min: f64,
    pub time_max: f64,
    pub time_stddev: f64,
    pub msgs_per_sec: f64,
    pub time_total: f64,
}

// AggregateStats has the same shape as SenderStats (spec section 3); only
// the aggregation rule that fills it in differs (see aggregate_sender_stats).
pub type AggregateStats = SenderStats;

// SenderStatsInput is the raw material a TrackingSender hands to
// compute_sender_stats once a run completes: every record it ever inserted
// into its correlation table, how many publish attempts succeeded at the
// library level, and the wall-clock span of the whole run.
pub struct SenderStatsInput<'a> {
    pub clientid: &'a str,
    pub records: &'a [SentRecord],
    pub count_total: u64,
    pub time_total: Duration,
}

// compute_sender_stats implements spec section 4.3's numerics: flight times
// in milliseconds, population mean/stddev (not sample), msgs_per_sec and
// rate_ok derived from the counts. Panics if no record was ever
// acknowledged -- spec section 4.3 says stats() is undefined in that case
// and callers must ensure at least one ack before calling it.
pub fn compute_sender_stats(input: SenderStatsInput<'_>) -> SenderStats {
    let times_ms: Vec<f64> = input
        .records
        .iter()
        .filter(|r| r.received)
        .map(|r| r.time_flight().as_secs_f64() * 1000.0)
        .collect();

    assert!(
        !times_ms.is_empty(),
        "compute_sender_stats called with zero acknowledged messages"
    );

    let count_ok = times_ms.len() as u64;
    let (time_mean, time_stddev) = mean_and_population_stddev(&times_ms);
    let time_min = times_ms.iter().cloned().fold(f64::INFINITY, f64::min);
    let time_max = times_ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let time_total = input.time_total.as_secs_f64();

    SenderStats {
        clientid: input.clientid.to_string(),
        count_ok,
        count_total: input.count_total,
        rate_ok: count_ok as f64 / input.count_total as f64,
        time_mean,
        time_min,
        time_max,
        time_stddev,
        msgs_per_sec: count_ok as f64 / time_total,
        time_total,
    }
}

// aggregate_sender_stats implements spec section 4.5's "mean of extremes"
// rule, deliberately naive: count_ok/count_total are sums, rate_ok is
// derived from the sums, time_min/time_max/time_mean/time_stddev are plain
// arithmetic means of the per-worker values (not population statistics over
// the underlying samples), and msgs_per_sec is mean(per-worker) * worker
// count. time_total is the controller's own wall-clock span, supplied by
// the caller since it isn't derivable from the per-worker stats.
pub fn aggregate_sender_stats(workers: &[SenderStats], controller_time_total: Duration) -> AggregateStats {
    assert!(!workers.is_empty(), "cannot aggregate an empty worker set");

    let n = workers.len();
    let count_ok: u64 = workers.iter().map(|w| w.count_ok).sum();
    let count_total: u64 = workers.iter().map(|w| w.count_total).sum();
    let naive_average = |f: fn(&SenderStats) -> f64| -> f64 {
        workers.iter().map(f).sum::<f64>() / n as f64
    };

    AggregateStats {
        clientid: format!("Aggregate stats (simple avg) for {n} processes"),
        count_ok,
        count_total,
        rate_ok: count_ok as f64 / count_total as f64,
        time_min: naive_average(|w| w.time_min),
        time_max: naive_average(|w| w.time_max),
        time_mean: naive_average(|w| w.time_mean),
        time_stddev: naive_average(|w| w.time_stddev),
        msgs_per_sec: naive_average(|w| w.msgs_per_sec) * n as f64,
        time_total: controller_time_total.as_secs_f64(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerStats {
    pub clientid: String,
    pub client_count: usize,
    pub test_complete: bool,
    pub msg_count: usize,
    pub msg_duplicates: Vec<ObservedRecord>,
    pub msg_missing: HashMap<String, Vec<u64>>,
    pub ms_per_msg: f64,
    pub msg_per_sec: f64,
    pub time_total: f64,
    pub flight_time_mean: f64,
    pub flight_time_stddev: f64,
    pub flight_time_min: f64,
    pub flight_time_max: f64,
}

// compute_listener_stats implements spec section 4.4. `expected_per_client`
// is options.msg_count: the 1..=N sequence each client is expected to have
// sent. test_complete is false when the listener's run() exited early due
// to a detected broker drop.
pub fn compute_listener_stats(
    clientid: &str,
    observed: &[ObservedRecord],
    expected_per_client: u64,
    time_total: Duration,
    test_complete: bool,
) -> ListenerStats {
    let msg_count = observed.len();

    let flight_times: Vec<f64> = observed.iter().map(ObservedRecord::time_flight).collect();
    let (flight_time_mean, flight_time_stddev) = if flight_times.is_empty() {
        (0.0, 0.0)
    } else {
        mean_and_population_stddev(&flight_times)
    };
    let flight_time_min = flight_times.iter().cloned().fold(f64::INFINITY, f64::min);
    let flight_time_max = flight_times
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);

    let clients: HashSet<&str> = observed.iter().map(|r| r.cid.as_str()).collect();
    let client_count = clients.len();

    let mut seen_counts: HashMap<(String, u64), (u32, ObservedRecord)> = HashMap::new();
    for rec in observed {
        seen_counts
            .entry(rec.identity())
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, rec.clone()));
    }
    let mut msg_duplicates: Vec<ObservedRecord> = seen_counts
        .into_values()
        .filter(|(count, _)| *count > 1)
        .map(|(_, rec)| rec)
        .collect();
    msg_duplicates.sort_by(|a, b| a.cid.cmp(&b.cid).then(a.mid.cmp(&b.mid)));

    let mut msg_missing: HashMap<String, Vec<u64>> = HashMap::new();
    for cid in &clients {
        let present: HashSet<u64> = observed
            .iter()
            .filter(|r| r.cid == *cid)
            .map(|r| r.mid)
            .collect();
        let mut missing: Vec<u64> = (1..=expected_per_client)
            .filter(|seq| !present.contains(seq))
            .collect();
        missing.sort_unstable();
        msg_missing.insert(cid.to_string(), missing);
    }

    let time_total_secs = time_total.as_secs_f64();
    ListenerStats {
        clientid: clientid.to_string(),
        client_count,
        test_complete,
        msg_count,
        msg_duplicates,
        msg_missing,
        ms_per_msg: if msg_count > 0 {
            time_total_secs / msg_count as f64 * 1000.0
        } else {
            0.0
        },
        msg_per_sec: if time_total_secs > 0.0 {
            msg_count as f64 / time_total_secs
        } else {
            0.0
        },
        time_total: time_total_secs,
        flight_time_mean,
        flight_time_stddev,
        flight_time_min: if flight_time_min.is_finite() { flight_time_min } else { 0.0 },
        flight_time_max: if flight_time_max.is_finite() { flight_time_max } else { 0.0 },
    }
}

// mean_and_population_stddev computes time_mean = sum(t)/n and the
// *population* stddev sqrt(sum((t-mean)^2)/n), matching spec section 4.3
// (not Bessel-corrected sample stddev).
fn mean_and_population_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stddev_zero_when_all_equal() {
        let (_, stddev) = mean_and_population_stddev(&[5.0, 5.0, 5.0]);
        assert_eq!(stddev, 0.0);
    }

    #[test]
    fn stddev_nonnegative() {
        let (_, stddev) = mean_and_population_stddev(&[1.0, 2.0, 3.0, 100.0]);
        assert!(stddev >= 0.0);
    }

    #[test]
    fn aggregate_of_single_worker_matches_input_fields() {
        let worker = SenderStats {
            clientid: "w0".into(),
            count_ok: 10,
            count_total: 10,
            rate_ok: 1.0,
            time_mean: 12.0,
            time_min: 5.0,
            time_max: 30.0,
            time_stddev: 3.0,
            msgs_per_sec: 50.0,
            time_total: 0.2,
        };
        let agg = aggregate_sender_stats(&[worker.clone()], Duration::from_secs(1));
        assert_eq!(agg.count_ok, worker.count_ok);
        assert_eq!(agg.count_total, worker.count_total);
        assert_eq!(agg.time_min, worker.time_min);
        assert_eq!(agg.time_max, worker.time_max);
        assert_eq!(agg.time_mean, worker.time_mean);
        assert_eq!(agg.time_stddev, worker.time_stddev);
        assert_eq!(agg.msgs_per_sec, worker.msgs_per_sec * 1.0);
    }

    #[test]
    fn listener_stats_missing_and_duplicates() {
        let mut observed = Vec::new();
        for cid in ["a", "b"] {
            for mid in 1..=5u64 {
                observed.push(ObservedRecord {
                    cid: cid.to_string(),
                    mid,
                    time_created: 0.0,
                    time_received: 0.1,
                });
            }
        }
        // duplicate (a, 3)
        observed.push(ObservedRecord {
            cid: "a".into(),
            mid: 3,
            time_created: 0.0,
            time_received: 0.2,
        });

        let stats = compute_listener_stats("listener", &observed, 5, Duration::from_secs(1), true);
        assert_eq!(stats.msg_count, 11);
        assert_eq!(stats.msg_duplicates.len(), 1);
        assert_eq!(stats.msg_duplicates[0].identity(), ("a".to_string(), 3));
        assert!(stats.msg_missing["a"].is_empty());
        assert!(stats.msg_missing["b"].is_empty());
        assert_eq!(stats.client_count, 2);
        assert!(stats.test_complete);
    }

    #[test]
    fn listener_stats_reports_missing_sequence_numbers() {
        let mut observed = Vec::new();
        for mid in [1u64, 3, 4] {
            observed.push(ObservedRecord {
                cid: "a".into(),
                mid,
                time_created: 0.0,
                time_received: 0.1,
            });
        }
        let stats = compute_listener_stats("listener", &observed, 5, Duration::from_secs(1), false);
        assert_eq!(stats.msg_missing["a"], vec![2, 5]);
        assert!(!stats.test_complete);
    }
}
