// src/tracker.rs
// Value objects over the wire formats in spec section 6 (component C2).

use std::time::{Duration, Instant, SystemTime};

use chrono::{Local, TimeZone};

use crate::error::ParseError;

// SentRecord tracks one outgoing publish, keyed by its broker-assigned mid
// in the TrackingSender's correlation table. Mutated exactly once, by the
// ack callback, after creation.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub mid: u16,
    pub size: usize,
    pub received: bool,
    pub time_created: Instant,
    pub time_received: Option<Instant>,
}

impl SentRecord {
    pub fn new(mid: u16, size: usize) -> Self {
        Self {
            mid,
            size,
            received: false,
            time_created: Instant::now(),
            time_received: None,
        }
    }

    // receive marks the record acknowledged. Idempotent re-invocation would
    // violate the "mutated exactly once" invariant, so callers must only
    // call this once per record.
    pub fn receive(&mut self) {
        self.received = true;
        self.time_received = Some(Instant::now());
    }

    // time_flight returns the elapsed time between publish and ack.
    // Panics if called before receive() -- callers must only compute flight
    // time for records with received == true.
    pub fn time_flight(&self) -> Duration {
        self.time_received
            .expect("time_flight called on an unacknowledged record")
            .saturating_duration_since(self.time_created)
    }
}

// ObservedRecord tracks one incoming message on the listener side. Identity
// for dedup purposes is (cid, mid); two records with equal identity are
// duplicates even if their timestamps differ.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedRecord {
    pub cid: String,
    pub mid: u64,
    pub time_created: f64,
    pub time_received: f64,
}

impl ObservedRecord {
    pub fn identity(&self) -> (String, u64) {
        (self.cid.clone(), self.mid)
    }

    // parse builds an ObservedRecord from a received topic and payload.
    // Topic segment 1 is cid, segment 3 is mid. The payload's leading
    // comma-delimited token is a float seconds-since-epoch.
    //
    // The parsed float is then passed through a local-time decomposition
    // and recomposition before becoming time_created -- this is the legacy
    // normalization called out in spec section 9 as a likely historical
    // bug (it discards sub-second precision and is timezone-dependent).
    // We preserve it rather than silently "fixing" it.
    pub fn parse(topic: &str, payload: &[u8], now: SystemTime) -> Result<Self, ParseError> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() < 4 {
            return Err(ParseError::TooFewSegments(topic.to_string()));
        }
        let cid = segments[1].to_string();
        let mid: u64 = segments[3].parse()?;

        let payload_str =
            std::str::from_utf8(payload).map_err(|_| ParseError::BadPayloadEncoding)?;
        let leading = payload_str
            .split(',')
            .next()
            .unwrap_or(payload_str);
        let raw_epoch: f64 = leading
            .parse()
            .map_err(ParseError::BadTimestamp)?;

        let time_created = normalize_through_local_time(raw_epoch);
        let time_received = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        Ok(Self {
            cid,
            mid,
            time_created,
            time_received,
        })
    }

    pub fn time_flight(&self) -> f64 {
        self.time_received - self.time_created
    }
}

// normalize_through_local_time reproduces time.mktime(time.localtime(x)) from
// the original Python tool: interpret x as epoch seconds, decompose into a
// local calendar time, then recompose back into epoch seconds. Net effect is
// truncation to whole seconds (sub-second precision is lost) with a
// timezone-dependent outcome around DST transitions.
fn normalize_through_local_time(epoch_secs: f64) -> f64 {
    let truncated = epoch_secs.trunc() as i64;
    match Local.timestamp_opt(truncated, 0) {
        chrono::LocalResult::Single(dt) => dt.timestamp() as f64,
        chrono::LocalResult::Ambiguous(dt, _) => dt.timestamp() as f64,
        chrono::LocalResult::None => truncated as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_cid_and_mid() {
        let topic = "mqtt-malaria/worker-0/data/42/100";
        let payload = b"1700000000.123456,deadbeef";
        let rec = ObservedRecord::parse(topic, payload, SystemTime::now()).unwrap();
        assert_eq!(rec.cid, "worker-0");
        assert_eq!(rec.mid, 42);
    }

    #[test]
    fn parse_rejects_short_topic() {
        let err = ObservedRecord::parse("a/b", b"1.0,x", SystemTime::now()).unwrap_err();
        assert!(matches!(err, ParseError::TooFewSegments(_)));
    }

    #[test]
    fn parse_rejects_non_integer_mid() {
        let err =
            ObservedRecord::parse("mqtt-malaria/c/data/nope/5", b"1.0,x", SystemTime::now())
                .unwrap_err();
        assert!(matches!(err, ParseError::BadMid(_)));
    }

    #[test]
    fn parse_rejects_non_float_timestamp() {
        let err = ObservedRecord::parse(
            "mqtt-malaria/c/data/1/5",
            b"not-a-float,x",
            SystemTime::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::BadTimestamp(_)));
    }

    #[test]
    fn identity_ignores_timestamps() {
        let a = ObservedRecord {
            cid: "c".into(),
            mid: 1,
            time_created: 1.0,
            time_received: 2.0,
        };
        let b = ObservedRecord {
            cid: "c".into(),
            mid: 1,
            time_created: 99.0,
            time_received: 100.0,
        };
        assert_eq!(a.identity(), b.identity());
    }
}
