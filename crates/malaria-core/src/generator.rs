// src/generator.rs
// Lazy, finite, non-restartable message generators (component C1).
//
// Generators compose by wrapping, matching the fixed order in
// createGenerator(): GaussianSize -> TimeTracking? -> rate limiter?.
// Each wrapper implements the same MessageGenerator capability, so a
// TrackingSender never needs to know which combination it was handed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;
use rand_distr::{Distribution, Normal};

// GeneratedMessage is the tuple emitted by generators: (seq, topic, payload).
// Immutable once produced.
#[derive(Debug, Clone)]
pub struct GeneratedMessage {
    pub seq: u64,
    pub topic: String,
    pub payload: Bytes,
}

// MessageGenerator is the capability every generator and decorator
// implements: advance() either yields the next message or signals the end
// of the sequence. Implementations may block the calling thread (e.g. for
// rate limiting); callers run generators on a dedicated producer thread,
// never on an async executor thread.
pub trait MessageGenerator: Send {
    fn advance(&mut self) -> Option<GeneratedMessage>;
}

const HEX_ALPHABET: &[u8] = b"0123456789abcdefABCDEF";

// GaussianSize yields seq in [1..=n], with each payload a string of
// Normal(target_size, target_size/20) random hex characters. Topic is
// "mqtt-malaria/{cid}/data/{seq}/{n}".
pub struct GaussianSize {
    cid: String,
    n: u64,
    next_seq: u64,
    normal: Normal<f64>,
}

impl GaussianSize {
    pub fn new(cid: impl Into<String>, n: u64, target_size: usize) -> Self {
        let mean = target_size as f64;
        let stddev = (mean / 20.0).max(f64::EPSILON);
        // Normal::new only fails for a non-finite/negative stddev, which
        // can't happen here given the .max() clamp above.
        let normal = Normal::new(mean, stddev).expect("gaussian size stddev must be finite");
        Self {
            cid: cid.into(),
            n,
            next_seq: 1,
            normal,
        }
    }

    fn random_payload(&self, real_size: usize) -> Bytes {
        let mut rng = rand::rng();
        let mut buf = Vec::with_capacity(real_size);
        for _ in 0..real_size {
            let idx = rng.random_range(0..HEX_ALPHABET.len());
            buf.push(HEX_ALPHABET[idx]);
        }
        Bytes::from(buf)
    }
}

impl MessageGenerator for GaussianSize {
    fn advance(&mut self) -> Option<GeneratedMessage> {
        if self.next_seq > self.n {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let draw = self.normal.sample(&mut rand::rng());
        let real_size = draw.max(0.0).round() as usize;
        let payload = self.random_payload(real_size);
        let topic = format!("mqtt-malaria/{}/data/{}/{}", self.cid, seq, self.n);
        Some(GeneratedMessage { seq, topic, payload })
    }
}

// TimeTracking wraps an inner generator, replacing each payload with
// "{now_seconds_float},{original_payload}" formatted at yield time (not at
// the time the outer iteration eventually reads it).
pub struct TimeTracking<G> {
    inner: G,
}

impl<G: MessageGenerator> TimeTracking<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }
}

impl<G: MessageGenerator> MessageGenerator for TimeTracking<G> {
    fn advance(&mut self) -> Option<GeneratedMessage> {
        let msg = self.inner.advance()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let now_secs = now.as_secs_f64();
        let mut payload = format!("{now_secs:.6},").into_bytes();
        payload.extend_from_slice(&msg.payload);
        Some(GeneratedMessage {
            seq: msg.seq,
            topic: msg.topic,
            payload: Bytes::from(payload),
        })
    }
}

// RateLimited yields each inner item, then sleeps 1/rate seconds.
pub struct RateLimited<G> {
    inner: G,
    period: Duration,
}

impl<G: MessageGenerator> RateLimited<G> {
    // rate must be > 0; spec leaves rate <= 0 undefined for rate-limited
    // generators, so callers are expected not to construct one in that case.
    pub fn new(inner: G, rate: f64) -> Self {
        Self {
            inner,
            period: Duration::from_secs_f64(1.0 / rate),
        }
    }
}

impl<G: MessageGenerator> MessageGenerator for RateLimited<G> {
    fn advance(&mut self) -> Option<GeneratedMessage> {
        let msg = self.inner.advance()?;
        std::thread::sleep(self.period);
        Some(msg)
    }
}

// JitteryRateLimited is RateLimited with the sleep perturbed by
// Uniform(-jitter/rate, +jitter/rate).
pub struct JitteryRateLimited<G> {
    inner: G,
    base_secs: f64,
    jitter: f64,
}

impl<G: MessageGenerator> JitteryRateLimited<G> {
    pub fn new(inner: G, rate: f64, jitter: f64) -> Self {
        Self {
            inner,
            base_secs: 1.0 / rate,
            jitter,
        }
    }
}

impl<G: MessageGenerator> MessageGenerator for JitteryRateLimited<G> {
    fn advance(&mut self) -> Option<GeneratedMessage> {
        let msg = self.inner.advance()?;
        let spread = self.jitter * self.base_secs;
        let delta = rand::rng().random_range(-spread..=spread);
        let sleep_secs = (self.base_secs + delta).max(0.0);
        std::thread::sleep(Duration::from_secs_f64(sleep_secs));
        Some(msg)
    }
}

// GeneratorOptions mirrors the knobs createGenerator() composes over.
#[derive(Debug, Clone, Default)]
pub struct GeneratorOptions {
    pub msg_count: u64,
    pub msg_size: usize,
    pub timing: bool,
    pub msgs_per_second: f64,
    pub jitter: f64,
}

// create_generator builds GaussianSize, then wraps in TimeTracking iff
// options.timing, then wraps in a rate limiter iff msgs_per_second > 0
// (jittery iff jitter > 0). Order is fixed per spec section 4.1.
pub fn create_generator(cid: &str, options: &GeneratorOptions) -> Box<dyn MessageGenerator> {
    let base = GaussianSize::new(cid, options.msg_count, options.msg_size);

    if options.timing {
        let timed = TimeTracking::new(base);
        wrap_rate_limit(timed, options)
    } else {
        wrap_rate_limit(base, options)
    }
}

fn wrap_rate_limit<G: MessageGenerator + 'static>(
    gen: G,
    options: &GeneratorOptions,
) -> Box<dyn MessageGenerator> {
    if options.msgs_per_second > 0.0 {
        if options.jitter > 0.0 {
            Box::new(JitteryRateLimited::new(gen, options.msgs_per_second, options.jitter))
        } else {
            Box::new(RateLimited::new(gen, options.msgs_per_second))
        }
    } else {
        Box::new(gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn drain(mut gen: impl MessageGenerator) -> Vec<GeneratedMessage> {
        let mut out = Vec::new();
        while let Some(msg) = gen.advance() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn gaussian_size_topic_roundtrip() {
        let msgs = drain(GaussianSize::new("c", 3, 100));
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].topic, "mqtt-malaria/c/data/1/3");
        assert_eq!(msgs[1].topic, "mqtt-malaria/c/data/2/3");
        assert_eq!(msgs[2].topic, "mqtt-malaria/c/data/3/3");
        for (i, msg) in msgs.iter().enumerate() {
            assert_eq!(msg.seq, (i + 1) as u64);
        }
    }

    #[test]
    fn gaussian_size_mean_within_tolerance() {
        let target = 200usize;
        let msgs = drain(GaussianSize::new("c", 20_000, target));
        let total: usize = msgs.iter().map(|m| m.payload.len()).sum();
        let mean = total as f64 / msgs.len() as f64;
        let tolerance = target as f64 * 0.1;
        assert!(
            (mean - target as f64).abs() <= tolerance,
            "mean {mean} not within {tolerance} of {target}"
        );
    }

    #[test]
    fn gaussian_size_payload_is_hex() {
        let msgs = drain(GaussianSize::new("c", 50, 64));
        for msg in msgs {
            assert!(
                msg.payload
                    .iter()
                    .all(|b| b.is_ascii_hexdigit()),
                "payload contained non-hex byte"
            );
        }
    }

    #[test]
    fn time_tracking_preserves_seq_and_topic() {
        let plain = drain(GaussianSize::new("c", 4, 16));
        let tracked = drain(TimeTracking::new(GaussianSize::new("c", 4, 16)));
        assert_eq!(plain.len(), tracked.len());
        for (p, t) in plain.iter().zip(tracked.iter()) {
            assert_eq!(p.seq, t.seq);
            assert_eq!(p.topic, t.topic);
        }
    }

    #[test]
    fn time_tracking_prefixes_timestamp() {
        let msg = drain(TimeTracking::new(GaussianSize::new("c", 1, 10)))
            .pop()
            .unwrap();
        let payload = std::str::from_utf8(&msg.payload).unwrap();
        let comma = payload.find(',').expect("missing comma separator");
        let (ts, rest) = payload.split_at(comma);
        assert!(ts.parse::<f64>().is_ok(), "timestamp segment not a float: {ts}");
        let rest = &rest[1..];
        assert!(rest.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn rate_limited_respects_minimum_elapsed() {
        let n = 5u64;
        let rate = 10.0;
        let start = Instant::now();
        drain(RateLimited::new(GaussianSize::new("c", n, 10), rate));
        let elapsed = start.elapsed().as_secs_f64();
        assert!(elapsed >= (n - 1) as f64 / rate);
        assert!(elapsed <= n as f64 / rate + 0.5);
    }
}
