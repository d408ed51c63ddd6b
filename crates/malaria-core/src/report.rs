// src/report.rs
// Human-readable stats rendering (spec section 6) plus an optional JSON dump.
// Field order and formatting mirror the original tool's print_stats().

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::stats::{ListenerStats, SenderStats};

impl fmt::Display for SenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Clientid: {}", self.clientid)?;
        writeln!(
            f,
            "Message success rate: {:.2}% ({}/{} messages)",
            100.0 * self.rate_ok,
            self.count_ok,
            self.count_total
        )?;
        writeln!(f, "Message timing mean   {:.2} ms", self.time_mean)?;
        writeln!(f, "Message timing stddev {:.2} ms", self.time_stddev)?;
        writeln!(f, "Message timing min    {:.2} ms", self.time_min)?;
        writeln!(f, "Message timing max    {:.2} ms", self.time_max)?;
        writeln!(f, "Messages per second   {:.2}", self.msgs_per_sec)?;
        writeln!(f, "Total time            {:.2} secs", self.time_total)
    }
}

impl fmt::Display for ListenerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Clientid: {}", self.clientid)?;
        writeln!(f, "Clients observed: {}", self.client_count)?;
        writeln!(f, "Test complete: {}", self.test_complete)?;
        writeln!(f, "Messages observed: {}", self.msg_count)?;
        writeln!(f, "Duplicates: {}", self.msg_duplicates.len())?;
        let missing_total: usize = self.msg_missing.values().map(Vec::len).sum();
        writeln!(f, "Missing: {missing_total}")?;
        writeln!(f, "ms per message: {:.2}", self.ms_per_msg)?;
        writeln!(f, "Messages per second: {:.2}", self.msg_per_sec)?;
        writeln!(f, "Total time: {:.2} secs", self.time_total)?;
        writeln!(f, "Flight time mean   {:.6} s", self.flight_time_mean)?;
        writeln!(f, "Flight time stddev {:.6} s", self.flight_time_stddev)?;
        writeln!(f, "Flight time min    {:.6} s", self.flight_time_min)?;
        writeln!(f, "Flight time max    {:.6} s", self.flight_time_max)
    }
}

// dump_json writes a serializable stats value to `path` as pretty JSON.
// This is the one piece of "output" plumbing the CLI non-goal doesn't
// exclude -- the library itself just needs a Path, no argument parser.
pub fn dump_json<T: Serialize>(value: &T, path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value).map_err(std::io::Error::from)
}
