//! Reachability probe summary parsing

use regex::Regex;
use std::sync::LazyLock;

use crate::platform::Platform;
use crate::records::PingRecord;

// "4 packets transmitted, 4 received, 0% packet loss, time 3004ms"
// "4 packets transmitted, 4 packets received, 0.0% packet loss"
static UNIX_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received(?:, \+\d+ \w+)*, ([\d.]+)% packet loss")
        .expect("ping counts regex is valid")
});

// "rtt min/avg/max/mdev = ..." (Linux) or "round-trip min/avg/max/stddev = ..." (BSD)
static UNIX_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = ([\d.]+)/([\d.]+)/([\d.]+)/[\d.]+ ms")
        .expect("ping rtt regex is valid")
});

static WINDOWS_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sent = (\d+), Received = (\d+), Lost = \d+ \((\d+)% loss\)")
        .expect("windows ping counts regex is valid")
});

static WINDOWS_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Minimum = (\d+)ms, Maximum = (\d+)ms, Average = (\d+)ms")
        .expect("windows ping rtt regex is valid")
});

/// Parse the summary block. Fields with no matching line stay at zero.
pub fn parse(output: &str, host: &str, platform: Platform) -> PingRecord {
    let mut record = PingRecord {
        host: host.to_string(),
        ..Default::default()
    };

    let (counts, rtt, windows) = match platform {
        Platform::Windows => (&*WINDOWS_COUNTS, &*WINDOWS_RTT, true),
        _ => (&*UNIX_COUNTS, &*UNIX_RTT, false),
    };

    let mut loss_reported = None;
    if let Some(c) = counts.captures(output) {
        record.packets_sent = c[1].parse().unwrap_or(0);
        record.packets_received = c[2].parse().unwrap_or(0);
        loss_reported = c[3].parse::<f64>().ok();
    }

    if let Some(c) = rtt.captures(output) {
        let values: Vec<f64> = (1..=3).map(|i| c[i].parse().unwrap_or(0.0)).collect();
        // Windows prints min, max, average
        if windows {
            record.min_rtt = values[0];
            record.max_rtt = values[1];
            record.avg_rtt = values[2];
        } else {
            record.min_rtt = values[0];
            record.avg_rtt = values[1];
            record.max_rtt = values[2];
        }
    }

    record.packet_loss = loss_reported.unwrap_or_else(|| {
        if record.packets_sent == 0 {
            0.0
        } else {
            let lost = record.packets_sent.saturating_sub(record.packets_received);
            super::round3(100.0 * f64::from(lost) / f64::from(record.packets_sent))
        }
    });
    record.reachable = record.packets_received > 0;
    record
}
