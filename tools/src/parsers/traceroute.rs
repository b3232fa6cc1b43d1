//! Path trace parsing for `traceroute` and `tracert`

use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::error::{PipelineError, PipelineResult};
use crate::platform::Platform;
use crate::records::{Hop, TracerouteRecord};
use crate::registry::Operation;

static HOP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+(.*)$").expect("hop line regex is valid"));

// "router.lan (192.168.1.1)" on Unix, "dns.google [8.8.8.8]" on Windows
static NAMED_ADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9._:-]+)\s+[(\[]([0-9A-Fa-f.:]+)[)\]]").expect("named address regex is valid")
});

// Matched against a single whitespace-delimited token, never the hop text,
// so digits inside hostnames cannot be read as timings.
static UNIX_TIMING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)$").expect("timing regex is valid"));

static WINDOWS_TIMING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<?(\d+)$").expect("windows timing regex is valid"));

/// Probes reported per hop.
const MAX_TIMINGS: usize = 3;

pub fn parse(output: &str, target: &str, platform: Platform) -> PipelineResult<TracerouteRecord> {
    let timing = match platform {
        Platform::Windows => &*WINDOWS_TIMING,
        _ => &*UNIX_TIMING,
    };

    let hops: Vec<Hop> = output
        .lines()
        .filter_map(|line| parse_hop(line, timing))
        .collect();

    if hops.is_empty() {
        return Err(PipelineError::parse(
            Operation::Traceroute,
            "no hop lines in output",
        ));
    }

    let reached = hops.last().is_some_and(|h| {
        h.ip.as_deref() == Some(target) || h.hostname.as_deref() == Some(target)
    });

    Ok(TracerouteRecord {
        target: target.to_string(),
        hops,
        reached,
    })
}

fn parse_hop(line: &str, timing: &Regex) -> Option<Hop> {
    let caps = HOP_LINE.captures(line)?;
    let hop: u32 = caps[1].parse().ok()?;
    let rest = caps[2].trim();

    let all_stars = !rest.is_empty() && rest.split_whitespace().all(|t| t == "*");
    if all_stars || rest.contains("Request timed out") {
        return Some(Hop {
            hop,
            timeout: true,
            ..Default::default()
        });
    }

    let (hostname, ip) = match NAMED_ADDR.captures(rest) {
        Some(c) => {
            let name = c[1].to_string();
            let ip = c[2].to_string();
            ((name != ip).then_some(name), Some(ip))
        }
        None => (
            None,
            rest.split_whitespace()
                .find(|t| t.parse::<IpAddr>().is_ok())
                .map(str::to_string),
        ),
    };

    let timings = hop_timings(rest, timing);
    let avg_rtt = (!timings.is_empty())
        .then(|| super::round3(timings.iter().sum::<f64>() / timings.len() as f64));

    Some(Hop {
        hop,
        timeout: timings.is_empty() && ip.is_none(),
        ip,
        hostname,
        timings,
        avg_rtt,
    })
}

/// Values written as `<n> ms` or `<n>ms`, in order, at most three.
fn hop_timings(rest: &str, timing: &Regex) -> Vec<f64> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    tokens
        .iter()
        .enumerate()
        .filter_map(|(i, token)| {
            let value = match token.strip_suffix("ms") {
                Some(v) if !v.is_empty() => v,
                _ if tokens.get(i + 1) == Some(&"ms") => *token,
                _ => return None,
            };
            timing.captures(value).and_then(|c| c[1].parse().ok())
        })
        .take(MAX_TIMINGS)
        .collect()
}
