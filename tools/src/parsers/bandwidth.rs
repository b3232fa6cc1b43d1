//! Bandwidth test parsing: iperf3 JSON, with iperf2 text as a fallback

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::{PipelineError, PipelineResult};
use crate::records::BandwidthRecord;
use crate::registry::Operation;
use crate::validation::{BandwidthTestParams, TransportProtocol};

// "[  3]  0.0-10.0 sec  1.09 GBytes  938 Mbits/sec"
// "[SUM]  0.0-10.0 sec  2.18 GBytes  1.87 Gbits/sec"
static IPERF2_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[\s*(\w+)\]\s+([\d.]+)\s*-\s*([\d.]+)\s+sec\s+([\d.]+)\s+([KMGT]?)Bytes\s+([\d.]+)\s+([KMGT]?)bits/sec",
    )
    .expect("iperf2 line regex is valid")
});

// "0.012 ms    0/  893 (0%)"
static IPERF2_UDP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d.]+) ms\s+\d+/\s*\d+\s+\(([\d.]+)%\)").expect("iperf2 udp regex is valid")
});

fn base(params: &BandwidthTestParams, tool: &str) -> BandwidthRecord {
    BandwidthRecord {
        server: params.server.to_string(),
        port: params.port,
        protocol: match params.protocol {
            TransportProtocol::Tcp => "tcp".into(),
            TransportProtocol::Udp => "udp".into(),
        },
        tool: tool.into(),
        ..Default::default()
    }
}

fn err(reason: impl Into<String>) -> PipelineError {
    PipelineError::parse(Operation::BandwidthTest, reason)
}

pub fn parse_iperf3(output: &str, params: &BandwidthTestParams) -> PipelineResult<BandwidthRecord> {
    let doc: Value =
        serde_json::from_str(output).map_err(|e| err(format!("invalid iperf3 JSON: {e}")))?;
    if let Some(message) = doc.get("error").and_then(Value::as_str) {
        return Err(err(format!("iperf3 reported: {message}")));
    }
    let end = doc.get("end").ok_or_else(|| err("iperf3 JSON has no 'end' section"))?;

    let f = |v: &Value, key: &str| v.get(key).and_then(Value::as_f64);
    let u = |v: &Value, key: &str| v.get(key).and_then(Value::as_u64);

    let mut record = base(params, "iperf3");
    if let (Some(sent), Some(received)) = (end.get("sum_sent"), end.get("sum_received")) {
        record.sent_bps = f(sent, "bits_per_second").unwrap_or(0.0);
        record.received_bps = f(received, "bits_per_second").unwrap_or(0.0);
        record.sent_bytes = u(sent, "bytes").unwrap_or(0);
        record.received_bytes = u(received, "bytes").unwrap_or(0);
        record.retransmits = u(sent, "retransmits");
        record.duration_secs = f(sent, "seconds").unwrap_or(0.0);
    } else if let Some(sum) = end.get("sum") {
        // UDP runs summarise into a single block
        record.sent_bps = f(sum, "bits_per_second").unwrap_or(0.0);
        record.received_bps = record.sent_bps;
        record.sent_bytes = u(sum, "bytes").unwrap_or(0);
        record.received_bytes = record.sent_bytes;
        record.jitter_ms = f(sum, "jitter_ms");
        record.lost_percent = f(sum, "lost_percent");
        record.duration_secs = f(sum, "seconds").unwrap_or(0.0);
    } else {
        return Err(err("iperf3 JSON has no summary"));
    }
    Ok(record)
}

pub fn parse_iperf2(output: &str, params: &BandwidthTestParams) -> PipelineResult<BandwidthRecord> {
    let lines: Vec<regex::Captures> = output
        .lines()
        .filter_map(|l| IPERF2_LINE.captures(l))
        .collect();
    let summary = lines
        .iter()
        .find(|c| &c[1] == "SUM")
        .or_else(|| lines.last())
        .ok_or_else(|| err("no iperf summary line"))?;

    let start: f64 = summary[2].parse().unwrap_or(0.0);
    let stop: f64 = summary[3].parse().unwrap_or(0.0);
    let bytes = summary[4].parse::<f64>().unwrap_or(0.0) * byte_scale(&summary[5]);
    let bps = summary[6].parse::<f64>().unwrap_or(0.0) * bit_scale(&summary[7]);

    let mut record = base(params, "iperf");
    record.duration_secs = stop - start;
    record.sent_bps = bps;
    record.received_bps = bps;
    record.sent_bytes = bytes as u64;
    record.received_bytes = bytes as u64;
    if let Some(c) = IPERF2_UDP.captures(output) {
        record.jitter_ms = c[1].parse().ok();
        record.lost_percent = c[2].parse().ok();
    }
    Ok(record)
}

fn bit_scale(prefix: &str) -> f64 {
    match prefix {
        "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        _ => 1.0,
    }
}

fn byte_scale(prefix: &str) -> f64 {
    match prefix {
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        "T" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}
