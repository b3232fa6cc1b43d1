//! Packet capture summary parsing (`tcpdump -nn -tttt -r`)

use regex::Regex;
use std::sync::LazyLock;

use crate::records::{CapturedPacket, PacketCaptureRecord};
use crate::validation::PacketCaptureParams;

// "2024-05-01 10:00:00.123456 IP 10.0.0.1.443 > 10.0.0.2.51234: Flags [P.], ..."
static PACKET_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?)\s+(.+)$")
        .expect("tcpdump packet regex is valid")
});

// "12 packets captured" on the capturing run's stderr
static CAPTURED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets? captured").expect("tcpdump captured regex is valid")
});

/// Build the record from the read-back listing and the capture run's
/// stderr. The pcap payload fields are filled in by the caller.
pub fn parse(
    params: &PacketCaptureParams,
    capture_stderr: &str,
    listing: &str,
) -> PacketCaptureRecord {
    let packets: Vec<CapturedPacket> = listing
        .lines()
        .filter_map(|l| PACKET_LINE.captures(l))
        .map(|c| CapturedPacket {
            timestamp: c[1].to_string(),
            summary: c[2].trim().to_string(),
        })
        .collect();

    let packets_captured = super::capture(&CAPTURED, capture_stderr)
        .unwrap_or(packets.len() as u32);

    PacketCaptureRecord {
        interface: params.interface.clone(),
        filter: params.filter.clone(),
        packets_requested: params.count,
        packets_captured,
        packets,
        ..Default::default()
    }
}
