//! Typed per-operation results
//!
//! One struct per operation, wrapped in [`ParsedRecord`]. Field names are
//! camelCase on the wire because both transports forward `data` verbatim.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::registry::Operation;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRecord {
    pub host: String,
    pub packets_sent: u32,
    pub packets_received: u32,
    /// Percent, 0.0 to 100.0
    pub packet_loss: f64,
    pub min_rtt: f64,
    pub avg_rtt: f64,
    pub max_rtt: f64,
    pub reachable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub hop: u32,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    /// Per-probe round trips in milliseconds
    pub timings: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rtt: Option<f64>,
    pub timeout: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerouteRecord {
    pub target: String,
    pub hops: Vec<Hop>,
    pub reached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortProbeRecord {
    pub host: String,
    pub port: u16,
    pub open: bool,
    /// Connect time in milliseconds when the port answered
    pub connect_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortEntry {
    /// Wider than a port so the sanity stage can see garbage
    pub port: u32,
    pub protocol: String,
    pub state: String,
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortScanRecord {
    pub host: String,
    pub ports: Vec<PortEntry>,
    pub ports_requested: usize,
    /// Probes per second handed to the scanner
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsAnswer {
    pub name: String,
    pub ttl: Option<u32>,
    pub class: String,
    pub record_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    pub query: String,
    pub record_type: String,
    /// Server that answered, when the tool reported it
    pub server: Option<String>,
    /// `dig` or `nslookup`
    pub resolver: String,
    pub answers: Vec<DnsAnswer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseDnsRecord {
    pub ip: String,
    pub hostnames: Vec<String>,
    pub resolver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub host: String,
    pub port: u16,
    pub subject: String,
    pub issuer: String,
    pub common_name: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub serial_number: String,
    /// RFC 3339
    pub valid_from: String,
    /// RFC 3339
    pub valid_to: String,
    pub days_remaining: i64,
    pub expired: bool,
    pub not_yet_valid: bool,
    pub fingerprint_sha256: String,
    pub signature_algorithm: String,
    pub protocol: String,
    pub cipher_suite: String,
    pub chain_length: usize,
    pub self_signed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTimings {
    pub dns_ms: f64,
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub first_byte_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProbeRecord {
    pub url: String,
    pub method: String,
    pub status_code: u16,
    pub http_version: Option<String>,
    pub final_url: String,
    /// Header names lowercased; repeated headers joined with ", "
    pub headers: BTreeMap<String, String>,
    pub redirect_count: u32,
    pub timings: HttpTimings,
    pub size_download: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPacket {
    pub timestamp: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketCaptureRecord {
    pub interface: String,
    pub filter: Option<String>,
    pub packets_requested: u32,
    pub packets_captured: u32,
    pub packets: Vec<CapturedPacket>,
    /// Size of the raw capture file
    pub pcap_bytes: u64,
    /// gzip + base64 of the capture file; omitted when too large
    pub pcap_gzip_base64: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthRecord {
    pub server: String,
    pub port: u16,
    pub protocol: String,
    pub duration_secs: f64,
    pub sent_bps: f64,
    pub received_bps: f64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub retransmits: Option<u64>,
    pub jitter_ms: Option<f64>,
    pub lost_percent: Option<f64>,
    /// `iperf3` or `iperf`
    pub tool: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoisRecord {
    pub query: String,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub updated_date: Option<String>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    /// Every `key: value` pair seen, first occurrence wins
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeolocationRecord {
    pub query: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "as")]
    pub asn: Option<String>,
}

/// Structured result of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParsedRecord {
    Ping(PingRecord),
    Traceroute(TracerouteRecord),
    PortProbe(PortProbeRecord),
    PortScan(PortScanRecord),
    Dns(DnsRecord),
    ReverseDns(ReverseDnsRecord),
    Certificate(CertificateRecord),
    HttpProbe(HttpProbeRecord),
    PacketCapture(PacketCaptureRecord),
    Bandwidth(BandwidthRecord),
    Whois(WhoisRecord),
    Geolocation(GeolocationRecord),
}

impl ParsedRecord {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Ping(_) => Operation::Ping,
            Self::Traceroute(_) => Operation::Traceroute,
            Self::PortProbe(_) => Operation::PortProbe,
            Self::PortScan(_) => Operation::PortScan,
            Self::Dns(_) => Operation::DnsLookup,
            Self::ReverseDns(_) => Operation::ReverseDns,
            Self::Certificate(_) => Operation::TlsCertificate,
            Self::HttpProbe(_) => Operation::HttpProbe,
            Self::PacketCapture(_) => Operation::PacketCapture,
            Self::Bandwidth(_) => Operation::BandwidthTest,
            Self::Whois(_) => Operation::Whois,
            Self::Geolocation(_) => Operation::Geolocation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_serializes_camel_case_with_nulls() {
        let hop = Hop {
            hop: 3,
            timeout: true,
            ..Default::default()
        };
        let v = serde_json::to_value(&hop).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"hop": 3, "ip": null, "hostname": null, "timings": [], "timeout": true})
        );
    }

    #[test]
    fn test_record_is_untagged() {
        let rec = ParsedRecord::Ping(PingRecord {
            host: "8.8.8.8".into(),
            packets_sent: 4,
            ..Default::default()
        });
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["packetsSent"], 4);
        assert!(v.get("Ping").is_none());
        assert_eq!(rec.operation(), Operation::Ping);
    }
}
