//! Output sanity checks: invariants a parser cannot guarantee on its own
//!
//! Errors block the result from reaching the caller. Warnings are logged
//! and passed through.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{PipelineError, PipelineResult};
use crate::records::*;

/// Allowed gap between reported and computed packet loss, in percent.
const LOSS_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SanityReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SanityReport {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Blocking errors become a `SanityCheck` failure; warnings are returned.
    pub fn into_result(self, record: &ParsedRecord) -> PipelineResult<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(PipelineError::SanityCheck {
                operation: record.operation(),
                errors: self.errors,
            })
        }
    }
}

/// Check `record` against its invariants. `now` anchors date comparisons.
pub fn check(record: &ParsedRecord, now: DateTime<Utc>) -> SanityReport {
    let mut report = SanityReport::default();
    match record {
        ParsedRecord::Ping(r) => check_ping(r, &mut report),
        ParsedRecord::Traceroute(r) => check_traceroute(r, &mut report),
        ParsedRecord::PortProbe(r) => {
            if r.open != r.connect_ms.is_some() {
                report.warn("connect time present only for open ports");
            }
        }
        ParsedRecord::PortScan(r) => check_port_scan(r, &mut report),
        ParsedRecord::Dns(r) => {
            for a in r.answers.iter().filter(|a| a.value.trim().is_empty()) {
                report.warn(format!("{} answer for '{}' has an empty value", a.record_type, a.name));
            }
        }
        ParsedRecord::ReverseDns(r) => {
            if r.hostnames.iter().any(|h| h.is_empty()) {
                report.warn("empty hostname in reverse answer");
            }
        }
        ParsedRecord::Certificate(r) => check_certificate(r, now, &mut report),
        ParsedRecord::HttpProbe(r) => {
            if !(100..=599).contains(&r.status_code) {
                report.error(format!("HTTP status {} is not a valid status code", r.status_code));
            }
        }
        ParsedRecord::PacketCapture(r) => {
            if r.packets_captured > r.packets_requested {
                report.warn(format!(
                    "captured {} packets but only {} were requested",
                    r.packets_captured, r.packets_requested
                ));
            }
        }
        ParsedRecord::Bandwidth(r) => {
            for (label, bps) in [("sent", r.sent_bps), ("received", r.received_bps)] {
                if bps < 0.0 {
                    report.error(format!("{label} throughput is negative ({bps})"));
                } else if bps == 0.0 {
                    report.warn(format!("{label} throughput is zero"));
                }
            }
        }
        ParsedRecord::Whois(r) => check_whois(r, now, &mut report),
        ParsedRecord::Geolocation(r) => {
            if !(-90.0..=90.0).contains(&r.latitude) {
                report.error(format!("latitude {} out of range", r.latitude));
            }
            if !(-180.0..=180.0).contains(&r.longitude) {
                report.error(format!("longitude {} out of range", r.longitude));
            }
        }
    }
    report
}

fn check_ping(r: &PingRecord, report: &mut SanityReport) {
    if r.packets_received > r.packets_sent {
        report.error(format!(
            "received {} packets but only {} were sent",
            r.packets_received, r.packets_sent
        ));
        return;
    }
    if r.packets_received > 0 && !(r.min_rtt <= r.avg_rtt && r.avg_rtt <= r.max_rtt) {
        report.warn(format!(
            "round trip times out of order: min {} avg {} max {}",
            r.min_rtt, r.avg_rtt, r.max_rtt
        ));
    }
    if r.packets_sent > 0 {
        let lost = f64::from(r.packets_sent - r.packets_received);
        let expected = 100.0 * lost / f64::from(r.packets_sent);
        if (expected - r.packet_loss).abs() > LOSS_TOLERANCE {
            report.warn(format!(
                "reported loss {}% does not match {expected:.1}% from packet counts",
                r.packet_loss
            ));
        }
    }
}

fn check_traceroute(r: &TracerouteRecord, report: &mut SanityReport) {
    for pair in r.hops.windows(2) {
        let (prev, next) = (pair[0].hop, pair[1].hop);
        if next < prev {
            report.error(format!("hop {next} follows hop {prev}"));
        } else if next != prev + 1 {
            report.warn(format!("hop numbers jump from {prev} to {next}"));
        }
    }
    for hop in r.hops.iter().filter(|h| h.timeout && !h.timings.is_empty()) {
        report.warn(format!("hop {} timed out but carries timings", hop.hop));
    }
}

fn check_port_scan(r: &PortScanRecord, report: &mut SanityReport) {
    let mut seen = HashSet::new();
    for p in &r.ports {
        if !(1..=65535).contains(&p.port) {
            report.error(format!("port {} is outside 1-65535", p.port));
        }
        if !matches!(p.protocol.as_str(), "tcp" | "udp" | "sctp") {
            report.warn(format!("port {} has unexpected protocol '{}'", p.port, p.protocol));
        }
        if !matches!(p.state.as_str(), "open" | "filtered" | "open|filtered") {
            report.warn(format!("port {} has unexpected state '{}'", p.port, p.state));
        }
        if !seen.insert((p.port, p.protocol.as_str())) {
            report.warn(format!("port {}/{} reported more than once", p.port, p.protocol));
        }
    }
}

fn check_certificate(r: &CertificateRecord, now: DateTime<Utc>, report: &mut SanityReport) {
    let from = DateTime::parse_from_rfc3339(&r.valid_from).map(|d| d.with_timezone(&Utc));
    let to = DateTime::parse_from_rfc3339(&r.valid_to).map(|d| d.with_timezone(&Utc));
    let (Ok(from), Ok(to)) = (from, to) else {
        report.error("certificate validity dates are unreadable");
        return;
    };
    if from >= to {
        report.error(format!("certificate validFrom {} is not before validTo {}", r.valid_from, r.valid_to));
        return;
    }
    if now > to {
        report.warn(format!("certificate expired on {}", r.valid_to));
    } else if now < from {
        report.warn(format!("certificate is not valid until {}", r.valid_from));
    }
}

fn check_whois(r: &WhoisRecord, now: DateTime<Utc>, report: &mut SanityReport) {
    let dates = [
        ("creation", &r.creation_date),
        ("expiration", &r.expiration_date),
        ("updated", &r.updated_date),
    ];
    for (label, value) in dates {
        let Some(value) = value else { continue };
        match parse_registry_date(value) {
            Some(date) if label == "expiration" && date < now => {
                report.warn(format!("registration expired on {value}"));
            }
            Some(_) => {}
            None => report.warn(format!("{label} date '{value}' is not a recognised date")),
        }
    }
}

/// Registry dates come in many shapes; accept the common ones.
pub fn parse_registry_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(value) {
        return Some(d.with_timezone(&Utc));
    }
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    for fmt in DATETIME_FORMATS {
        if let Ok(d) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(d.and_utc());
        }
    }
    // First token only: "2001-02-03 (registered)", "03-Feb-2001 UTC"
    let head = value.split_whitespace().next().unwrap_or_default();
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%d.%m.%Y", "%Y/%m/%d"];
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(head, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn ping(sent: u32, received: u32, loss: f64, rtt: (f64, f64, f64)) -> ParsedRecord {
        ParsedRecord::Ping(PingRecord {
            host: "8.8.8.8".into(),
            packets_sent: sent,
            packets_received: received,
            packet_loss: loss,
            min_rtt: rtt.0,
            avg_rtt: rtt.1,
            max_rtt: rtt.2,
            reachable: received > 0,
        })
    }

    #[test]
    fn test_clean_ping_passes() {
        let report = check(&ping(4, 4, 0.0, (10.512, 11.090, 11.754)), now());
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn test_ping_received_above_sent_blocks() {
        let rec = ping(4, 5, 0.0, (1.0, 2.0, 3.0));
        let report = check(&rec, now());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.into_result(&rec).unwrap_err().kind(), "sanity_check");
    }

    #[test]
    fn test_ping_soft_violations_warn() {
        let report = check(&ping(4, 2, 10.0, (5.0, 3.0, 4.0)), now());
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_ping_loss_within_tolerance() {
        // 1 of 3 lost is 33.33%; tools print 33%
        assert!(check(&ping(3, 2, 33.0, (1.0, 1.0, 1.0)), now()).is_clean());
    }

    #[test]
    fn test_traceroute_ordering() {
        let hop = |n: u32| Hop {
            hop: n,
            timings: vec![1.0],
            ip: Some("10.0.0.1".into()),
            ..Default::default()
        };
        let gap = ParsedRecord::Traceroute(TracerouteRecord {
            target: "x".into(),
            hops: vec![hop(1), hop(3)],
            reached: false,
        });
        let report = check(&gap, now());
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);

        let backwards = ParsedRecord::Traceroute(TracerouteRecord {
            target: "x".into(),
            hops: vec![hop(2), hop(1)],
            reached: false,
        });
        assert_eq!(check(&backwards, now()).errors.len(), 1);

        let mut bad = hop(1);
        bad.timeout = true;
        let timed = ParsedRecord::Traceroute(TracerouteRecord {
            target: "x".into(),
            hops: vec![bad],
            reached: false,
        });
        assert_eq!(check(&timed, now()).warnings.len(), 1);
    }

    #[test]
    fn test_port_scan_checks() {
        let entry = |port: u32, state: &str| PortEntry {
            port,
            protocol: "tcp".into(),
            state: state.into(),
            service: String::new(),
        };
        let rec = ParsedRecord::PortScan(PortScanRecord {
            host: "x".into(),
            ports: vec![entry(22, "open"), entry(22, "open"), entry(70000, "open"), entry(80, "closed")],
            ports_requested: 1000,
            rate: 21.0,
        });
        let report = check(&rec, now());
        assert_eq!(report.errors, vec!["port 70000 is outside 1-65535"]);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_certificate_window() {
        let cert = |from: &str, to: &str| {
            ParsedRecord::Certificate(CertificateRecord {
                valid_from: from.into(),
                valid_to: to.into(),
                ..Default::default()
            })
        };
        assert!(check(&cert("2024-01-01T00:00:00Z", "2026-01-01T00:00:00Z"), now()).is_clean());

        let expired = check(&cert("2023-01-01T00:00:00Z", "2024-01-01T00:00:00Z"), now());
        assert!(expired.errors.is_empty());
        assert_eq!(expired.warnings.len(), 1);

        let future = check(&cert("2026-01-01T00:00:00Z", "2027-01-01T00:00:00Z"), now());
        assert!(future.errors.is_empty());
        assert_eq!(future.warnings.len(), 1);

        let inverted = check(&cert("2026-01-01T00:00:00Z", "2024-01-01T00:00:00Z"), now());
        assert_eq!(inverted.errors.len(), 1);
    }

    #[test]
    fn test_whois_dates() {
        let rec = ParsedRecord::Whois(WhoisRecord {
            creation_date: Some("03-Feb-2001".into()),
            expiration_date: Some("2024-08-13T04:00:00Z".into()),
            updated_date: Some("sometime last year".into()),
            ..Default::default()
        });
        let report = check(&rec, now());
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_registry_date_formats() {
        for s in ["2024-08-13T04:00:00Z", "2024-08-13T04:00:00.000Z", "2024-08-13", "13-Aug-2024", "2024.08.13", "2024-08-13 04:00:00"] {
            assert!(parse_registry_date(s).is_some(), "{s}");
        }
        assert!(parse_registry_date("soon").is_none());
    }

    #[test]
    fn test_supplemented_records() {
        let http = ParsedRecord::HttpProbe(HttpProbeRecord {
            status_code: 0,
            ..Default::default()
        });
        assert_eq!(check(&http, now()).errors.len(), 1);

        let bw = ParsedRecord::Bandwidth(BandwidthRecord {
            sent_bps: -1.0,
            received_bps: 0.0,
            ..Default::default()
        });
        let report = check(&bw, now());
        assert_eq!((report.errors.len(), report.warnings.len()), (1, 1));

        let geo = ParsedRecord::Geolocation(GeolocationRecord {
            latitude: 91.0,
            longitude: -181.0,
            ..Default::default()
        });
        assert_eq!(check(&geo, now()).errors.len(), 2);

        let cap = ParsedRecord::PacketCapture(PacketCaptureRecord {
            packets_requested: 5,
            packets_captured: 6,
            ..Default::default()
        });
        assert_eq!(check(&cap, now()).warnings.len(), 1);

        let dns = ParsedRecord::Dns(DnsRecord {
            answers: vec![DnsAnswer {
                name: "x".into(),
                record_type: "TXT".into(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(check(&dns, now()).warnings.len(), 1);
    }
}
