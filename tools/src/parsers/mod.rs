//! Output parsers: raw tool text to typed records
//!
//! Every parser is a pure function of the captured text plus the validated
//! parameters that produced it. Running the same output through twice
//! yields the same record.

pub mod bandwidth;
pub mod dns;
pub mod geo;
pub mod http;
pub mod nmap;
pub mod ping;
pub mod tcpdump;
pub mod traceroute;
pub mod whois;

use crate::error::{PipelineError, PipelineResult};
use crate::platform::{Binary, Platform};
use crate::records::ParsedRecord;
use crate::validation::ValidatedParams;

/// Parse `stdout` of `binary` for the run described by `params`.
///
/// Operations served natively (port probe, certificate inspection) and
/// packet capture, which needs two processes, do not come through here.
pub fn parse(
    params: &ValidatedParams,
    platform: Platform,
    binary: Binary,
    stdout: &str,
) -> PipelineResult<ParsedRecord> {
    let operation = params.operation();
    if stdout.trim().is_empty() {
        return Err(PipelineError::parse(operation, "tool produced no output"));
    }

    let record = match (params, binary) {
        (ValidatedParams::Ping(p), _) => {
            ParsedRecord::Ping(ping::parse(stdout, p.host.as_str(), platform))
        }
        (ValidatedParams::Traceroute(p), _) => ParsedRecord::Traceroute(traceroute::parse(
            stdout,
            p.host.as_str(),
            platform,
        )?),
        (ValidatedParams::PortScan(p), _) => {
            let mut record = nmap::parse(stdout, p.host.as_str())?;
            record.ports_requested = p.port_count;
            record.rate = p.rate.rate;
            ParsedRecord::PortScan(record)
        }
        (ValidatedParams::DnsLookup(p), Binary::Dig) => {
            ParsedRecord::Dns(dns::parse_dig(stdout, p.host.as_str(), p.record_type)?)
        }
        (ValidatedParams::DnsLookup(p), _) => {
            ParsedRecord::Dns(dns::parse_nslookup(stdout, p.host.as_str(), p.record_type)?)
        }
        (ValidatedParams::ReverseDns(p), Binary::Dig) => {
            ParsedRecord::ReverseDns(dns::parse_dig_reverse(stdout, p.ip)?)
        }
        (ValidatedParams::ReverseDns(p), _) => {
            ParsedRecord::ReverseDns(dns::parse_nslookup_reverse(stdout, p.ip)?)
        }
        (ValidatedParams::HttpProbe(p), _) => {
            ParsedRecord::HttpProbe(http::parse(stdout, &p.url, p.method)?)
        }
        (ValidatedParams::BandwidthTest(p), Binary::Iperf3) => {
            ParsedRecord::Bandwidth(bandwidth::parse_iperf3(stdout, p)?)
        }
        (ValidatedParams::BandwidthTest(p), _) => {
            ParsedRecord::Bandwidth(bandwidth::parse_iperf2(stdout, p)?)
        }
        (ValidatedParams::Whois(p), _) => ParsedRecord::Whois(whois::parse(stdout, p.query.as_str())),
        (ValidatedParams::Geolocation(p), _) => {
            ParsedRecord::Geolocation(geo::parse(stdout, p.host.as_str())?)
        }
        (
            ValidatedParams::PortProbe(_)
            | ValidatedParams::TlsCertificate(_)
            | ValidatedParams::PacketCapture(_),
            _,
        ) => {
            return Err(PipelineError::parse(
                operation,
                "operation has no text output to parse",
            ))
        }
    };
    Ok(record)
}

/// First capture group of `re` in `text`, parsed.
pub(crate) fn capture<T: std::str::FromStr>(re: &regex::Regex, text: &str) -> Option<T> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Round to three decimals so float noise never reaches the caller.
pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
