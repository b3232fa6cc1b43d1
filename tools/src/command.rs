//! Command synthesis: validated parameters to an argument vector
//!
//! Everything here is a pure function of its inputs. Arguments are kept
//! as a vector and handed to the process spawner directly; no value is
//! ever interpolated into a shell string.

use std::fmt;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::platform::{Binary, Platform};
use crate::rate::scan_budget_secs;
use crate::validation::*;

/// Fixed per-hop wait for path traces, independent of the overall timeout.
pub const TRACE_HOP_WAIT_SECS: u32 = 5;
/// Probes sent per hop.
pub const TRACE_PROBES_PER_HOP: u32 = 3;
/// Marker line curl writes after the headers of an HTTP probe.
pub const HTTP_METRICS_MARKER: &str = "__NETPROBE_METRICS__";
/// Redirect ceiling for followed HTTP probes.
const HTTP_MAX_REDIRECTS: u32 = 10;
const GEO_ENDPOINT: &str = "http://ip-api.com/json/";
const GEO_FIELDS: &str = "status,message,query,country,countryCode,regionName,city,lat,lon,timezone,isp,org,as";

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl CommandSpec {
    fn new(binary: Binary) -> Self {
        Self {
            program: binary.program(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn arg_if(self, cond: bool, arg: &str) -> Self {
        if cond {
            self.arg(arg)
        } else {
            self
        }
    }

    pub fn program(&self) -> &'static str {
        self.program
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Build the argument vector for `params` on `platform` using `binary`.
///
/// Packet capture needs a scratch file and is built with
/// [`capture_command`] instead.
pub fn synthesize(
    params: &ValidatedParams,
    platform: Platform,
    binary: Binary,
) -> PipelineResult<CommandSpec> {
    let platform = platform.require_known()?;
    let operation = params.operation();
    let mismatch = || {
        PipelineError::failure(
            operation,
            format!("{binary} cannot serve {operation} on {platform}"),
        )
    };

    let spec = match (params, binary) {
        (ValidatedParams::Ping(p), Binary::Ping) => ping(p, platform),
        (ValidatedParams::Traceroute(p), Binary::Traceroute | Binary::Tracert) => {
            traceroute(p, platform)
        }
        (ValidatedParams::PortScan(p), Binary::Nmap) => port_scan(p),
        (ValidatedParams::DnsLookup(p), Binary::Dig) => dig_lookup(p),
        (ValidatedParams::DnsLookup(p), Binary::Nslookup) => nslookup_lookup(p),
        (ValidatedParams::ReverseDns(p), Binary::Dig) => CommandSpec::new(Binary::Dig)
            .arg(format!("+time={}", p.timeout_secs))
            .arg("+tries=1")
            .arg("-x")
            .arg(p.ip.to_string()),
        (ValidatedParams::ReverseDns(p), Binary::Nslookup) => CommandSpec::new(Binary::Nslookup)
            .arg(format!("-timeout={}", p.timeout_secs))
            .arg(p.ip.to_string()),
        (ValidatedParams::HttpProbe(p), Binary::Curl) => http_probe(p, platform),
        (ValidatedParams::Geolocation(p), Binary::Curl) => geolocation(p),
        (ValidatedParams::BandwidthTest(p), Binary::Iperf3) => iperf3(p),
        (ValidatedParams::BandwidthTest(p), Binary::Iperf) => iperf2(p)?,
        (ValidatedParams::Whois(p), Binary::Whois) => CommandSpec::new(Binary::Whois)
            .arg_if(platform == Platform::Windows, "-nobanner")
            .arg(p.query.as_str()),
        _ => return Err(mismatch()),
    };
    Ok(spec)
}

fn ping(p: &PingParams, platform: Platform) -> CommandSpec {
    let count = p.count.to_string();
    let cmd = CommandSpec::new(Binary::Ping);
    let cmd = match platform {
        Platform::Windows => cmd
            .args(["-n", count.as_str(), "-w"])
            .arg((p.timeout_secs * 1000).to_string()),
        Platform::Darwin => cmd
            .args(["-c", count.as_str(), "-t"])
            .arg(p.timeout_secs.to_string()),
        _ => cmd
            .args(["-c", count.as_str(), "-W"])
            .arg(p.timeout_secs.to_string()),
    };
    cmd.arg(p.host.as_str())
}

fn traceroute(p: &TracerouteParams, platform: Platform) -> CommandSpec {
    let hops = p.max_hops.to_string();
    match platform {
        Platform::Windows => CommandSpec::new(Binary::Tracert)
            .args(["-h", hops.as_str(), "-w"])
            .arg((TRACE_HOP_WAIT_SECS * 1000).to_string())
            .arg_if(!p.resolve_names, "-d")
            .arg(p.host.as_str()),
        _ => CommandSpec::new(Binary::Traceroute)
            .args(["-m", hops.as_str(), "-w"])
            .arg(TRACE_HOP_WAIT_SECS.to_string())
            .arg("-q")
            .arg(TRACE_PROBES_PER_HOP.to_string())
            .arg_if(!p.resolve_names, "-n")
            .arg(p.host.as_str()),
    }
}

fn port_scan(p: &PortScanParams) -> CommandSpec {
    let plan = p.rate;
    let mut cmd = CommandSpec::new(Binary::Nmap)
        .args(["-Pn", "-sT", "--open", "-p"])
        .arg(p.ports.to_string())
        .arg("--max-rate")
        .arg(format_rate(plan.rate));
    if let Some(delay) = plan.delay_ms {
        cmd = cmd.arg("--scan-delay").arg(format!("{delay}ms"));
    }
    cmd.arg("--host-timeout")
        .arg(format!("{}s", scan_budget_secs(p.timeout_secs)))
        .arg(p.host.as_str())
}

fn dig_lookup(p: &DnsLookupParams) -> CommandSpec {
    let mut cmd = CommandSpec::new(Binary::Dig);
    if let Some(ns) = &p.nameserver {
        cmd = cmd.arg(format!("@{ns}"));
    }
    cmd.arg(format!("+time={}", p.timeout_secs))
        .arg("+tries=1")
        .arg(p.host.as_str())
        .arg(p.record_type)
}

fn nslookup_lookup(p: &DnsLookupParams) -> CommandSpec {
    // nslookup takes no nameserver override here; it only applies to dig.
    CommandSpec::new(Binary::Nslookup)
        .arg(format!("-type={}", p.record_type))
        .arg(format!("-timeout={}", p.timeout_secs))
        .arg(p.host.as_str())
}

fn http_probe(p: &HttpProbeParams, platform: Platform) -> CommandSpec {
    let write_out = format!(
        "\n{HTTP_METRICS_MARKER} %{{http_code}} %{{time_namelookup}} %{{time_connect}} \
         %{{time_appconnect}} %{{time_starttransfer}} %{{time_total}} %{{size_download}} \
         %{{num_redirects}} %{{url_effective}}\n"
    );
    let mut cmd = CommandSpec::new(Binary::Curl)
        .args(["-s", "-S", "--proto", "=http,https", "-o"])
        .arg(platform.null_device())
        .args(["-D", "-"]);
    cmd = if p.method == "HEAD" {
        cmd.arg("-I")
    } else {
        cmd.arg("-X").arg(p.method)
    };
    if p.follow_redirects {
        cmd = cmd
            .args(["-L", "--proto-redir", "=http,https", "--max-redirs"])
            .arg(HTTP_MAX_REDIRECTS.to_string());
    }
    cmd.arg("--max-time")
        .arg(p.timeout_secs.to_string())
        .arg("-w")
        .arg(write_out)
        .arg("--url")
        .arg(p.url.as_str())
}

fn geolocation(p: &GeolocationParams) -> CommandSpec {
    CommandSpec::new(Binary::Curl)
        .args(["-s", "-S", "--proto", "=http,https", "--max-time"])
        .arg(p.timeout_secs.to_string())
        .arg("--url")
        .arg(format!("{GEO_ENDPOINT}{}?fields={GEO_FIELDS}", p.host))
}

fn iperf3(p: &BandwidthTestParams) -> CommandSpec {
    CommandSpec::new(Binary::Iperf3)
        .arg("-c")
        .arg(p.server.as_str())
        .arg("-p")
        .arg(p.port.to_string())
        .arg("-t")
        .arg(p.duration_secs.to_string())
        .arg("-P")
        .arg(p.parallel.to_string())
        .arg_if(p.protocol == TransportProtocol::Udp, "-u")
        .arg_if(p.reverse, "-R")
        .arg("-J")
}

fn iperf2(p: &BandwidthTestParams) -> PipelineResult<CommandSpec> {
    if p.reverse {
        return Err(PipelineError::failure(
            crate::registry::Operation::BandwidthTest,
            "reverse mode requires iperf3",
        ));
    }
    Ok(CommandSpec::new(Binary::Iperf)
        .arg("-c")
        .arg(p.server.as_str())
        .arg("-p")
        .arg(p.port.to_string())
        .arg("-t")
        .arg(p.duration_secs.to_string())
        .arg("-P")
        .arg(p.parallel.to_string())
        .args(["-f", "k"])
        .arg_if(p.protocol == TransportProtocol::Udp, "-u"))
}

/// tcpdump invocation writing raw packets to `output`.
///
/// `output` is created by this process with owner-only permissions, so
/// tcpdump keeps its privileges (`-Z root`) instead of switching to the
/// `tcpdump` user, which could not open the file.
pub fn capture_command(p: &PacketCaptureParams, output: &Path) -> CommandSpec {
    let cmd = CommandSpec::new(Binary::Tcpdump)
        .arg("-i")
        .arg(p.interface.as_str())
        .arg("-c")
        .arg(p.count.to_string())
        .args(["-n", "-U", "-Z", "root", "-w"])
        .arg(output.to_string_lossy());
    match &p.filter {
        Some(filter) => cmd.arg(filter.as_str()),
        None => cmd,
    }
}

/// tcpdump invocation summarising a capture file as text.
pub fn capture_read_command(input: &Path) -> CommandSpec {
    CommandSpec::new(Binary::Tcpdump)
        .args(["-nn", "-tttt", "-r"])
        .arg(input.to_string_lossy())
}

/// Render a probe rate without trailing zeros.
fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{rate:.0}")
    } else {
        let s = format!("{rate:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
