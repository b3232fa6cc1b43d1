//! Platform resolver: host OS family and diagnostic binary lookup
//!
//! Binary presence is checked with a PATH search (`which`), never through
//! a shell, and the name searched for is always one of the fixed
//! `Binary` programs below.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::registry::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Darwin,
    Unknown,
}

impl Platform {
    /// Platform this binary was compiled for.
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn from_os_name(os: &str) -> Self {
        match os {
            "windows" => Self::Windows,
            "linux" | "android" => Self::Linux,
            "macos" | "darwin" | "ios" => Self::Darwin,
            _ => Self::Unknown,
        }
    }

    /// Fail on `Unknown` rather than guessing an argument grammar.
    pub fn require_known(self) -> PipelineResult<Self> {
        match self {
            Self::Unknown => Err(PipelineError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            )),
            known => Ok(known),
        }
    }

    pub fn null_device(self) -> &'static str {
        match self {
            Self::Windows => "NUL",
            _ => "/dev/null",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// External programs the pipeline may spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Binary {
    Ping,
    Traceroute,
    Tracert,
    Dig,
    Nslookup,
    Nmap,
    Whois,
    Tcpdump,
    Iperf3,
    Iperf,
    Curl,
}

impl Binary {
    pub fn program(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Traceroute => "traceroute",
            Self::Tracert => "tracert",
            Self::Dig => "dig",
            Self::Nslookup => "nslookup",
            Self::Nmap => "nmap",
            Self::Whois => "whois",
            Self::Tcpdump => "tcpdump",
            Self::Iperf3 => "iperf3",
            Self::Iperf => "iperf",
            Self::Curl => "curl",
        }
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Answers "is this program installed".
pub trait BinaryProbe: Send + Sync {
    fn is_present(&self, program: &str) -> bool;
}

/// PATH lookup against the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl BinaryProbe for SystemProbe {
    fn is_present(&self, program: &str) -> bool {
        locate(program).is_some()
    }
}

/// Fixed set of installed programs. Lets transports and tests describe a
/// host without touching PATH.
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    present: HashSet<String>,
}

impl StaticProbe {
    pub fn new(programs: &[&str]) -> Self {
        Self {
            present: programs.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl BinaryProbe for StaticProbe {
    fn is_present(&self, program: &str) -> bool {
        self.present.contains(program)
    }
}

/// Absolute path of `program` on PATH, if any.
pub fn locate(program: &str) -> Option<PathBuf> {
    let found = which::which(program).ok();
    debug!(program, found = ?found, "binary lookup");
    found
}

/// Binaries able to serve `operation`, in preference order. Empty for
/// operations implemented natively.
pub fn candidates(operation: Operation, platform: Platform) -> &'static [Binary] {
    match operation {
        Operation::Ping => &[Binary::Ping],
        Operation::Traceroute => match platform {
            Platform::Windows => &[Binary::Tracert],
            _ => &[Binary::Traceroute],
        },
        Operation::PortProbe | Operation::TlsCertificate => &[],
        Operation::PortScan => &[Binary::Nmap],
        Operation::DnsLookup | Operation::ReverseDns => &[Binary::Dig, Binary::Nslookup],
        Operation::HttpProbe | Operation::Geolocation => &[Binary::Curl],
        Operation::PacketCapture => &[Binary::Tcpdump],
        Operation::BandwidthTest => &[Binary::Iperf3, Binary::Iperf],
        Operation::Whois => &[Binary::Whois],
    }
}

/// Pick the first installed candidate for `operation`.
///
/// `Ok(None)` means the operation needs no external program.
pub fn select_binary(
    operation: Operation,
    platform: Platform,
    probe: &dyn BinaryProbe,
) -> PipelineResult<Option<Binary>> {
    let wanted = candidates(operation, platform);
    if wanted.is_empty() {
        return Ok(None);
    }
    platform.require_known()?;

    wanted
        .iter()
        .copied()
        .find(|b| probe.is_present(b.program()))
        .map(Some)
        .ok_or_else(|| PipelineError::ToolUnavailable {
            operation,
            binary: wanted
                .iter()
                .map(|b| b.program())
                .collect::<Vec<_>>()
                .join(" or "),
        })
}
