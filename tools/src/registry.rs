//! Operation registry: the fixed catalog of diagnostic operations
//!
//! Each entry declares its permission, deadline bounds and exit policy.
//! Availability on the current host is derived from the platform
//! resolver, one operation at a time, so a missing binary only disables
//! the operations that need it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::platform::{self, BinaryProbe, Platform};

/// The diagnostic operations this crate knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Ping,
    Traceroute,
    PortProbe,
    PortScan,
    DnsLookup,
    ReverseDns,
    TlsCertificate,
    HttpProbe,
    PacketCapture,
    BandwidthTest,
    Whois,
    Geolocation,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Ping,
        Operation::Traceroute,
        Operation::PortProbe,
        Operation::PortScan,
        Operation::DnsLookup,
        Operation::ReverseDns,
        Operation::TlsCertificate,
        Operation::HttpProbe,
        Operation::PacketCapture,
        Operation::BandwidthTest,
        Operation::Whois,
        Operation::Geolocation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Traceroute => "traceroute",
            Self::PortProbe => "port_probe",
            Self::PortScan => "port_scan",
            Self::DnsLookup => "dns_lookup",
            Self::ReverseDns => "reverse_dns",
            Self::TlsCertificate => "tls_certificate",
            Self::HttpProbe => "http_probe",
            Self::PacketCapture => "packet_capture",
            Self::BandwidthTest => "bandwidth_test",
            Self::Whois => "whois",
            Self::Geolocation => "geolocation",
        }
    }

    /// Permission string handed to the external authorizer.
    pub fn permission(self) -> &'static str {
        match self {
            Self::Ping => "net.ping",
            Self::Traceroute => "net.traceroute",
            Self::PortProbe => "net.port_probe",
            Self::PortScan => "net.port_scan",
            Self::DnsLookup | Self::ReverseDns => "dns.lookup",
            Self::TlsCertificate => "tls.inspect",
            Self::HttpProbe => "http.probe",
            Self::PacketCapture => "net.capture",
            Self::BandwidthTest => "net.bandwidth",
            Self::Whois => "intel.whois",
            Self::Geolocation => "intel.geo",
        }
    }

    /// Namespace prefix of the permission, used to group listings.
    pub fn namespace(self) -> &'static str {
        self.permission()
            .split_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or("net")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Risk level shown to transports when listing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Single request against one target
    Low,
    /// Sends many packets or runs for a long time
    Medium,
    /// Observes traffic on local interfaces
    High,
}

/// How a process exit maps onto success for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPolicy {
    /// Exit codes that still yield a parseable (possibly negative) result
    pub accepted: &'static [i32],
    /// Exit codes the tool uses to report its own timeout
    pub timeout_codes: &'static [i32],
    /// Deadline expiry ends the run normally instead of failing it
    pub deadline_completes: bool,
}

impl ExitPolicy {
    /// Exit 0 only.
    pub const STRICT: ExitPolicy = ExitPolicy {
        accepted: &[0],
        timeout_codes: &[],
        deadline_completes: false,
    };

    pub fn accepts(&self, code: i32) -> bool {
        self.accepted.contains(&code)
    }

    pub fn is_tool_timeout(&self, code: i32) -> bool {
        self.timeout_codes.contains(&code)
    }
}

/// Catalog entry for one operation.
#[derive(Debug, Clone)]
pub struct OperationDef {
    pub operation: Operation,
    pub description: &'static str,
    pub risk_level: RiskLevel,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub exit_policy: ExitPolicy,
}

/// Whether an operation can run on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub operation: Operation,
    pub enabled: bool,
    /// Binary that will be used, when one is needed and present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// In-memory operation catalog
pub struct Registry {
    operations: BTreeMap<Operation, OperationDef>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            operations: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in operation.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for def in builtin_definitions() {
            reg.register(def);
        }
        info!("Registered {} diagnostic operations", reg.len());
        reg
    }

    pub fn register(&mut self, def: OperationDef) {
        self.operations.insert(def.operation, def);
    }

    pub fn get(&self, operation: Operation) -> Option<&OperationDef> {
        self.operations.get(&operation)
    }

    /// List definitions, optionally filtered by namespace
    pub fn list(&self, namespace: &str) -> Vec<&OperationDef> {
        self.operations
            .values()
            .filter(|d| namespace.is_empty() || d.operation.namespace() == namespace)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Report which operations can run on `platform` given the binaries found by `probe`.
    pub fn availability(&self, platform: Platform, probe: &dyn BinaryProbe) -> Vec<Availability> {
        self.operations
            .keys()
            .map(|&operation| match platform::select_binary(operation, platform, probe) {
                Ok(binary) => Availability {
                    operation,
                    enabled: true,
                    binary: binary.map(|b| b.program()),
                    reason: None,
                },
                Err(e) => Availability {
                    operation,
                    enabled: false,
                    binary: None,
                    reason: Some(e.to_string()),
                },
            })
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn def(
    operation: Operation,
    description: &'static str,
    risk_level: RiskLevel,
    default_secs: u64,
    max_secs: u64,
    exit_policy: ExitPolicy,
) -> OperationDef {
    OperationDef {
        operation,
        description,
        risk_level,
        default_timeout: Duration::from_secs(default_secs),
        max_timeout: Duration::from_secs(max_secs),
        exit_policy,
    }
}

fn builtin_definitions() -> Vec<OperationDef> {
    use Operation::*;
    vec![
        def(
            Ping,
            "Send ICMP echo requests and report packet loss and round-trip times",
            RiskLevel::Low,
            22,
            120,
            ExitPolicy {
                accepted: &[0, 1],
                ..ExitPolicy::STRICT
            },
        ),
        def(
            Traceroute,
            "Trace the network path to a host hop by hop",
            RiskLevel::Low,
            60,
            300,
            ExitPolicy::STRICT,
        ),
        def(
            PortProbe,
            "Check whether a single TCP port accepts connections",
            RiskLevel::Low,
            5,
            30,
            ExitPolicy::STRICT,
        ),
        def(
            PortScan,
            "Scan a range of TCP ports with a rate-limited connect scan",
            RiskLevel::Medium,
            300,
            600,
            ExitPolicy::STRICT,
        ),
        def(
            DnsLookup,
            "Resolve DNS records for a name",
            RiskLevel::Low,
            10,
            30,
            ExitPolicy {
                accepted: &[0, 1],
                ..ExitPolicy::STRICT
            },
        ),
        def(
            ReverseDns,
            "Resolve the PTR names of an IP address",
            RiskLevel::Low,
            10,
            30,
            ExitPolicy {
                accepted: &[0, 1],
                ..ExitPolicy::STRICT
            },
        ),
        def(
            TlsCertificate,
            "Inspect the certificate presented by a TLS endpoint",
            RiskLevel::Low,
            10,
            30,
            ExitPolicy::STRICT,
        ),
        def(
            HttpProbe,
            "Issue an HTTP request and report status, headers and timings",
            RiskLevel::Low,
            30,
            120,
            ExitPolicy {
                timeout_codes: &[28],
                ..ExitPolicy::STRICT
            },
        ),
        def(
            PacketCapture,
            "Capture packets on a local interface for a bounded duration",
            RiskLevel::High,
            10,
            120,
            ExitPolicy {
                deadline_completes: true,
                ..ExitPolicy::STRICT
            },
        ),
        def(
            BandwidthTest,
            "Measure throughput against an iperf server",
            RiskLevel::Medium,
            25,
            75,
            ExitPolicy::STRICT,
        ),
        def(
            Whois,
            "Query registry WHOIS data for a domain or address",
            RiskLevel::Low,
            30,
            60,
            ExitPolicy {
                accepted: &[0, 1],
                ..ExitPolicy::STRICT
            },
        ),
        def(
            Geolocation,
            "Look up the approximate location and network owner of an address",
            RiskLevel::Low,
            10,
            30,
            ExitPolicy {
                timeout_codes: &[28],
                ..ExitPolicy::STRICT
            },
        ),
    ]
}
