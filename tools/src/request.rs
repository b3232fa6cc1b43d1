//! Operation requests as they arrive from a transport
//!
//! Every field is optional and loosely typed here so that a missing or
//! out-of-range value becomes a validation issue rather than a decode
//! error. Nothing in this module is trusted; `validation` turns it into
//! `ValidatedParams`.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::registry::Operation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingRequest {
    pub host: Option<String>,
    pub count: Option<i64>,
    /// Seconds to wait for each reply
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerouteRequest {
    pub host: Option<String>,
    pub max_hops: Option<i64>,
    /// Overall wall-clock budget in seconds
    pub timeout: Option<i64>,
    pub resolve_names: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortProbeRequest {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortScanRequest {
    pub host: Option<String>,
    /// Port list such as `"22,80,443"` or `"1-1024"`
    pub ports: Option<String>,
    pub timeout: Option<i64>,
    pub scan_delay_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsLookupRequest {
    pub host: Option<String>,
    pub record_type: Option<String>,
    pub nameserver: Option<String>,
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseDnsRequest {
    #[serde(alias = "ip")]
    pub address: Option<String>,
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsCertificateRequest {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub server_name: Option<String>,
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpProbeRequest {
    pub url: Option<String>,
    pub method: Option<String>,
    pub follow_redirects: Option<bool>,
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketCaptureRequest {
    pub interface: Option<String>,
    pub count: Option<i64>,
    /// Capture length in seconds
    pub duration: Option<i64>,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthTestRequest {
    pub server: Option<String>,
    pub port: Option<i64>,
    pub duration: Option<i64>,
    pub protocol: Option<String>,
    pub reverse: Option<bool>,
    pub parallel: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhoisRequest {
    pub query: Option<String>,
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationRequest {
    pub host: Option<String>,
    pub timeout: Option<i64>,
}

/// One incoming call, tagged by operation.
///
/// Wire form: `{"operation": "ping", "params": {"host": "8.8.8.8"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "params", rename_all = "snake_case")]
pub enum OperationRequest {
    Ping(PingRequest),
    Traceroute(TracerouteRequest),
    PortProbe(PortProbeRequest),
    PortScan(PortScanRequest),
    DnsLookup(DnsLookupRequest),
    ReverseDns(ReverseDnsRequest),
    TlsCertificate(TlsCertificateRequest),
    HttpProbe(HttpProbeRequest),
    PacketCapture(PacketCaptureRequest),
    BandwidthTest(BandwidthTestRequest),
    Whois(WhoisRequest),
    Geolocation(GeolocationRequest),
}

impl OperationRequest {
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

    /// Build a request from an operation name and a JSON parameter object.
    ///
    /// Decode failures (wrong JSON types, unknown operation) are reported
    /// as validation errors so transports get the same envelope either way.
    pub fn from_parts(operation: &str, params: serde_json::Value) -> PipelineResult<Self> {
        if Operation::from_name(operation).is_none() {
            return Err(PipelineError::validation(
                "operation",
                format!("unknown operation '{operation}'"),
            ));
        }
        let params = match params {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        let envelope = serde_json::json!({ "operation": operation, "params": params });
        serde_json::from_value(envelope)
            .map_err(|e| PipelineError::validation("params", e.to_string()))
    }

    /// Parameters as JSON, for audit events.
    pub fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("params").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }
}
