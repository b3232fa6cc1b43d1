//! Port scan table parsing (`nmap` normal output)

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{PipelineError, PipelineResult};
use crate::records::{PortEntry, PortScanRecord};
use crate::registry::Operation;

// "22/tcp   open     ssh"
static PORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)/([a-z]+)\s+(\S+)(?:\s+(\S+))?").expect("port line regex is valid")
});

/// Collect every port row in the order the scanner printed it.
///
/// Duplicate rows are kept; deciding what to do about them is left to the
/// sanity stage.
pub fn parse(output: &str, host: &str) -> PipelineResult<PortScanRecord> {
    if !output.contains("Nmap") {
        return Err(PipelineError::parse(
            Operation::PortScan,
            "output is not a port scan report",
        ));
    }

    let ports = output
        .lines()
        .filter_map(|line| PORT_LINE.captures(line.trim_start()))
        .map(|c| PortEntry {
            // Overflowing numbers are kept visible as out-of-range
            port: c[1].parse().unwrap_or(u32::MAX),
            protocol: c[2].to_string(),
            state: c[3].to_string(),
            service: c.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
        .collect();

    Ok(PortScanRecord {
        host: host.to_string(),
        ports,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Starting Nmap 7.94 ( https://nmap.org ) at 2024-05-01 10:00 UTC
Nmap scan report for scanme.nmap.org (45.33.32.156)
Host is up (0.080s latency).
Not shown: 996 closed tcp ports (conn-refused)
PORT      STATE    SERVICE
22/tcp    open     ssh
80/tcp    open     http
9929/tcp  open     nping-echo
31337/tcp filtered Elite

Nmap done: 1 IP address (1 host up) scanned in 12.34 seconds
";

    #[test]
    fn test_port_rows() {
        let r = parse(REPORT, "scanme.nmap.org").unwrap();
        assert_eq!(r.ports.len(), 4);
        assert_eq!(r.ports[0].port, 22);
        assert_eq!(r.ports[0].protocol, "tcp");
        assert_eq!(r.ports[0].state, "open");
        assert_eq!(r.ports[0].service, "ssh");
        assert_eq!(r.ports[3].state, "filtered");
    }

    #[test]
    fn test_duplicates_are_preserved_in_order() {
        let text = "Nmap scan report for x\n80/tcp open http\n443/tcp open https\n80/tcp open http\n";
        let r = parse(text, "x").unwrap();
        let ports: Vec<u32> = r.ports.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![80, 443, 80]);
    }

    #[test]
    fn test_host_down_has_no_ports() {
        let text = "Starting Nmap 7.94\nNote: Host seems down.\nNmap done: 1 IP address (0 hosts up)\n";
        assert!(parse(text, "10.0.0.9").unwrap().ports.is_empty());
    }

    #[test]
    fn test_foreign_output_is_rejected() {
        assert_eq!(parse("segfault\n", "x").unwrap_err().kind(), "parse");
    }
}
