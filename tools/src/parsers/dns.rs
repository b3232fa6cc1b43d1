//! Name resolution parsing for `dig` and `nslookup`

use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::error::{PipelineError, PipelineResult};
use crate::records::{DnsAnswer, DnsRecord, ReverseDnsRecord};
use crate::registry::Operation;

const ANSWER_MARKER: &str = ";; ANSWER SECTION:";
const HEADER_MARKER: &str = "->>HEADER<<-";

// ";; SERVER: 8.8.8.8#53(8.8.8.8) (UDP)"
static DIG_SERVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";; SERVER: ([^#\s]+)").expect("dig server regex is valid"));

// "Server:\t\t8.8.8.8"
static NSLOOKUP_SERVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Server:\s*(\S+)").expect("nslookup server regex is valid"));

// "example.com\tmail exchanger = 10 mail.example.com."
static NSLOOKUP_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(.+?)\s*=\s*(.+)$").expect("nslookup assignment regex is valid")
});

/// Lines between the answer marker and the next blank line.
fn answer_section(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .skip_while(|l| !l.starts_with(ANSWER_MARKER))
        .skip(1)
        .take_while(|l| !l.trim().is_empty())
}

fn split_answer(line: &str) -> Option<DnsAnswer> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?;
    let ttl = fields.next()?;
    let class = fields.next()?;
    let record_type = fields.next()?;
    let value = fields.collect::<Vec<_>>().join(" ");
    Some(DnsAnswer {
        name: name.trim_end_matches('.').to_string(),
        ttl: ttl.parse().ok(),
        class: class.to_string(),
        record_type: record_type.to_string(),
        value,
    })
}

fn require_dig_output(output: &str, operation: Operation) -> PipelineResult<()> {
    if output.contains(HEADER_MARKER) || output.contains(ANSWER_MARKER) {
        Ok(())
    } else {
        Err(PipelineError::parse(operation, "output is not a dig response"))
    }
}

pub fn parse_dig(output: &str, query: &str, record_type: &str) -> PipelineResult<DnsRecord> {
    require_dig_output(output, Operation::DnsLookup)?;
    Ok(DnsRecord {
        query: query.to_string(),
        record_type: record_type.to_string(),
        server: super::capture(&DIG_SERVER, output),
        resolver: "dig".into(),
        answers: answer_section(output).filter_map(split_answer).collect(),
    })
}

pub fn parse_nslookup(output: &str, query: &str, record_type: &str) -> PipelineResult<DnsRecord> {
    let server: Option<String> = super::capture(&NSLOOKUP_SERVER, output);
    let answers = nslookup_answers(output, record_type);
    if server.is_none() && answers.is_empty() {
        return Err(PipelineError::parse(
            Operation::DnsLookup,
            "output is not an nslookup response",
        ));
    }
    Ok(DnsRecord {
        query: query.to_string(),
        record_type: record_type.to_string(),
        server,
        resolver: "nslookup".into(),
        answers,
    })
}

/// Answers after the server preamble, which ends at the first blank line.
fn nslookup_answers(output: &str, record_type: &str) -> Vec<DnsAnswer> {
    let mut answers = Vec::new();
    let mut name = String::new();

    let body = output
        .lines()
        .skip_while(|l| !l.trim().is_empty())
        .map(str::trim)
        .filter(|l| !l.is_empty());

    for line in body {
        if let Some(n) = line.strip_prefix("Name:") {
            name = n.trim().trim_end_matches('.').to_string();
        } else if let Some(addr) = line
            .strip_prefix("Addresses:")
            .or_else(|| line.strip_prefix("Address:"))
            .map(str::trim)
        {
            let kind = if addr.contains(':') { "AAAA" } else { "A" };
            answers.push(DnsAnswer {
                name: name.clone(),
                ttl: None,
                class: "IN".into(),
                record_type: kind.into(),
                value: addr.to_string(),
            });
        } else if let Some(c) = NSLOOKUP_ASSIGN.captures(line) {
            let kind = if c[2].contains("canonical name") {
                "CNAME"
            } else {
                record_type
            };
            answers.push(DnsAnswer {
                name: c[1].trim_end_matches('.').to_string(),
                ttl: None,
                class: "IN".into(),
                record_type: kind.into(),
                value: c[3].trim().to_string(),
            });
        }
    }
    answers
}

pub fn parse_dig_reverse(output: &str, ip: IpAddr) -> PipelineResult<ReverseDnsRecord> {
    require_dig_output(output, Operation::ReverseDns)?;
    let hostnames = answer_section(output)
        .filter_map(split_answer)
        .filter(|a| a.record_type == "PTR")
        .map(|a| a.value.trim_end_matches('.').to_string())
        .collect();
    Ok(ReverseDnsRecord {
        ip: ip.to_string(),
        hostnames,
        resolver: "dig".into(),
    })
}

pub fn parse_nslookup_reverse(output: &str, ip: IpAddr) -> PipelineResult<ReverseDnsRecord> {
    let hostnames: Vec<String> = output
        .lines()
        .filter_map(|l| l.split_once("name = "))
        .map(|(_, name)| name.trim().trim_end_matches('.').to_string())
        .collect();
    if hostnames.is_empty() && !NSLOOKUP_SERVER.is_match(output) {
        return Err(PipelineError::parse(
            Operation::ReverseDns,
            "output is not an nslookup response",
        ));
    }
    Ok(ReverseDnsRecord {
        ip: ip.to_string(),
        hostnames,
        resolver: "nslookup".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIG: &str = "\
; <<>> DiG 9.18.18 <<>> +time=10 +tries=1 example.com A
;; global options: +cmd
;; Got answer:
;; ->>HEADER<<- opcode: QUERY, status: NOERROR, id: 4242
;; flags: qr rd ra; QUERY: 1, ANSWER: 2, AUTHORITY: 0, ADDITIONAL: 1

;; QUESTION SECTION:
;example.com.\t\t\tIN\tA

;; ANSWER SECTION:
example.com.\t\t3600\tIN\tA\t93.184.216.34
example.com.\t\t3600\tIN\tA\t93.184.216.35

;; Query time: 12 msec
;; SERVER: 8.8.8.8#53(8.8.8.8) (UDP)
";

    #[test]
    fn test_dig_answers() {
        let r = parse_dig(DIG, "example.com", "A").unwrap();
        assert_eq!(r.server.as_deref(), Some("8.8.8.8"));
        assert_eq!(r.answers.len(), 2);
        let a = &r.answers[0];
        assert_eq!(a.name, "example.com");
        assert_eq!(a.ttl, Some(3600));
        assert_eq!(a.class, "IN");
        assert_eq!(a.record_type, "A");
        assert_eq!(a.value, "93.184.216.34");
    }

    #[test]
    fn test_dig_multiword_value() {
        let text = ";; ANSWER SECTION:\nexample.com. 300 IN MX 10 mail.example.com.\n\n";
        let r = parse_dig(text, "example.com", "MX").unwrap();
        assert_eq!(r.answers[0].value, "10 mail.example.com.");
    }

    #[test]
    fn test_dig_nxdomain_has_no_answers() {
        let text = ";; ->>HEADER<<- opcode: QUERY, status: NXDOMAIN, id: 1\n";
        assert!(parse_dig(text, "nope.invalid", "A").unwrap().answers.is_empty());
    }

    #[test]
    fn test_nslookup_addresses() {
        let text = "\
Server:\t\t1.1.1.1
Address:\t1.1.1.1#53

Non-authoritative answer:
Name:\texample.com
Address: 93.184.216.34
Name:\texample.com
Address: 2606:2800:220:1:248:1893:25c8:1946
";
        let r = parse_nslookup(text, "example.com", "A").unwrap();
        assert_eq!(r.server.as_deref(), Some("1.1.1.1"));
        assert_eq!(r.answers.len(), 2);
        assert_eq!(r.answers[0].value, "93.184.216.34");
        assert_eq!(r.answers[1].record_type, "AAAA");
        assert_eq!(r.answers[1].name, "example.com");
    }

    #[test]
    fn test_nslookup_typed_answers() {
        let text = "\
Server:\t\t1.1.1.1
Address:\t1.1.1.1#53

Non-authoritative answer:
www.example.com\tcanonical name = example.com.
example.com\tmail exchanger = 10 mail.example.com.
";
        let r = parse_nslookup(text, "www.example.com", "MX").unwrap();
        assert_eq!(r.answers[0].record_type, "CNAME");
        assert_eq!(r.answers[1].record_type, "MX");
        assert_eq!(r.answers[1].value, "10 mail.example.com.");
    }

    #[test]
    fn test_reverse_lookups() {
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let dig = ";; ANSWER SECTION:\n8.8.8.8.in-addr.arpa. 6986 IN PTR dns.google.\n\n";
        assert_eq!(parse_dig_reverse(dig, ip).unwrap().hostnames, vec!["dns.google"]);

        let ns = "Server:\t\t1.1.1.1\nAddress:\t1.1.1.1#53\n\n8.8.8.8.in-addr.arpa\tname = dns.google.\n";
        assert_eq!(parse_nslookup_reverse(ns, ip).unwrap().hostnames, vec!["dns.google"]);
    }

    #[test]
    fn test_foreign_output_is_rejected() {
        assert_eq!(parse_dig("oops\n", "x", "A").unwrap_err().kind(), "parse");
        assert_eq!(parse_nslookup("oops\n", "x", "A").unwrap_err().kind(), "parse");
    }
}
