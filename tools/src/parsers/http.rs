//! HTTP probe parsing
//!
//! curl is run with `-D -` so stdout carries one header block per response
//! (several when redirects are followed), then a single metrics line written
//! by `-w` and prefixed with [`HTTP_METRICS_MARKER`].

use std::collections::BTreeMap;

use super::round3;
use crate::command::HTTP_METRICS_MARKER;
use crate::error::{PipelineError, PipelineResult};
use crate::records::{HttpProbeRecord, HttpTimings};
use crate::registry::Operation;

/// Number of values curl writes after the marker.
const METRIC_FIELDS: usize = 9;

pub fn parse(output: &str, url: &str, method: &str) -> PipelineResult<HttpProbeRecord> {
    let metrics_line = output
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(HTTP_METRICS_MARKER))
        .ok_or_else(|| PipelineError::parse(Operation::HttpProbe, "metrics line missing"))?;

    let metrics: Vec<&str> = metrics_line.split_whitespace().collect();
    if metrics.len() < METRIC_FIELDS - 1 {
        return Err(PipelineError::parse(
            Operation::HttpProbe,
            format!("expected {METRIC_FIELDS} metrics, got {}", metrics.len()),
        ));
    }
    let secs = |i: usize| round3(metrics[i].parse::<f64>().unwrap_or(0.0) * 1000.0);

    let (http_version, headers) = last_header_block(output);

    Ok(HttpProbeRecord {
        url: url.to_string(),
        method: method.to_string(),
        status_code: metrics[0].parse().unwrap_or(0),
        http_version,
        // url_effective is empty when curl never connected
        final_url: metrics
            .get(8)
            .map(|s| s.to_string())
            .unwrap_or_else(|| url.to_string()),
        headers,
        redirect_count: metrics[7].parse().unwrap_or(0),
        timings: HttpTimings {
            dns_ms: secs(1),
            connect_ms: secs(2),
            tls_ms: secs(3),
            first_byte_ms: secs(4),
            total_ms: secs(5),
        },
        size_download: metrics[6].parse::<f64>().map(|v| v as u64).unwrap_or(0),
    })
}

/// Status-line version and headers of the final response.
fn last_header_block(output: &str) -> (Option<String>, BTreeMap<String, String>) {
    let mut version = None;
    let mut headers: BTreeMap<String, String> = BTreeMap::new();

    for line in output.lines().map(|l| l.trim_end_matches('\r')) {
        if line.starts_with(HTTP_METRICS_MARKER) {
            break;
        }
        if let Some(status) = line.strip_prefix("HTTP/") {
            // A new response starts; earlier ones were redirects
            version = status.split_whitespace().next().map(str::to_string);
            headers.clear();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() || name.contains(' ') {
                continue;
            }
            let value = value.trim();
            headers
                .entry(name)
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    (version, headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        format!(
            "HTTP/1.1 301 Moved Permanently\r\n\
             Location: https://example.com/\r\n\
             \r\n\
             HTTP/2 200\r\n\
             content-type: text/html\r\n\
             set-cookie: a=1\r\n\
             set-cookie: b=2\r\n\
             \r\n\
             \n{HTTP_METRICS_MARKER} 200 0.012 0.030 0.081 0.120 0.125 1256 1 https://example.com/\n"
        )
    }

    #[test]
    fn test_last_response_wins() {
        let r = parse(&sample(), "http://example.com", "GET").unwrap();
        assert_eq!(r.status_code, 200);
        assert_eq!(r.http_version.as_deref(), Some("2"));
        assert_eq!(r.final_url, "https://example.com/");
        assert_eq!(r.redirect_count, 1);
        assert!(!r.headers.contains_key("location"));
        assert_eq!(r.headers["content-type"], "text/html");
        assert_eq!(r.headers["set-cookie"], "a=1, b=2");
    }

    #[test]
    fn test_timings_in_milliseconds() {
        let r = parse(&sample(), "http://example.com", "GET").unwrap();
        assert_eq!(r.timings.dns_ms, 12.0);
        assert_eq!(r.timings.connect_ms, 30.0);
        assert_eq!(r.timings.tls_ms, 81.0);
        assert_eq!(r.timings.first_byte_ms, 120.0);
        assert_eq!(r.timings.total_ms, 125.0);
        assert_eq!(r.size_download, 1256);
    }

    #[test]
    fn test_missing_metrics_is_a_parse_error() {
        let err = parse("HTTP/1.1 200 OK\r\n\r\n", "http://x", "GET").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }
}
