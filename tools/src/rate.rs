//! Scan-rate planning for bulk port scans

use serde::Serialize;

/// Slowest rate the planner will choose, in probes per second.
pub const MIN_RATE: u64 = 10;
/// Fastest rate the planner will choose, in probes per second.
pub const MAX_RATE: u64 = 100;
/// Share of the deadline the scan is planned to fit in.
const DEADLINE_SHARE: f64 = 0.8;

/// Probe rate embedded into a scan invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanRate {
    /// Probes per second
    pub rate: f64,
    /// Caller-supplied inter-probe delay, when one was given
    pub delay_ms: Option<u32>,
}

/// Seconds a scan may spend on the target before the tool gives up on its
/// own, leaving the rest of `deadline_secs` for output to drain.
pub fn scan_budget_secs(deadline_secs: u32) -> u32 {
    ((DEADLINE_SHARE * f64::from(deadline_secs)).floor() as u32).max(1)
}

/// Derive a probe rate for scanning `port_count` ports within `deadline_secs`.
///
/// A caller-supplied delay is honored exactly. Otherwise the rate is sized
/// so the scan fits in 80% of the deadline, clamped to `[MIN_RATE, MAX_RATE]`.
pub fn plan_scan_rate(port_count: usize, deadline_secs: u32, delay_ms: Option<u32>) -> ScanRate {
    if let Some(delay) = delay_ms.filter(|d| *d > 0) {
        return ScanRate {
            rate: 1000.0 / f64::from(delay),
            delay_ms: Some(delay),
        };
    }

    let budget = DEADLINE_SHARE * f64::from(deadline_secs.max(1));
    let needed = (port_count as f64 / budget).ceil() as u64;
    ScanRate {
        rate: needed.clamp(MIN_RATE, MAX_RATE) as f64,
        delay_ms: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_budget_leaves_headroom() {
        assert_eq!(scan_budget_secs(60), 48);
        assert_eq!(scan_budget_secs(1), 1);
        assert_eq!(scan_budget_secs(300), 240);
    }

    #[test]
    fn test_thousand_ports_in_a_minute() {
        let plan = plan_scan_rate(1000, 60, None);
        assert_eq!(plan.rate, 21.0);
        assert_eq!(plan.delay_ms, None);
    }

    #[test]
    fn test_rate_is_clamped() {
        assert_eq!(plan_scan_rate(5, 300, None).rate, MIN_RATE as f64);
        assert_eq!(plan_scan_rate(65_535, 10, None).rate, MAX_RATE as f64);
        assert_eq!(plan_scan_rate(0, 60, None).rate, MIN_RATE as f64);
    }

    #[test]
    fn test_computed_rate_always_in_bounds() {
        for ports in [1usize, 10, 100, 1000, 10_000, 65_535] {
            for secs in [1u32, 10, 60, 300, 600] {
                let r = plan_scan_rate(ports, secs, None).rate;
                assert!((MIN_RATE as f64..=MAX_RATE as f64).contains(&r), "{ports}/{secs} -> {r}");
            }
        }
    }

    #[test]
    fn test_caller_delay_is_honored_exactly() {
        let plan = plan_scan_rate(1000, 60, Some(250));
        assert_eq!(plan.rate, 4.0);
        assert_eq!(plan.delay_ms, Some(250));

        // Outside the clamp on purpose: an explicit throttle wins.
        assert_eq!(plan_scan_rate(1000, 60, Some(1)).rate, 1000.0);
    }
}
