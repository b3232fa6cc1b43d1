//! Network operations that are not a single external command: the native
//! port probe and certificate inspection, and the two-step packet capture.

pub mod capture;
pub mod port_probe;
pub mod tls;

use tokio::time::Instant;

/// Milliseconds since `started`, rounded to microsecond precision.
fn elapsed_ms(started: Instant) -> f64 {
    crate::parsers::round3(started.elapsed().as_secs_f64() * 1000.0)
}
