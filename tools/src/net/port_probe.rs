//! Single-port TCP reachability, done natively with tokio

use std::io::ErrorKind;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::records::PortProbeRecord;
use crate::registry::Operation;
use crate::runner::Deadline;
use crate::validation::PortProbeParams;

/// Try every resolved address until one accepts or the deadline passes.
///
/// Refused and silent ports are results, not failures. Only name
/// resolution problems and cancellation are errors.
pub async fn probe(
    params: &PortProbeParams,
    deadline: Deadline,
    cancel: CancellationToken,
) -> PipelineResult<PortProbeRecord> {
    let op = Operation::PortProbe;
    let host = params.host.as_str();
    let mut record = PortProbeRecord {
        host: host.to_string(),
        port: params.port,
        ..Default::default()
    };

    let expires = deadline.expires_at();
    let addrs: Vec<_> = tokio::select! {
        r = timeout_at(expires, lookup_host((host, params.port))) => match r {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => return Err(PipelineError::failure(op, format!("cannot resolve {host}: {e}"))),
            Err(_) => return Err(PipelineError::ExecutionTimeout { operation: op, after: deadline.timeout() }),
        },
        _ = cancel.cancelled() => return Err(PipelineError::failure(op, "run was cancelled")),
    };
    if addrs.is_empty() {
        return Err(PipelineError::failure(op, format!("{host} has no addresses")));
    }

    let mut last_error = None;
    for addr in addrs {
        let started = Instant::now();
        let attempt = tokio::select! {
            r = timeout_at(expires, TcpStream::connect(addr)) => r,
            _ = cancel.cancelled() => return Err(PipelineError::failure(op, "run was cancelled")),
        };
        match attempt {
            Ok(Ok(_stream)) => {
                record.open = true;
                record.connect_ms = Some(super::elapsed_ms(started));
                record.error = None;
                debug!(%addr, "port open");
                return Ok(record);
            }
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "connect failed");
                last_error = Some(match e.kind() {
                    ErrorKind::ConnectionRefused => "connection refused".to_string(),
                    _ => e.to_string(),
                });
            }
            Err(_) => {
                last_error = Some(format!("no response within {}s", deadline.timeout().as_secs()));
                break;
            }
        }
    }

    record.error = last_error;
    Ok(record)
}
