//! Packet capture through tcpdump and a scoped scratch file
//!
//! The capture file lives in a `NamedTempFile`, so it is unlinked when this
//! function returns on any path, including errors and cancellation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::{capture_command, capture_read_command};
use crate::error::{PipelineError, PipelineResult};
use crate::parsers::tcpdump;
use crate::records::PacketCaptureRecord;
use crate::registry::{ExitPolicy, Operation};
use crate::runner::{CommandRunner, Deadline};
use crate::validation::PacketCaptureParams;

/// Raw captures larger than this are summarised but not attached.
pub const MAX_ATTACHED_PCAP_BYTES: u64 = 5 * 1024 * 1024;
/// Budget for reading the capture file back as text.
const READ_BACK_TIMEOUT: Duration = Duration::from_secs(30);

const OP: Operation = Operation::PacketCapture;

pub async fn capture(
    params: &PacketCaptureParams,
    policy: &ExitPolicy,
    runner: &dyn CommandRunner,
    deadline: Deadline,
    cancel: CancellationToken,
) -> PipelineResult<PacketCaptureRecord> {
    let scratch = tempfile::Builder::new()
        .prefix("netprobe-")
        .suffix(".pcap")
        .tempfile()
        .map_err(|e| PipelineError::failure(OP, format!("cannot create capture file: {e}")))?;
    let path = scratch.path();

    let cmd = capture_command(params, path);
    info!(interface = %params.interface, count = params.count, "starting capture");
    let outcome = runner.run(OP, &cmd, deadline, cancel.clone()).await?;
    outcome.check(OP, policy, &deadline)?;

    let read_deadline = Deadline::new(None, READ_BACK_TIMEOUT, READ_BACK_TIMEOUT);
    let listing = runner
        .run(OP, &capture_read_command(path), read_deadline, cancel)
        .await?;
    listing.check(OP, &ExitPolicy::STRICT, &read_deadline)?;

    let mut record = tcpdump::parse(params, &outcome.stderr, &listing.stdout);

    let pcap_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    record.pcap_bytes = pcap_bytes;
    if pcap_bytes <= MAX_ATTACHED_PCAP_BYTES {
        let raw = std::fs::read(path)
            .map_err(|e| PipelineError::failure(OP, format!("cannot read capture file: {e}")))?;
        record.pcap_gzip_base64 = Some(encode(&raw)?);
    } else {
        debug!(pcap_bytes, "capture too large to attach");
    }
    Ok(record)
}

/// gzip then base64.
pub fn encode(raw: &[u8]) -> PipelineResult<String> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(raw)
        .and_then(|_| gz.finish())
        .map(|bytes| STANDARD.encode(bytes))
        .map_err(|e| PipelineError::failure(OP, format!("cannot compress capture: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSpec;
    use crate::registry::Registry;
    use crate::request::{OperationRequest, PacketCaptureRequest};
    use crate::runner::ProcessOutcome;
    use crate::validation::{validate, ValidatedParams};
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Writes fake pcap bytes to the `-w` target and replays a listing.
    struct FakeTcpdump {
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl CommandRunner for FakeTcpdump {
        async fn run(
            &self,
            _operation: Operation,
            command: &CommandSpec,
            _deadline: Deadline,
            _cancel: CancellationToken,
        ) -> PipelineResult<ProcessOutcome> {
            let args = &command.args;
            if let Some(i) = args.iter().position(|a| a == "-w") {
                let path = PathBuf::from(&args[i + 1]);
                std::fs::write(&path, b"\xd4\xc3\xb2\xa1fake-pcap").unwrap();
                self.seen.lock().unwrap().push(path);
                let mut out = ProcessOutcome::exited(0, "", "1 packet captured\n");
                out.timed_out = true;
                return Ok(out);
            }
            Ok(ProcessOutcome::exited(
                0,
                "2024-05-01 10:00:00.000001 IP 10.0.0.1.53 > 10.0.0.2.40000: UDP, length 60\n",
                "",
            ))
        }
    }

    fn params() -> PacketCaptureParams {
        let req = OperationRequest::PacketCapture(PacketCaptureRequest {
            interface: Some("lo".into()),
            count: Some(10),
            duration: Some(2),
            ..Default::default()
        });
        match validate(&req).unwrap() {
            ValidatedParams::PacketCapture(p) => p,
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capture_attaches_payload_and_cleans_up() {
        let runner = FakeTcpdump { seen: Mutex::new(Vec::new()) };
        let registry = Registry::builtin();
        let def = registry.get(OP).unwrap();
        let deadline = Deadline::for_operation(def, Duration::from_secs(2));

        let r = capture(&params(), &def.exit_policy, &runner, deadline, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(r.packets_captured, 1);
        assert_eq!(r.packets.len(), 1);
        assert_eq!(r.pcap_bytes, 13);

        let gz = STANDARD.decode(r.pcap_gzip_base64.unwrap()).unwrap();
        let mut raw = Vec::new();
        GzDecoder::new(gz.as_slice()).read_to_end(&mut raw).unwrap();
        assert_eq!(raw, b"\xd4\xc3\xb2\xa1fake-pcap");

        let seen = runner.seen.lock().unwrap();
        assert!(!seen[0].exists(), "capture file was not removed");
    }

    #[tokio::test]
    async fn test_failed_capture_still_cleans_up() {
        struct Failing(Mutex<Option<PathBuf>>);

        #[async_trait]
        impl CommandRunner for Failing {
            async fn run(
                &self,
                _operation: Operation,
                command: &CommandSpec,
                _deadline: Deadline,
                _cancel: CancellationToken,
            ) -> PipelineResult<ProcessOutcome> {
                let i = command.args.iter().position(|a| a == "-w").unwrap();
                *self.0.lock().unwrap() = Some(PathBuf::from(&command.args[i + 1]));
                Ok(ProcessOutcome::exited(1, "", "tcpdump: lo: You don't have permission\n"))
            }
        }

        let runner = Failing(Mutex::new(None));
        let registry = Registry::builtin();
        let def = registry.get(OP).unwrap();
        let deadline = Deadline::for_operation(def, Duration::from_secs(2));
        let err = capture(&params(), &def.exit_policy, &runner, deadline, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("permission"));

        let path = runner.0.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
    }
}
