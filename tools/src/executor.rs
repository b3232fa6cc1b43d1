//! Tool execution pipeline
//!
//! Pipeline: authorize → validate → synthesize → execute (deadline) → parse → sanity check → audit
//!
//! Every failure is folded into a `ToolResult`; nothing escapes to the caller.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::capabilities::Authorizer;
use crate::command;
use crate::error::{PipelineError, PipelineResult};
use crate::net;
use crate::parsers;
use crate::platform::{self, BinaryProbe, Platform, SystemProbe};
use crate::records::ParsedRecord;
use crate::registry::{Availability, Operation, OperationDef, Registry};
use crate::request::OperationRequest;
use crate::runner::{CommandRunner, Deadline, ProcessRunner};
use crate::sanity;
use crate::validation::{self, ValidatedParams};

/// Where a run currently is. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authorizing,
    Validating,
    Synthesizing,
    Executing,
    Parsing,
    ValidatingOutput,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authorizing => "authorizing",
            Self::Validating => "validating",
            Self::Synthesizing => "synthesizing",
            Self::Executing => "executing",
            Self::Parsing => "parsing",
            Self::ValidatingOutput => "validating_output",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outward envelope for one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// RFC 3339, UTC
    pub timestamp: String,
}

impl ToolResult {
    fn completed(data: serde_json::Value, started: Instant) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
            timestamp: now_rfc3339(),
        }
    }

    fn failed(message: String, started: Instant) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            execution_time_ms: started.elapsed().as_millis() as u64,
            timestamp: now_rfc3339(),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Who is calling. Identity is resolved by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub request_id: String,
    pub user_id: String,
}

impl CallContext {
    /// Context with a fresh request id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
        }
    }
}

/// Stage bookkeeping for one run.
struct Run<'a> {
    ctx: &'a CallContext,
    operation: Operation,
    stage: Stage,
}

impl Run<'_> {
    fn advance(&mut self, next: Stage) {
        debug!(
            request_id = %self.ctx.request_id,
            operation = %self.operation,
            from = %self.stage,
            to = %next,
            "stage transition"
        );
        self.stage = next;
    }
}

/// Executes diagnostic operations through the full pipeline
pub struct Executor {
    registry: Registry,
    platform: Platform,
    probe: Arc<dyn BinaryProbe>,
    runner: Arc<dyn CommandRunner>,
    audit: Arc<dyn AuditSink>,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(
        platform: Platform,
        probe: Arc<dyn BinaryProbe>,
        runner: Arc<dyn CommandRunner>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry: Registry::builtin(),
            platform,
            probe,
            runner,
            audit,
            shutdown: CancellationToken::new(),
        }
    }

    /// Executor for the current host: PATH lookup and real processes.
    pub fn system(runner: ProcessRunner, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(
            Platform::current(),
            Arc::new(SystemProbe),
            Arc::new(runner),
            audit,
        )
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Which operations can run on this host.
    pub fn availability(&self) -> Vec<Availability> {
        self.registry.availability(self.platform, self.probe.as_ref())
    }

    /// Stop every in-flight run. Runs started afterwards are cancelled immediately.
    pub fn shutdown(&self) {
        info!("cancelling in-flight diagnostic runs");
        self.shutdown.cancel();
    }

    /// Run a call given by operation name and raw JSON parameters.
    ///
    /// Names outside the catalog are rejected without an audit event since
    /// there is no operation to attribute them to.
    pub async fn execute_named(
        &self,
        ctx: &CallContext,
        operation: &str,
        params: serde_json::Value,
        authorizer: &dyn Authorizer,
    ) -> ToolResult {
        let started = Instant::now();
        let Some(op) = Operation::from_name(operation) else {
            warn!(request_id = %ctx.request_id, operation, "unknown operation");
            return ToolResult::failed(
                PipelineError::validation("operation", format!("unknown operation '{operation}'"))
                    .to_string(),
                started,
            );
        };
        let request = OperationRequest::from_parts(operation, params.clone());
        self.run(ctx, op, request, params, authorizer, started).await
    }

    /// Run one decoded request through the pipeline.
    pub async fn execute(
        &self,
        ctx: &CallContext,
        request: OperationRequest,
        authorizer: &dyn Authorizer,
    ) -> ToolResult {
        let started = Instant::now();
        let op = request.operation();
        let parameters = request.parameters();
        self.run(ctx, op, Ok(request), parameters, authorizer, started)
            .await
    }

    async fn run(
        &self,
        ctx: &CallContext,
        operation: Operation,
        request: PipelineResult<OperationRequest>,
        parameters: serde_json::Value,
        authorizer: &dyn Authorizer,
        started: Instant,
    ) -> ToolResult {
        let mut run = Run {
            ctx,
            operation,
            stage: Stage::Authorizing,
        };
        info!(request_id = %ctx.request_id, user = %ctx.user_id, %operation, "executing");

        let outcome = self.pipeline(&mut run, request, authorizer).await;

        let result = match outcome {
            Ok(data) => {
                run.advance(Stage::Completed);
                ToolResult::completed(data, started)
            }
            Err(e) => {
                error!(
                    request_id = %ctx.request_id,
                    %operation,
                    stage = %run.stage,
                    kind = e.kind(),
                    "{e}"
                );
                run.advance(Stage::Failed);
                ToolResult::failed(e.to_string(), started)
            }
        };
        info!(
            request_id = %ctx.request_id,
            %operation,
            success = result.success,
            execution_time_ms = result.execution_time_ms,
            "completed"
        );

        self.audit.record(AuditEvent {
            request_id: ctx.request_id.clone(),
            user_id: ctx.user_id.clone(),
            operation,
            parameters,
            success: result.success,
            duration_ms: result.execution_time_ms,
            error: result.error.clone(),
            timestamp: Utc::now(),
        });
        result
    }

    async fn pipeline(
        &self,
        run: &mut Run<'_>,
        request: PipelineResult<OperationRequest>,
        authorizer: &dyn Authorizer,
    ) -> PipelineResult<serde_json::Value> {
        let operation = run.operation;

        let permission = operation.permission();
        if !authorizer.can_perform(permission) {
            warn!(
                target: "security",
                request_id = %run.ctx.request_id,
                user = %run.ctx.user_id,
                %operation,
                permission,
                "permission denied"
            );
            return Err(PipelineError::PermissionDenied {
                operation,
                permission,
            });
        }

        run.advance(Stage::Validating);
        let params = validation::validate(&request?).map_err(PipelineError::Validation)?;
        let def = self
            .registry
            .get(operation)
            .ok_or_else(|| PipelineError::failure(operation, "operation is not registered"))?;
        let deadline = Deadline::for_operation(def, params.requested_timeout());
        let cancel = self.shutdown.child_token();

        let record = self.dispatch(run, &params, def, deadline, cancel).await?;

        run.advance(Stage::ValidatingOutput);
        let warnings = sanity::check(&record, Utc::now()).into_result(&record)?;
        for warning in &warnings {
            warn!(request_id = %run.ctx.request_id, %operation, "sanity: {warning}");
        }

        serde_json::to_value(&record).map_err(|e| PipelineError::parse(operation, e.to_string()))
    }

    /// Produce the typed record for validated parameters.
    async fn dispatch(
        &self,
        run: &mut Run<'_>,
        params: &ValidatedParams,
        def: &OperationDef,
        deadline: Deadline,
        cancel: CancellationToken,
    ) -> PipelineResult<ParsedRecord> {
        let operation = run.operation;
        match params {
            ValidatedParams::PortProbe(p) => {
                run.advance(Stage::Executing);
                net::port_probe::probe(p, deadline, cancel)
                    .await
                    .map(ParsedRecord::PortProbe)
            }
            ValidatedParams::TlsCertificate(p) => {
                run.advance(Stage::Executing);
                net::tls::inspect(p, deadline, cancel)
                    .await
                    .map(ParsedRecord::Certificate)
            }
            ValidatedParams::PacketCapture(p) => {
                run.advance(Stage::Synthesizing);
                platform::select_binary(operation, self.platform, self.probe.as_ref())?;
                run.advance(Stage::Executing);
                net::capture::capture(p, &def.exit_policy, self.runner.as_ref(), deadline, cancel)
                    .await
                    .map(ParsedRecord::PacketCapture)
            }
            _ => {
                run.advance(Stage::Synthesizing);
                let binary = platform::select_binary(operation, self.platform, self.probe.as_ref())?
                    .ok_or_else(|| PipelineError::failure(operation, "no program serves this operation"))?;
                let cmd = command::synthesize(params, self.platform, binary)?;
                debug!(request_id = %run.ctx.request_id, %cmd, "command synthesized");

                run.advance(Stage::Executing);
                let outcome = self.runner.run(operation, &cmd, deadline, cancel).await?;
                outcome.check(operation, &def.exit_policy, &deadline)?;
                if outcome.truncated {
                    warn!(request_id = %run.ctx.request_id, %operation, "parsing truncated output");
                }

                run.advance(Stage::Parsing);
                parsers::parse(params, self.platform, binary, &outcome.stdout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::command::CommandSpec;
    use crate::platform::StaticProbe;
    use crate::request::PingRequest;
    use crate::runner::ProcessOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Replay {
        stdout: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for Replay {
        async fn run(
            &self,
            _operation: Operation,
            _command: &CommandSpec,
            _deadline: Deadline,
            _cancel: CancellationToken,
        ) -> PipelineResult<ProcessOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessOutcome::exited(0, self.stdout, ""))
        }
    }

    const PING_OUTPUT: &str = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.\n\
--- 8.8.8.8 ping statistics ---\n\
4 packets transmitted, 4 received, 0% packet loss, time 3004ms\n\
rtt min/avg/max/mdev = 10.512/11.090/11.754/0.498 ms\n";

    fn executor(stdout: &'static str) -> (Executor, Arc<Replay>, Arc<AuditLog>) {
        let runner = Arc::new(Replay {
            stdout,
            calls: AtomicUsize::new(0),
        });
        let audit = Arc::new(AuditLog::default());
        let exec = Executor::new(
            Platform::Linux,
            Arc::new(StaticProbe::new(&["ping"])),
            runner.clone(),
            audit.clone(),
        );
        (exec, runner, audit)
    }

    fn ping(host: &str) -> OperationRequest {
        OperationRequest::Ping(PingRequest {
            host: Some(host.into()),
            count: Some(4),
            timeout: None,
        })
    }

    #[tokio::test]
    async fn test_successful_run_produces_envelope() {
        let (exec, _, audit) = executor(PING_OUTPUT);
        let allow_all = |_: &str| true;
        let result = exec.execute(&CallContext::new("alice"), ping("8.8.8.8"), &allow_all).await;

        assert!(result.success, "{:?}", result.error);
        let data = result.data.unwrap();
        assert_eq!(data["packetsReceived"], 4);
        assert!(result.timestamp.ends_with('Z'));

        let events = audit.recent(1);
        assert_eq!(events[0].event.user_id, "alice");
        assert!(events[0].event.success);
    }

    #[tokio::test]
    async fn test_denied_call_never_runs() {
        let (exec, runner, audit) = executor(PING_OUTPUT);
        let deny = |_: &str| false;
        let result = exec.execute(&CallContext::new("bob"), ping("8.8.8.8"), &deny).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("net.ping"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(!audit.recent(1)[0].event.success);
    }

    #[tokio::test]
    async fn test_unknown_operation_name() {
        let (exec, _, audit) = executor(PING_OUTPUT);
        let allow_all = |_: &str| true;
        let result = exec
            .execute_named(&CallContext::new("alice"), "rm", serde_json::json!({}), &allow_all)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown operation"));
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_params_are_validation_failures() {
        let (exec, runner, audit) = executor(PING_OUTPUT);
        let allow_all = |_: &str| true;
        let result = exec
            .execute_named(
                &CallContext::new("alice"),
                "ping",
                serde_json::json!({ "host": 42 }),
                &allow_all,
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("invalid input"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(audit.recent(1)[0].event.parameters["host"], 42);
    }

    #[tokio::test]
    async fn test_shutdown_is_inherited_by_runs() {
        let (exec, _, _) = executor(PING_OUTPUT);
        exec.shutdown();
        assert!(exec.shutdown.child_token().is_cancelled());
    }

    #[test]
    fn test_envelope_shape() {
        let r = ToolResult::failed("boom".into(), Instant::now());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "boom");
        assert!(v.get("data").is_none());
        assert!(v.get("executionTimeMs").is_some());
        assert!(v.get("timestamp").is_some());
    }
}
