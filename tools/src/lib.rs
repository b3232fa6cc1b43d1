//! netprobe tools: network diagnostic execution pipeline
//!
//! Each call is authorized, validated, turned into a fixed argument vector,
//! run under a deadline, parsed into a typed record, sanity-checked and
//! audited. Transports hand in an `OperationRequest` and get a `ToolResult`
//! back.

pub mod audit;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod net;
pub mod parsers;
pub mod platform;
pub mod rate;
pub mod records;
pub mod registry;
pub mod request;
pub mod runner;
pub mod sanity;
pub mod validation;

pub use audit::{AuditEvent, AuditLog, AuditSink};
pub use capabilities::{Authorizer, RolePolicy};
pub use error::{PipelineError, PipelineResult};
pub use executor::{CallContext, Executor, Stage, ToolResult};
pub use platform::Platform;
pub use records::ParsedRecord;
pub use registry::{Operation, Registry};
pub use request::OperationRequest;
pub use runner::{CommandRunner, Deadline, ProcessOutcome, ProcessRunner};
