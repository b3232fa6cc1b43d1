//! netprobe-tools: run one network diagnostic from the command line
//!
//! Prints the `ToolResult` envelope as JSON. Exit status is non-zero when
//! the run failed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use netprobe_tools::config::{load_config, LoggingConfig};
use netprobe_tools::{CallContext, Executor, ProcessRunner};

#[derive(Parser, Debug)]
#[command(name = "netprobe-tools", version, about = "Network diagnostic tool execution pipeline")]
struct Cli {
    /// Config file (defaults to $NETPROBE_CONFIG or /etc/netprobe/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one operation and print the result envelope
    Run {
        /// Operation name, e.g. ping or dns_lookup
        operation: String,
        /// Parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long, default_value = "operator")]
        role: String,
    },
    /// List operations and whether they can run on this host
    List,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_env("NETPROBE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.with_target(false).compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);

    let audit = Arc::new(config.audit_log());
    let executor = Executor::system(ProcessRunner::new(config.runner_limits()), audit);
    info!(platform = %executor.platform(), "netprobe-tools starting");

    match cli.command {
        Command::List => {
            let listing: Vec<serde_json::Value> = executor
                .availability()
                .into_iter()
                .filter_map(|a| {
                    let def = executor.registry().get(a.operation)?;
                    Some(serde_json::json!({
                        "operation": a.operation,
                        "permission": a.operation.permission(),
                        "description": def.description,
                        "riskLevel": def.risk_level,
                        "enabled": a.enabled,
                        "binary": a.binary,
                        "reason": a.reason,
                    }))
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Command::Run {
            operation,
            params,
            user,
            role,
        } => {
            let params: serde_json::Value =
                serde_json::from_str(&params).context("params must be a JSON object")?;
            let authorizer = config.role_policy().authorizer_for(&role);
            let ctx = CallContext::new(user);

            let run = executor.execute_named(&ctx, &operation, params, &authorizer);
            tokio::pin!(run);
            let result = tokio::select! {
                result = &mut run => result,
                _ = tokio::signal::ctrl_c() => {
                    // The runner interrupts the tool and the run still yields an envelope.
                    executor.shutdown();
                    run.await
                }
            };

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
