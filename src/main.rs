#![forbid(unsafe_code)]

//! `gauntlet-orchestrator` runs one configured test against a device pool.
//!
//! Loads configuration, builds the local device pool, then drives the test
//! through every requested pass and exits with a status reflecting the
//! verdict.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use gauntlet_orchestrator::config::GlobalConfig;
use gauntlet_orchestrator::device::local::LocalDevice;
use gauntlet_orchestrator::device::pool::StaticDevicePool;
use gauntlet_orchestrator::device::Device;
use gauntlet_orchestrator::log_summary::parser::LogParser;
use gauntlet_orchestrator::models::result::TestResult;
use gauntlet_orchestrator::orchestrator::{ArtifactPathRegistry, Executor, TestContext, TestNode};
use gauntlet_orchestrator::registry::TestRegistry;
use gauntlet_orchestrator::report::{JsonReportWriter, LogReportSink};
use gauntlet_orchestrator::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "gauntlet-orchestrator", about = "Multi-role device test runner", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run this registered test instead of the configured one.
    #[arg(long)]
    test: Option<String>,

    /// Number of passes to run.
    #[arg(long, default_value_t = 1)]
    passes: u32,

    /// Override the configured artifact root.
    #[arg(long)]
    artifact_root: Option<PathBuf>,

    /// List registered tests and exit.
    #[arg(long)]
    list_tests: bool,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }
    info!("gauntlet-orchestrator bootstrap");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(TestResult::Passed) => ExitCode::SUCCESS,
        Ok(result) => {
            warn!(%result, "test did not pass");
            ExitCode::from(exit_status(result))
        }
        Err(err) => {
            error!(%err, "run aborted");
            ExitCode::from(3)
        }
    }
}

fn exit_status(result: TestResult) -> u8 {
    match result {
        TestResult::Passed => 0,
        TestResult::TimedOut => 2,
        TestResult::Cancelled => 130,
        _ => 1,
    }
}

async fn run(args: Cli) -> Result<TestResult> {
    let registry = TestRegistry::with_builtin_tests();
    if args.list_tests {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(TestResult::Passed);
    }

    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(root) = args.artifact_root {
        std::fs::create_dir_all(&root)
            .map_err(|err| AppError::Config(format!("invalid artifact root override: {err}")))?;
        config.artifact_root = root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid artifact root override: {err}")))?;
    }
    if let Some(test) = args.test {
        config.test.name = test;
    }
    if args.passes == 0 {
        return Err(AppError::Config("passes must be at least 1".into()));
    }
    info!(test = config.test.name, passes = args.passes, "configuration loaded");

    // ── Build collaborators ─────────────────────────────
    let devices: Vec<Arc<dyn Device>> = config
        .devices
        .iter()
        .map(|device| {
            let mut local = LocalDevice::new(
                device.name.clone(),
                device.platform.clone(),
                config.device_sandbox(device),
            )
            .with_constraint(device.constraint.clone());
            if let Some(address) = &device.address {
                local = local.with_address(address.clone());
            }
            Arc::new(local) as Arc<dyn Device>
        })
        .collect();
    info!(devices = devices.len(), "device pool ready");

    let summarizer = Arc::new(LogParser::from_markers(&config.log_markers)?);
    let report_writer = Arc::new(JsonReportWriter::new(
        config.report.file_name.clone(),
        config.report.history_dir.clone(),
    )?);
    let definition = registry.create(&config.test.name)?;

    let cancel = CancellationToken::new();
    let context = TestContext {
        pool: Arc::new(StaticDevicePool::new(devices)),
        summarizer,
        report_sink: report_writer,
        fallback_sink: Arc::new(LogReportSink),
        artifact_paths: Arc::new(ArtifactPathRegistry::new()),
        artifact_root: config.artifact_root.clone(),
        cancel: cancel.clone(),
    };

    let signal_cancel = cancel.clone();
    let signal_handle = tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("shutdown signal received");
                signal_cancel.cancel();
            }
            () = signal_cancel.cancelled() => {}
        }
    });

    // ── Run ─────────────────────────────────────────────
    let executor = Executor::new(
        config.tick_interval(),
        config.test.reservation_attempts,
        config.test.reservation_retry_delay(),
        cancel.clone(),
    );
    let mut node = TestNode::new(config.test.clone(), definition, context);
    let outcome = executor.run(&mut node, args.passes).await;

    cancel.cancel();
    let _ = signal_handle.await;

    let summary = outcome?;
    let result = summary.overall(args.passes);
    for pass in &summary.passes {
        info!(pass = pass.pass, result = %pass.result, retries = pass.retries, "pass verdict");
    }
    info!(%result, "gauntlet-orchestrator finished");
    Ok(result)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
