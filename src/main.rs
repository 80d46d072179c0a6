//! pcapflow CLI entry point.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pcapflow::cli::{list_components, Args};
use pcapflow_core::pipeline::{ErrorReporter, Parser as PipelineParser};
use pcapflow_core::builtin_registry;

/// How long blocking readers (e.g. stdin) may hold up process exit.
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging; records go to stdout, so logs go to stderr
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let registry = builtin_registry(&args.component_config());

    // Handle info-only commands
    if args.list_components {
        list_components(&registry, &mut io::stdout())?;
        return Ok(());
    }

    let input = args
        .input
        .as_deref()
        .context("an input pipeline is required. Use --help for usage.")?;
    if args.outputs.is_empty() {
        bail!("at least one --output pipeline is required");
    }

    let flow = PipelineParser::new(&registry)
        .parse_flow(input, &args.outputs, args.flow_config())
        .context("invalid pipeline")?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_interrupts(cancel.clone()));

    let (errors, mut error_rx) = ErrorReporter::channel();
    let run = flow.run(cancel, errors);
    tokio::pin!(run);

    let mut failures = 0u64;
    let stats = loop {
        tokio::select! {
            stats = &mut run => break stats,
            Some(e) = error_rx.recv() => {
                failures += 1;
                warn!(error = %e, "pipeline error");
            }
        }
    };
    while let Ok(e) = error_rx.try_recv() {
        failures += 1;
        warn!(error = %e, "pipeline error");
    }

    info!(
        records = stats.records,
        drained = stats.drained_records,
        failures,
        "done"
    );
    if stats.outputs_timed_out > 0 {
        bail!("{} output(s) did not close within the shutdown period", stats.outputs_timed_out);
    }
    if failures > 0 {
        eprintln!("{failures} error(s) reported while running");
    }
    Ok(())
}

/// First Ctrl-C shuts down gracefully, a second one aborts.
async fn watch_interrupts(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("interrupted, shutting down (Ctrl-C again to abort)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        error!("aborted");
        std::process::exit(130);
    }
}
