//! portwrap CLI
//!
//! Sets up SSH local port forwards, runs the given command (or waits for
//! Ctrl-C when there is none) and tears the forwards down again. The
//! command's exit code becomes portwrap's exit code.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portwrap::output::{print_error, print_info, print_warning};
use portwrap::{runner, Cli};
use pw_tunnel::{ForwardingWrapper, SessionLogger, TracingLogger, WriterLogger};

/// Exit code when no session could be established
const SETUP_FAILED_EXIT_CODE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level().into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let settings = cli.settings().context("Invalid session configuration")?;
    let wrapper =
        ForwardingWrapper::from_settings(settings).context("Invalid session configuration")?;
    tracing::debug!("Session configuration: {:?}", wrapper.config());

    if wrapper.config().forwards().is_empty() {
        print_warning("No forwardings configured");
    }

    // Quiet mode still records manager lines, but only through tracing
    let logger: Arc<dyn SessionLogger> = if cli.quiet {
        Arc::new(TracingLogger)
    } else {
        Arc::new(WriterLogger::stderr())
    };

    let Some(environment) = wrapper.setup(logger).await else {
        print_error("SSH session could not be established, not running the command");
        return Ok(SETUP_FAILED_EXIT_CODE);
    };

    let result = if cli.command.is_empty() {
        if !cli.quiet {
            print_info("Forwards are up, press Ctrl+C to stop");
        }
        runner::wait_for_interrupt().await.map(|()| 0)
    } else {
        runner::run_command(&cli.command).await
    };

    environment.tear_down().await;

    let code = result?;
    Ok(u8::try_from(code).unwrap_or(SETUP_FAILED_EXIT_CODE))
}
