//! Runs the wrapped command while the forwards are up

use std::process::ExitStatus;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Exit code reported when the command was interrupted with Ctrl-C
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Run `command` to completion and return its exit code.
///
/// Ctrl-C kills the child and yields [`INTERRUPTED_EXIT_CODE`].
pub async fn run_command(command: &[String]) -> Result<i32> {
    let (program, args) = command.split_first().context("No command given")?;

    let mut child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start '{}'", program))?;
    tracing::info!("Started '{}' (pid {:?})", program, child.id());

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("Failed to wait for '{}'", program))?;
            tracing::info!("'{}' finished with {}", program, status);
            Ok(exit_code(status))
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, stopping '{}'", program);
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill '{}': {}", program, e);
            }
            Ok(INTERRUPTED_EXIT_CODE)
        }
    }
}

/// Block until Ctrl-C
pub async fn wait_for_interrupt() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down");
    Ok(())
}

/// Exit code of a finished process; signals map to 128 + signal number
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
