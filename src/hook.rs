//! Post-write hooks.
//!
//! After a commit changes the destination, the configured check command runs
//! (e.g. `nginx -t`), then the reload command (e.g. `systemctl reload nginx`).
//! Both go through `sh -c`. A failing check stops the reload.

use std::io;
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum HookError {
    #[error("failed to run `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
    #[error("`{cmd}` exited with {status}: {stderr}")]
    Failed {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Run a shell command, failing on a non-zero exit status.
pub fn run_command(cmd: &str) -> Result<(), HookError> {
    debug!(cmd, "running hook");
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|source| HookError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(HookError::Failed {
            cmd: cmd.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    info!(cmd, "hook succeeded");
    Ok(())
}

/// Run `check` then `reload`. Empty or missing commands are skipped.
///
/// Returns the number of commands that ran.
pub fn run_hooks(check: Option<&str>, reload: Option<&str>) -> Result<usize, HookError> {
    let mut ran = 0;
    for cmd in [check, reload].into_iter().flatten() {
        if cmd.trim().is_empty() {
            continue;
        }
        run_command(cmd)?;
        ran += 1;
    }
    Ok(ran)
}
