//! Shell command execution for hooks and command-backed resolvers.

use std::path::Path;
use std::process::Command;

use crate::error::{CommandFailedDetails, Error, Result};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

/// Run `command` through the platform shell in `current_dir`.
pub fn execute_local_command_in_dir(
    command: &str,
    current_dir: Option<&Path>,
    env: Option<&[(&str, &str)]>,
) -> CommandOutput {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }

    if let Some(env_pairs) = env {
        cmd.envs(env_pairs.iter().copied());
    }

    match cmd.output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput {
            stdout: String::new(),
            stderr: format!("Command error: {}", e),
            success: false,
            exit_code: -1,
        },
    }
}

/// Run `command` and return trimmed stdout, or `command.failed` with the
/// captured output.
pub fn run_checked(
    command: &str,
    current_dir: Option<&Path>,
    env: Option<&[(&str, &str)]>,
) -> Result<String> {
    let output = execute_local_command_in_dir(command, current_dir, env);

    if !output.success {
        return Err(Error::command_failed(CommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }));
    }

    Ok(output.stdout.trim().to_string())
}
