//! `run_command`: shell execution with a timeout and bounded output.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::debug;

use crate::args::RunCommandArgs;
use crate::error::{ToolError, ToolErrorKind};
use crate::{ToolContext, ToolOutput};

/// Substrings marking a command as destructive or privilege-escalating.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf $home",
    "rm -rf *",
    "mkfs",
    "dd if=",
    "shutdown",
    "reboot",
    "poweroff",
    ":(){ :|:& };:",
    "> /dev/sd",
    "chmod -r 777 /",
    "sudo ",
    "git push --force",
    "git push -f",
    "git reset --hard",
    "git clean -fd",
    "/proc/sysrq",
];

/// Whether `command` should be escalated to the `dangerous` approval class.
pub fn is_dangerous_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    if DANGEROUS_PATTERNS.iter().any(|pat| lower.contains(pat)) {
        return true;
    }
    // curl/wget piped into a shell
    let parts: Vec<&str> = lower.split('|').map(str::trim).collect();
    parts.windows(2).any(|pair| {
        (pair[0].starts_with("curl") || pair[0].starts_with("wget"))
            && (pair[1].starts_with("sh") || pair[1].starts_with("bash"))
    })
}

/// Keep the last `max_bytes` of `output` on a char boundary; errors trail.
pub fn tail_truncate(output: &str, max_bytes: usize) -> (String, bool) {
    if output.len() <= max_bytes {
        return (output.to_string(), false);
    }
    let mut start = output.len() - max_bytes;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    let dropped = start;
    (format!("[... {dropped} bytes truncated ...]\n{}", &output[start..]), true)
}

fn shell(command: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

pub async fn run_command(args: RunCommandArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
    if args.command.trim().is_empty() {
        return Err(ToolError::invalid_arguments("command must not be empty"));
    }
    let cwd = match args.cwd.as_deref() {
        Some(raw) => ctx.resolve(raw)?,
        None => ctx.workspace.to_path_buf(),
    };
    if !cwd.is_dir() {
        return Err(ToolError::not_found(format!("Working directory not found: {}", cwd.display())));
    }

    let timeout = args
        .timeout
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(ctx.settings.command_timeout);
    let timeout_ms = timeout.as_millis() as u64;

    debug!(command = %args.command, cwd = %cwd.display(), timeout_ms, "Running command");
    let started = Instant::now();
    let child = shell(&args.command)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ToolError::new(
                ToolErrorKind::CommandFailed,
                format!("Failed to start command: {e}"),
            ));
        }
        Err(_) => {
            return Err(ToolError::new(
                ToolErrorKind::Timeout,
                format!("Command timed out after {timeout_ms}ms: {}", args.command),
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.into_owned(),
        (true, false) => stderr.into_owned(),
        (false, false) => format!("{stdout}\n[stderr]\n{stderr}"),
    };
    let (content, truncated) = tail_truncate(&combined, ctx.settings.max_output_bytes);

    // Killed by a signal has no exit code.
    let exit_code = output.status.code().unwrap_or(-1);
    let mut out = ToolOutput::text(if content.is_empty() { "(no output)".to_string() } else { content })
        .with_meta(json!({
            "exit_code": exit_code,
            "duration_ms": started.elapsed().as_millis() as u64,
            "truncated": truncated,
            "cwd": ctx.display_path(&cwd),
        }));
    if exit_code != 0 {
        out.failure = Some(ToolError::new(
            ToolErrorKind::CommandFailed,
            format!("Command exited with code {exit_code}"),
        ));
    }
    Ok(out)
}
