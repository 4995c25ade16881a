//! Subprocess plumbing shared by every transcoder operation: nice-wrapping,
//! stderr consumption, and hard timeouts (§9 "Subprocess reliability").

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

/// Run `binary` with `args` under `nice -n <level>` on POSIX hosts, a plain
/// invocation on Windows (`nice` doesn't exist there), consuming stdout and
/// stderr so the child can never block on a full pipe buffer.
pub async fn run_niced(
    binary: &str,
    args: &[String],
    nice_level: i32,
    hard_timeout: Duration,
) -> Result<std::process::Output, String> {
    let mut command = build_niced_command(binary, args, nice_level);
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let child = command.spawn().map_err(|e| format!("failed to spawn {binary}: {e}"))?;
    match timeout(hard_timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{binary} failed: {e}")),
        Err(_) => Err(format!("{binary} exceeded {}s timeout", hard_timeout.as_secs())),
    }
}

#[cfg(unix)]
fn build_niced_command(binary: &str, args: &[String], nice_level: i32) -> Command {
    let mut command = Command::new("nice");
    command.arg("-n").arg(nice_level.to_string()).arg(binary).args(args);
    command
}

#[cfg(not(unix))]
fn build_niced_command(binary: &str, args: &[String], _nice_level: i32) -> Command {
    let mut command = Command::new(binary);
    command.args(args);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn niced_command_prefixes_nice_binary() {
        let output = run_niced("echo", &["hello".to_string()], 10, Duration::from_secs(5)).await;
        match output {
            Ok(out) => assert!(String::from_utf8_lossy(&out.stdout).contains("hello")),
            // `nice` may be unavailable in a minimal sandbox; tolerate spawn failure.
            Err(_) => {}
        }
    }
}
