//! Command-execution collaborator and its adapters.
//!
//! The dispatcher only sees [`CommandExecutor`]. Two adapters ship with the
//! daemon:
//!
//! - [`ShellCommandExecutor`] runs a configurable connect command (for
//!   example an `ssh` invocation) through `/bin/sh -c`, one command at a
//!   time, with every substituted value shell-quoted.
//! - [`ReplayExecutor`] answers from previously captured outputs stored as
//!   `<dir>/<host>/<command slug>.json` or `.txt`.

use async_trait::async_trait;
use netsync_extract::RawOutput;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::CommandError;

/// Per-command outcome for one host.
pub type CommandOutputs = BTreeMap<String, Result<RawOutput, CommandError>>;

/// Placeholder replaced with the quoted device address.
pub const HOST_PLACEHOLDER: &str = "{host}";

/// Placeholder replaced with the quoted device command.
pub const COMMAND_PLACEHOLDER: &str = "{command}";

/// Exit code ssh uses for connection-level failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Characters that need escaping inside shell double quotes.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Runs of characters that are not safe in a replay file name.
static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// ```
/// use netsync_syncd::command::shellquote;
///
/// assert_eq!(shellquote("show version"), "\"show version\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Returns the file-name stem a command's captured output is stored under.
pub fn command_slug(command: &str) -> String {
    SLUG_RE
        .replace_all(command.trim(), "_")
        .trim_matches('_')
        .to_ascii_lowercase()
}

/// One device to collect facts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    /// Address used to reach the device; also the host key in reports.
    pub address: String,
    /// Platform key selecting the mapping table.
    pub platform: String,
    /// Location name a newly onboarded device is placed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl HostTarget {
    pub fn new(address: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            platform: platform.into(),
            location: None,
        }
    }

    /// Sets the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Runs commands on a device.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `commands` on `host` in order.
    ///
    /// Returns an outer error when the host as a whole failed (unreachable,
    /// authentication, timeout). Individual command rejections are reported
    /// per command.
    async fn run(&self, host: &HostTarget, commands: &[String]) -> Result<CommandOutputs, CommandError>;
}

/// Result of one transport invocation.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the transport (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout and stderr joined for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    fn is_auth_failure(&self) -> bool {
        let stderr = self.stderr.to_ascii_lowercase();
        stderr.contains("permission denied") || stderr.contains("authentication failed")
    }
}

/// Runs device commands through a shell transport.
#[derive(Debug, Clone)]
pub struct ShellCommandExecutor {
    connect_command: String,
    timeout: Duration,
}

impl ShellCommandExecutor {
    /// Creates an executor from a connect command template holding the
    /// `{host}` and `{command}` placeholders.
    pub fn new(connect_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            connect_command: connect_command.into(),
            timeout,
        }
    }

    /// Renders the shell line for one command.
    pub fn render(&self, host: &HostTarget, command: &str) -> String {
        self.connect_command
            .replace(HOST_PLACEHOLDER, &shellquote(&host.address))
            .replace(COMMAND_PLACEHOLDER, &shellquote(command))
    }

    async fn exec(&self, host: &HostTarget, command: &str) -> Result<ExecResult, CommandError> {
        let line = self.render(host, command);
        debug!(host = %host.address, command = %command, "Executing device command");

        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&line)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandError::Spawn {
                    host: host.address.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(CommandError::Timeout {
                    host: host.address.clone(),
                    command: command.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let result = ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        trace!(host = %host.address, command = %command, exit_code = result.exit_code, "Command finished");
        Ok(result)
    }
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn run(&self, host: &HostTarget, commands: &[String]) -> Result<CommandOutputs, CommandError> {
        let mut outputs = CommandOutputs::new();
        for command in commands {
            let result = self.exec(host, command).await?;
            if result.success() {
                outputs.insert(command.clone(), Ok(RawOutput::Text(result.stdout)));
                continue;
            }

            if result.is_auth_failure() {
                return Err(CommandError::AuthenticationFailed {
                    host: host.address.clone(),
                    message: result.stderr,
                });
            }
            if result.exit_code == SSH_CONNECTION_FAILURE {
                return Err(CommandError::unreachable(&host.address, result.combined_output()));
            }

            warn!(
                host = %host.address,
                command = %command,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Command failed"
            );
            outputs.insert(
                command.clone(),
                Err(CommandError::CommandFailed {
                    host: host.address.clone(),
                    command: command.clone(),
                    exit_code: result.exit_code,
                    output: result.combined_output(),
                }),
            );
        }
        Ok(outputs)
    }
}

/// Answers commands from captured output files.
#[derive(Debug, Clone)]
pub struct ReplayExecutor {
    root: PathBuf,
}

impl ReplayExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the replay directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, dir: &Path, host: &HostTarget, command: &str) -> Result<RawOutput, CommandError> {
        let slug = command_slug(command);
        let failed = |output: String| CommandError::CommandFailed {
            host: host.address.clone(),
            command: command.to_string(),
            exit_code: 1,
            output,
        };

        let json_path = dir.join(format!("{}.json", slug));
        match tokio::fs::read_to_string(&json_path).await {
            Ok(text) => {
                return serde_json::from_str(&text)
                    .map(RawOutput::Structured)
                    .map_err(|e| failed(format!("{}: {}", json_path.display(), e)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(failed(e.to_string())),
        }

        let text_path = dir.join(format!("{}.txt", slug));
        tokio::fs::read_to_string(&text_path)
            .await
            .map(RawOutput::Text)
            .map_err(|e| failed(format!("{}: {}", text_path.display(), e)))
    }
}

#[async_trait]
impl CommandExecutor for ReplayExecutor {
    async fn run(&self, host: &HostTarget, commands: &[String]) -> Result<CommandOutputs, CommandError> {
        let dir = self.root.join(&host.address);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(CommandError::unreachable(
                &host.address,
                format!("no captured outputs under {}", dir.display()),
            ));
        }

        let mut outputs = CommandOutputs::new();
        for command in commands {
            let result = self.read(&dir, host, command).await;
            if let Err(err) = &result {
                debug!(host = %host.address, command = %command, error = %err, "No replay output");
            }
            outputs.insert(command.clone(), result);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("show version"), "\"show version\"");
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("a\"b"), "\"a\\\"b\"");
        assert_eq!(shellquote("a\\b"), "\"a\\\\b\"");
    }

    #[test]
    fn test_command_slug() {
        assert_eq!(command_slug("show interfaces switchport"), "show_interfaces_switchport");
        assert_eq!(command_slug("show vrf | json"), "show_vrf_json");
        assert_eq!(command_slug(" Show Version "), "show_version");
    }

    #[test]
    fn test_render_quotes_values() {
        let executor = ShellCommandExecutor::new(
            "ssh -o BatchMode=yes {host} {command}",
            Duration::from_secs(5),
        );
        let host = HostTarget::new("10.0.0.1", "arista_eos");
        assert_eq!(
            executor.render(&host, "show version"),
            "ssh -o BatchMode=yes \"10.0.0.1\" \"show version\""
        );
    }

    #[tokio::test]
    async fn test_shell_executor_outputs_and_failures() {
        let executor = ShellCommandExecutor::new("echo {command}", Duration::from_secs(5));
        let host = HostTarget::new("10.0.0.1", "arista_eos");
        let outputs = executor
            .run(&host, &["show version".to_string()])
            .await
            .unwrap();
        assert_eq!(outputs["show version"], Ok(RawOutput::text("show version")));

        let executor = ShellCommandExecutor::new("exit 255 # {host} {command}", Duration::from_secs(5));
        let err = executor.run(&host, &["show version".to_string()]).await.unwrap_err();
        assert!(matches!(err, CommandError::DeviceUnreachable { .. }));

        let executor = ShellCommandExecutor::new("exit 3 # {host} {command}", Duration::from_secs(5));
        let outputs = executor.run(&host, &["show bogus".to_string()]).await.unwrap();
        assert!(matches!(
            outputs["show bogus"],
            Err(CommandError::CommandFailed { exit_code: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_shell_executor_timeout() {
        let executor = ShellCommandExecutor::new("sleep 5 # {host} {command}", Duration::from_millis(100));
        let host = HostTarget::new("10.0.0.1", "arista_eos");
        let err = executor.run(&host, &["show version".to_string()]).await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_replay_executor() {
        let dir = tempfile::tempdir().unwrap();
        let host_dir = dir.path().join("10.0.0.1");
        std::fs::create_dir_all(&host_dir).unwrap();
        std::fs::write(host_dir.join("show_version.json"), r#"{"serialNumber": "SN1"}"#).unwrap();
        std::fs::write(host_dir.join("show_hostname.txt"), "leaf1").unwrap();

        let executor = ReplayExecutor::new(dir.path());
        let host = HostTarget::new("10.0.0.1", "arista_eos");
        let commands = vec![
            "show version".to_string(),
            "show hostname".to_string(),
            "show inventory".to_string(),
        ];
        let outputs = executor.run(&host, &commands).await.unwrap();
        assert_eq!(
            outputs["show version"],
            Ok(RawOutput::Structured(json!({"serialNumber": "SN1"})))
        );
        assert_eq!(outputs["show hostname"], Ok(RawOutput::text("leaf1")));
        assert!(outputs["show inventory"].is_err());

        let missing = HostTarget::new("10.0.0.9", "arista_eos");
        let err = executor.run(&missing, &commands).await.unwrap_err();
        assert!(matches!(err, CommandError::DeviceUnreachable { .. }));
    }
}
