//! A [`Connector`] that runs a local shell command against the instance.
//!
//! The command template must contain `{host}`, which is replaced with the
//! instance's public address. A typical template starts the agent over ssh:
//!
//! ```text
//! ssh -o StrictHostKeyChecking=accept-new ci@{host} ./start-agent.sh
//! ```

use anyhow::{Context, Result, bail};
use ec2_agent_common::{Connector, Launcher, SessionLog};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Placeholder replaced with the instance address
pub const HOST_PLACEHOLDER: &str = "{host}";

/// Default limit on a single launch command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct CommandConnector {
    template: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl CommandConnector {
    pub fn new(template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let template = template.into();
        if !template.contains(HOST_PLACEHOLDER) {
            bail!("Launch command must contain {HOST_PLACEHOLDER}: {template}");
        }
        Ok(Self {
            template,
            timeout,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort running commands when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Connector for CommandConnector {
    type Launcher = CommandLauncher;

    fn launcher_for(&self, address: &str, log: &dyn SessionLog) -> Result<CommandLauncher> {
        // The address lands in a shell command line.
        if address.is_empty()
            || !address
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
        {
            bail!("Refusing to substitute unsafe host address '{address}'");
        }

        let command = self.template.replace(HOST_PLACEHOLDER, address);
        log.write_line(&format!("launch command for {address}: {command}"));
        Ok(CommandLauncher {
            command,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        })
    }
}

/// Runs one substituted command to completion
#[derive(Debug)]
pub struct CommandLauncher {
    command: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl CommandLauncher {
    pub fn command(&self) -> &str {
        &self.command
    }
}

enum Exit {
    Finished(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl Launcher for CommandLauncher {
    async fn launch(&mut self, log: &dyn SessionLog) -> Result<()> {
        info!(
            command = %self.command,
            timeout_secs = self.timeout.as_secs(),
            "Running launch command"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn command: {}", self.command))?;

        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let stderr = child.stderr.take().context("Failed to capture stderr")?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let exit = loop {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => log.write_line(&line),
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => log.write_line(&format!("stderr: {line}")),
                    _ => stderr_open = false,
                },
                status = child.wait(), if !stdout_open && !stderr_open => break Exit::Finished(status),
                _ = &mut deadline => break Exit::TimedOut,
                _ = self.cancel.cancelled() => break Exit::Cancelled,
            }
        };

        match exit {
            Exit::Finished(status) => {
                let status = status.context("Failed waiting for command")?;
                if !status.success() {
                    bail!("Launch command exited with {status}");
                }
                log.write_line("launch command finished");
                Ok(())
            }
            Exit::TimedOut => {
                warn!(
                    command = %self.command,
                    timeout_secs = self.timeout.as_secs(),
                    "Command timed out, killing process"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                bail!(
                    "Launch command timed out after {}s",
                    self.timeout.as_secs()
                )
            }
            Exit::Cancelled => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill cancelled process");
                }
                log.write_line("launch command cancelled");
                bail!("Launch command cancelled")
            }
        }
    }

    async fn after_disconnect(&mut self, log: &dyn SessionLog) {
        log.write_line(&format!("session for `{}` closed", self.command));
    }
}
