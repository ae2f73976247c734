//! ec2-agent-launcher: run a CI agent session on an EC2-backed node
//!
//! `run` brings the node's instance up, runs the launch command against it,
//! then stops the instance. `describe` and `stop` act on the instance
//! directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ec2_agent_common::{InstanceService, NodeConfig, SessionLog};
use ec2_agent_launcher::aws::{AwsContext, Ec2Client, suggestion_for_code};
use ec2_agent_launcher::connector::DEFAULT_COMMAND_TIMEOUT;
use ec2_agent_launcher::{CommandConnector, LauncherDelegate, LifecycleController, TeardownOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ec2-agent-launcher")]
#[command(about = "Run CI agents on EC2 instances that are started on demand")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Settings shared by every subcommand
#[derive(clap::Args, Debug)]
struct NodeArgs {
    /// Node configuration file (TOML)
    #[arg(short, long, env = "EC2_AGENT_CONFIG")]
    config: PathBuf,

    /// AWS region (overrides the config file)
    #[arg(long)]
    region: Option<String>,

    /// AWS profile to use (overrides the config file)
    #[arg(long)]
    aws_profile: Option<String>,
}

impl NodeArgs {
    fn load(&self) -> Result<NodeConfig> {
        let mut config = NodeConfig::load(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;
        if let Some(region) = &self.region {
            config.aws.region = region.clone();
        }
        if let Some(profile) = &self.aws_profile {
            config.aws.profile = Some(profile.clone());
        }
        config.normalize();
        config.check()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the instance up, run the launch command, then tear down
    Run {
        #[command(flatten)]
        node: NodeArgs,

        /// Launch command; `{host}` is replaced with the instance address
        #[arg(long)]
        command: String,

        /// Launch command timeout in seconds
        #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT.as_secs())]
        command_timeout: u64,

        /// Leave the instance running afterwards
        #[arg(long)]
        keep: bool,
    },

    /// Show the state and address of the node's instance
    Describe {
        #[command(flatten)]
        node: NodeArgs,

        /// Instance to inspect (defaults to the configured one)
        #[arg(long)]
        instance_id: Option<String>,
    },

    /// Apply the configured teardown action to an instance
    Stop {
        #[command(flatten)]
        node: NodeArgs,

        /// Instance to stop (defaults to the configured one)
        #[arg(long)]
        instance_id: Option<String>,
    },
}

/// Session log that prints timestamped lines to stdout
struct ConsoleLog;

impl SessionLog for ConsoleLog {
    fn write_line(&self, line: &str) {
        println!("{} {line}", chrono::Local::now().format("%H:%M:%S"));
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Run {
            node,
            command,
            command_timeout,
            keep,
        } => run_session(&node, command, Duration::from_secs(command_timeout), keep).await,
        Command::Describe { node, instance_id } => describe(&node, instance_id).await,
        Command::Stop { node, instance_id } => stop(&node, instance_id).await,
    }
}

async fn run_session(node: &NodeArgs, command: String, timeout: Duration, keep: bool) -> Result<()> {
    let config = node.load()?;
    info!(node = %config.name, region = %config.aws.region, "Starting agent session");

    let shutdown = CancellationToken::new();
    let ctx = AwsContext::new(&config.aws).await;
    let controller = LifecycleController::new(Ec2Client::from_context(&ctx), config);
    let connector = CommandConnector::new(command, timeout)?.with_cancel(shutdown.clone());
    let mut delegate = LauncherDelegate::new(controller, connector).with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            shutdown.cancel();
        }
    });

    let log = ConsoleLog;
    let launched = delegate.launch(&log).await;

    if keep {
        if let Some(id) = delegate.controller().instance_id() {
            log.write_line(&format!("leaving instance [{id}] running"));
        }
    } else {
        delegate.before_disconnect(&log).await;
        delegate.after_disconnect(&log).await;
    }

    match launched {
        Err(e) if e.is_cancelled() => {
            log.write_line("session cancelled");
            Ok(())
        }
        other => other.context("Agent session failed"),
    }
}

fn target_instance(config: &NodeConfig, instance_id: Option<String>) -> Result<String> {
    instance_id
        .or_else(|| config.instance.existing_instance_id().map(str::to_string))
        .context("No instance id configured; pass --instance-id")
}

async fn describe(node: &NodeArgs, instance_id: Option<String>) -> Result<()> {
    let config = node.load()?;
    let instance_id = target_instance(&config, instance_id)?;
    let client = Ec2Client::new(&config.aws).await;

    match client.describe_instance(&instance_id).await {
        Ok(desc) => {
            println!("Instance: {}", desc.instance_id);
            println!("State:    {}", desc.state);
            println!(
                "Address:  {}",
                desc.public_address.as_deref().unwrap_or("(none)")
            );
            Ok(())
        }
        Err(e) => {
            if let Some(hint) = e.code().and_then(suggestion_for_code) {
                eprintln!("hint: {hint}");
            }
            Err(e).with_context(|| format!("Failed to describe instance {instance_id}"))
        }
    }
}

async fn stop(node: &NodeArgs, instance_id: Option<String>) -> Result<()> {
    let config = node.load()?;
    let instance_id = target_instance(&config, instance_id)?;
    let client = Ec2Client::new(&config.aws).await;
    let action = config.teardown;

    let mut controller = LifecycleController::new(client, config).with_instance_id(instance_id);
    let log = ConsoleLog;
    match controller.teardown(&log).await {
        TeardownOutcome::Failed(e) => Err(e).context(format!("Failed to {action} instance")),
        outcome => {
            info!(?outcome, "Teardown complete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const FIXED: &str = r#"
name = "builder"

[instance]
mode = "existing"
instance_id = "i-0abc"
"#;

    #[test]
    fn cli_overrides_config_file() {
        let file = write_config(FIXED);
        let args = NodeArgs {
            config: file.path().to_path_buf(),
            region: Some(" eu-west-1 ".to_string()),
            aws_profile: Some("ci".to_string()),
        };

        let config = args.load().unwrap();

        assert_eq!(config.aws.region, "eu-west-1");
        assert_eq!(config.aws.profile.as_deref(), Some("ci"));
    }

    #[test]
    fn target_instance_prefers_flag() {
        let config = NodeConfig::from_toml_str(FIXED).unwrap();
        assert_eq!(target_instance(&config, None).unwrap(), "i-0abc");
        assert_eq!(
            target_instance(&config, Some("i-0def".to_string())).unwrap(),
            "i-0def"
        );
    }

    #[test]
    fn parses_run_subcommand() {
        let args = Args::try_parse_from([
            "ec2-agent-launcher",
            "run",
            "--config",
            "node.toml",
            "--command",
            "ssh ci@{host} ./agent",
        ])
        .unwrap();
        match args.command {
            Command::Run {
                command_timeout,
                keep,
                ..
            } => {
                assert_eq!(command_timeout, DEFAULT_COMMAND_TIMEOUT.as_secs());
                assert!(!keep);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
