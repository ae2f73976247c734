//! The surface the CI framework drives: launch, then disconnect.
//!
//! [`LauncherDelegate`] composes a [`LifecycleController`] with a
//! configured [`Connector`]. Lifecycle runs first; the connector only ever
//! sees the address of a ready instance.

use crate::error::LaunchError;
use crate::lifecycle::{LifecycleController, ReadyInstance, TeardownOutcome};
use ec2_agent_common::{ConfigError, Connector, InstanceService, Launcher, NodeConfig, SessionLog};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// In-memory state for one launch; never persisted
#[derive(Debug)]
struct Session<L> {
    launcher: L,
    instance: ReadyInstance,
}

/// Adapter exposing launch/disconnect hooks over an EC2-backed node
pub struct LauncherDelegate<S, C: Connector> {
    controller: LifecycleController<S>,
    connector: C,
    session: Option<Session<C::Launcher>>,
    shutdown: CancellationToken,
    launch_cancel: CancellationToken,
    teardown_pending: bool,
}

impl<S, C> LauncherDelegate<S, C>
where
    S: InstanceService,
    C: Connector,
{
    pub fn new(controller: LifecycleController<S>, connector: C) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            controller,
            connector,
            session: None,
            launch_cancel: shutdown.child_token(),
            shutdown,
            teardown_pending: false,
        }
    }

    /// Share an externally owned node shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.launch_cancel = shutdown.child_token();
        self.shutdown = shutdown;
        self
    }

    /// Node-wide token. Once cancelled, every current and future launch is
    /// cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Token that aborts only the current (or next) launch. After a launch
    /// observes it, the delegate issues a fresh one, so later launches
    /// proceed normally.
    pub fn launch_token(&self) -> CancellationToken {
        self.launch_cancel.clone()
    }

    pub fn controller(&self) -> &LifecycleController<S> {
        &self.controller
    }

    /// Address of the live session, if any
    pub fn session_address(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.instance.address.as_str())
    }

    /// Before any session exists the node is always eligible for on-demand
    /// launch. Once a session is live the answer belongs to its launcher.
    pub fn supports_launch(&self) -> bool {
        self.session
            .as_ref()
            .is_none_or(|s| s.launcher.supports_launch())
    }

    /// Bring the instance up, hand its address to the connector, and run the
    /// resulting launcher.
    ///
    /// Fails with [`LaunchError::SessionActive`] while an earlier session has
    /// not been disconnected.
    pub async fn launch(&mut self, log: &dyn SessionLog) -> Result<(), LaunchError> {
        if let Some(session) = &self.session {
            let address = session.instance.address.clone();
            log.error(&format!(
                "a session on {address} is still live; disconnect it before launching again"
            ));
            return Err(LaunchError::SessionActive { address });
        }
        self.teardown_pending = true;

        let cancel = self.launch_cancel.clone();
        let ready = match self.controller.ensure_running_and_ready(log, &cancel).await {
            Ok(ready) => ready,
            Err(e) if e.is_cancelled() => {
                info!(error = %e, "Launch cancelled");
                self.launch_cancel = self.shutdown.child_token();
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "Instance did not become ready, connector not invoked");
                return Err(e.into());
            }
        };

        let launcher = self
            .connector
            .launcher_for(&ready.address, log)
            .map_err(|source| {
                log.error(&format!("failed to connect to {}: {source:#}", ready.address));
                LaunchError::Connector {
                    address: ready.address.clone(),
                    source,
                }
            })?;

        info!(instance_id = %ready.instance_id, address = %ready.address, "Handing off to launcher");
        let session = self.session.insert(Session {
            launcher,
            instance: ready,
        });
        session.launcher.launch(log).await.map_err(|e| {
            log.error(&format!("agent launch failed: {e:#}"));
            LaunchError::Launcher(e)
        })
    }

    /// Forward to the launcher, then tear the instance down if this session
    /// has not already done so.
    pub async fn before_disconnect(&mut self, log: &dyn SessionLog) -> Option<TeardownOutcome> {
        if let Some(session) = self.session.as_mut() {
            session.launcher.before_disconnect(log).await;
        }
        self.teardown_once(log).await
    }

    /// Forward to the launcher, tear down if still pending, then release the
    /// session.
    pub async fn after_disconnect(&mut self, log: &dyn SessionLog) -> Option<TeardownOutcome> {
        if let Some(session) = self.session.as_mut() {
            session.launcher.after_disconnect(log).await;
        }
        let outcome = self.teardown_once(log).await;
        self.session = None;
        outcome
    }

    async fn teardown_once(&mut self, log: &dyn SessionLog) -> Option<TeardownOutcome> {
        if !std::mem::take(&mut self.teardown_pending) {
            return None;
        }
        Some(self.controller.teardown(log).await)
    }

    /// Apply a new configuration.
    ///
    /// Changing the node name or instance identity is rejected while the
    /// instance is running. AWS settings are bound to the service client and
    /// cannot change at all.
    pub async fn reconfigure(&mut self, mut config: NodeConfig) -> Result<(), ConfigError> {
        config.normalize();
        config.check()?;

        let current = self.controller.config();
        if config.aws != current.aws {
            return Err(ConfigError::AwsSettingsChanged);
        }

        let field = if config.instance != current.instance {
            Some("instance")
        } else if config.name != current.name {
            Some("name")
        } else {
            None
        };

        if let Some(field) = field {
            if let Some(instance_id) = self.running_instance().await {
                return Err(ConfigError::ChangeWhileRunning { field, instance_id });
            }
        }

        self.controller.replace_config(config);
        Ok(())
    }

    /// Id of the instance if it is, or may be, running.
    async fn running_instance(&self) -> Option<String> {
        if let Some(session) = &self.session {
            return Some(session.instance.instance_id.clone());
        }
        let id = self.controller.instance_id()?.to_string();
        match self.controller.is_instance_running().await {
            Ok(true) => Some(id),
            Ok(false) => None,
            Err(e) => {
                warn!(instance_id = %id, error = %e, "Could not confirm instance state, assuming running");
                Some(id)
            }
        }
    }
}
