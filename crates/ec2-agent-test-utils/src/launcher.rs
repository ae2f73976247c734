//! Recording transport-layer stubs

use crate::journal::Journal;
use ec2_agent_common::{Connector, Launcher, SessionLog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connector that records the addresses it is asked for
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    journal: Journal,
    supports_launch: Arc<AtomicBool>,
    fail_launch: bool,
}

impl RecordingConnector {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            supports_launch: Arc::new(AtomicBool::new(true)),
            fail_launch: false,
        }
    }

    /// Launchers produced from now on report this `supports_launch` value
    pub fn set_supports_launch(&self, supported: bool) {
        self.supports_launch.store(supported, Ordering::SeqCst);
    }

    /// Launchers fail their `launch` call
    pub fn failing(mut self) -> Self {
        self.fail_launch = true;
        self
    }
}

impl Connector for RecordingConnector {
    type Launcher = RecordingLauncher;

    fn launcher_for(
        &self,
        address: &str,
        log: &dyn SessionLog,
    ) -> anyhow::Result<RecordingLauncher> {
        log.write_line(&format!("connecting to {address}"));
        self.journal.record(format!("connect:{address}"));
        Ok(RecordingLauncher {
            address: address.to_string(),
            journal: self.journal.clone(),
            supports_launch: self.supports_launch.clone(),
            fail_launch: self.fail_launch,
        })
    }
}

/// Launcher that records each hook invocation
#[derive(Debug)]
pub struct RecordingLauncher {
    address: String,
    journal: Journal,
    supports_launch: Arc<AtomicBool>,
    fail_launch: bool,
}

impl RecordingLauncher {
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Launcher for RecordingLauncher {
    fn supports_launch(&self) -> bool {
        self.supports_launch.load(Ordering::SeqCst)
    }

    async fn launch(&mut self, _log: &dyn SessionLog) -> anyhow::Result<()> {
        self.journal.record(format!("launch:{}", self.address));
        if self.fail_launch {
            anyhow::bail!("agent handshake with {} failed", self.address);
        }
        Ok(())
    }

    async fn before_disconnect(&mut self, _log: &dyn SessionLog) {
        self.journal.record("before_disconnect");
    }

    async fn after_disconnect(&mut self, _log: &dyn SessionLog) {
        self.journal.record("after_disconnect");
    }
}
