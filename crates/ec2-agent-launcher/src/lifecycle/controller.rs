//! Start/stop orchestration for one node's instance

use super::{LifecycleError, ReadyInstance};
use crate::aws::suggestion_for_code;
use crate::wait::{PollConfig, describe_with_retry, wait_until_running, wait_until_stopped};
use ec2_agent_common::{
    ImageLaunchParams, InstanceIdentity, InstanceService, InstanceState, NodeConfig, ServiceError,
    SessionLog, TeardownAction,
};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What a teardown did
#[derive(Debug)]
pub enum TeardownOutcome {
    /// No instance was tracked
    NothingToDo,
    /// A stop was issued; carries the state reported by the API
    Stopped(InstanceState),
    /// A terminate was issued and the instance id forgotten
    Terminated(InstanceState),
    /// The request failed; already logged
    Failed(LifecycleError),
}

impl TeardownOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Owns one instance's lifecycle: the service client, the persisted node
/// configuration, and the id of the instance currently backing the node.
///
/// In fixed mode the id comes from configuration and never changes. In image
/// mode it is empty until the first launch creates an instance, and is
/// cleared again when the instance is terminated.
#[derive(Debug)]
pub struct LifecycleController<S> {
    service: S,
    config: NodeConfig,
    instance_id: Option<String>,
    last_state: Option<InstanceState>,
}

impl<S: InstanceService> LifecycleController<S> {
    pub fn new(service: S, config: NodeConfig) -> Self {
        let instance_id = config.instance.existing_instance_id().map(str::to_string);
        Self {
            service,
            config,
            instance_id,
            last_state: None,
        }
    }

    /// Resume tracking an instance created by an earlier process
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self.last_state = None;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// State most recently observed or reported for the tracked instance
    pub fn last_state(&self) -> Option<&InstanceState> {
        self.last_state.as_ref()
    }

    /// Bring the instance to running and return its public address.
    ///
    /// Creates from the image when no instance exists yet, starts a stopped
    /// instance, and waits out pending or stopping ones. Never issues a start
    /// against an instance that is already running.
    pub async fn ensure_running_and_ready(
        &mut self,
        log: &dyn SessionLog,
        cancel: &CancellationToken,
    ) -> Result<ReadyInstance, LifecycleError> {
        let poll = PollConfig::from(&self.config.polling);
        let started = Instant::now();

        let ready = match self.instance_id.clone() {
            Some(id) => self.bring_up(&id, &poll, started, log, cancel).await?,
            None => self.replace_from_image(&poll, started, log, cancel).await?,
        };
        self.last_state = Some(InstanceState::Running);

        log.write_line(&format!(
            "instance [{}] is [running] at {} ({:.1}s elapsed)",
            ready.instance_id,
            ready.address,
            started.elapsed().as_secs_f64()
        ));
        Ok(ready)
    }

    async fn bring_up(
        &mut self,
        id: &str,
        poll: &PollConfig,
        started: Instant,
        log: &dyn SessionLog,
        cancel: &CancellationToken,
    ) -> Result<ReadyInstance, LifecycleError> {
        let desc = match describe_with_retry(&self.service, id, poll, log, cancel).await {
            Ok(Some(desc)) => desc,
            Ok(None) if self.config.instance.is_image() => {
                log.write_line(&format!(
                    "instance [{id}] no longer exists, launching a replacement"
                ));
                return self.replace_from_image(poll, started, log, cancel).await;
            }
            Ok(None) => {
                return Err(report(
                    log,
                    LifecycleError::InstanceNotFound {
                        instance_id: id.to_string(),
                    },
                ));
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => return Err(report(log, e)),
        };
        self.last_state = Some(desc.state.clone());

        log.write_line(&format!(
            "instance [{id}] is [{}] ({:.1}s elapsed)",
            desc.state,
            started.elapsed().as_secs_f64()
        ));
        info!(instance_id = %id, state = %desc.state, "Observed instance state");

        match desc.state {
            InstanceState::Running => match desc.public_address {
                Some(address) => {
                    log.write_line(&format!("instance [{id}] already running, skipping start"));
                    Ok(ReadyInstance {
                        instance_id: desc.instance_id,
                        address,
                    })
                }
                None => wait_until_running(&self.service, id, &poll.without_settle(), log, cancel).await,
            },
            InstanceState::Pending => wait_until_running(&self.service, id, poll, log, cancel).await,
            InstanceState::Stopping => {
                log.write_line(&format!("instance [{id}] is [stopping], waiting before start"));
                wait_until_stopped(&self.service, id, poll, log, cancel).await?;
                self.last_state = Some(InstanceState::Stopped);
                self.start_and_wait(id, poll, started, log, cancel).await
            }
            InstanceState::Stopped => self.start_and_wait(id, poll, started, log, cancel).await,
            InstanceState::Terminated if self.config.instance.is_image() => {
                log.write_line(&format!("instance [{id}] is [terminated], launching a replacement"));
                self.replace_from_image(poll, started, log, cancel).await
            }
            InstanceState::Terminated => Err(report(
                log,
                LifecycleError::InstanceTerminated {
                    instance_id: id.to_string(),
                },
            )),
            state => Err(report(
                log,
                LifecycleError::UnexpectedState {
                    instance_id: id.to_string(),
                    state,
                    goal: InstanceState::Running,
                },
            )),
        }
    }

    async fn start_and_wait(
        &mut self,
        id: &str,
        poll: &PollConfig,
        started: Instant,
        log: &dyn SessionLog,
        cancel: &CancellationToken,
    ) -> Result<ReadyInstance, LifecycleError> {
        log.write_line(&format!(
            "starting instance [{id}] (last seen [{}], {:.1}s elapsed)",
            describe_last(self.last_state.as_ref()),
            started.elapsed().as_secs_f64()
        ));
        let state = self
            .service
            .start_instance(id)
            .await
            .map_err(|e| report(log, LifecycleError::service("start", Some(id), e)))?;
        log.write_line(&format!(
            "start requested for instance [{id}], now [{state}] ({:.1}s elapsed)",
            started.elapsed().as_secs_f64()
        ));
        info!(instance_id = %id, state = %state, "Started instance");
        self.last_state = Some(state);

        wait_until_running(&self.service, id, poll, log, cancel).await
    }

    /// Forget any tracked id and create a fresh instance from the image.
    async fn replace_from_image(
        &mut self,
        poll: &PollConfig,
        started: Instant,
        log: &dyn SessionLog,
        cancel: &CancellationToken,
    ) -> Result<ReadyInstance, LifecycleError> {
        let params = match &self.config.instance {
            InstanceIdentity::Image(params) => params.clone(),
            InstanceIdentity::Existing { instance_id } => {
                // Fixed mode never loses its id; nothing can be created.
                return Err(report(
                    log,
                    LifecycleError::InstanceNotFound {
                        instance_id: instance_id.clone(),
                    },
                ));
            }
        };
        self.instance_id = None;
        self.last_state = None;

        if cancel.is_cancelled() {
            log.write_line("launch cancelled before creating an instance");
            return Err(LifecycleError::Cancelled {
                instance_id: format!("from image {}", params.image_id),
            });
        }

        let id = self.create(&params, log).await?;
        log.write_line(&format!(
            "created instance [{id}] ({:.1}s elapsed)",
            started.elapsed().as_secs_f64()
        ));
        self.instance_id = Some(id.clone());
        self.last_state = Some(InstanceState::Pending);
        wait_until_running(&self.service, &id, poll, log, cancel).await
    }

    async fn create(
        &self,
        params: &ImageLaunchParams,
        log: &dyn SessionLog,
    ) -> Result<String, LifecycleError> {
        log.write_line(&format!(
            "launching {} instance from image [{}] in {}",
            params.instance_type,
            params.image_id,
            params
                .availability_zone
                .as_deref()
                .unwrap_or(self.config.aws.region.as_str())
        ));

        let id = self
            .service
            .create_instance(params, &self.config.name)
            .await
            .map_err(|e| report(log, LifecycleError::service("create", None, e)))?;

        info!(
            instance_id = %id,
            image_id = %params.image_id,
            instance_type = %params.instance_type,
            "Created instance"
        );
        Ok(id)
    }

    /// Stop or terminate the tracked instance, per the configured action.
    ///
    /// Failures are logged and returned as [`TeardownOutcome::Failed`], never
    /// raised, so a disconnect always completes.
    pub async fn teardown(&mut self, log: &dyn SessionLog) -> TeardownOutcome {
        let Some(id) = self.instance_id.clone() else {
            log.write_line("no instance to tear down");
            return TeardownOutcome::NothingToDo;
        };
        let started = Instant::now();
        let last = describe_last(self.last_state.as_ref());

        match self.config.teardown {
            TeardownAction::Stop => {
                log.write_line(&format!("stopping instance [{id}] (last seen [{last}])"));
                match self.service.stop_instance(&id).await {
                    Ok(state) => {
                        log.write_line(&format!(
                            "stop requested for instance [{id}], now [{state}] ({:.1}s elapsed)",
                            started.elapsed().as_secs_f64()
                        ));
                        info!(instance_id = %id, state = %state, "Stopped instance");
                        self.last_state = Some(state.clone());
                        TeardownOutcome::Stopped(state)
                    }
                    Err(e) => TeardownOutcome::Failed(absorb(log, "stop", &id, &last, e)),
                }
            }
            TeardownAction::Terminate => {
                log.write_line(&format!("terminating instance [{id}] (last seen [{last}])"));
                match self.service.terminate_instance(&id).await {
                    Ok(state) => {
                        self.instance_id = None;
                        self.last_state = None;
                        log.write_line(&format!(
                            "terminate requested for instance [{id}], now [{state}] ({:.1}s elapsed)",
                            started.elapsed().as_secs_f64()
                        ));
                        info!(instance_id = %id, state = %state, "Terminated instance");
                        TeardownOutcome::Terminated(state)
                    }
                    Err(e) => TeardownOutcome::Failed(absorb(log, "terminate", &id, &last, e)),
                }
            }
        }
    }

    /// Whether the tracked instance currently reports running.
    pub async fn is_instance_running(&self) -> Result<bool, ServiceError> {
        let Some(id) = self.instance_id.as_deref() else {
            return Ok(false);
        };
        match self.service.describe_instance(id).await {
            Ok(desc) => Ok(desc.state == InstanceState::Running),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Swap in a validated configuration.
    ///
    /// A changed identity drops the tracked id; callers must first make sure
    /// the old instance is not running.
    pub fn replace_config(&mut self, config: NodeConfig) {
        if config.instance != self.config.instance {
            self.instance_id = config.instance.existing_instance_id().map(str::to_string);
            self.last_state = None;
        }
        self.config = config;
    }
}

fn describe_last(state: Option<&InstanceState>) -> String {
    state.map_or_else(|| "unknown".to_string(), ToString::to_string)
}

/// Write a lifecycle failure to the session log, with a hint for known codes.
fn report(log: &dyn SessionLog, err: LifecycleError) -> LifecycleError {
    log.error(&err.to_string());
    if let LifecycleError::Service { source, .. } = &err {
        if let Some(hint) = source.code().and_then(suggestion_for_code) {
            log.write_line(&format!("hint: {hint}"));
        }
    }
    warn!(error = %err, "Lifecycle operation failed");
    err
}

fn absorb(
    log: &dyn SessionLog,
    operation: &'static str,
    id: &str,
    last: &str,
    e: ServiceError,
) -> LifecycleError {
    let err = LifecycleError::service(operation, Some(id), e);
    log.error(&format!(
        "{err}; instance [{id}] (last seen [{last}]) may still be running"
    ));
    if let LifecycleError::Service { source, .. } = &err {
        if let Some(hint) = source.code().and_then(suggestion_for_code) {
            log.write_line(&format!("hint: {hint}"));
        }
    }
    error!(instance_id = %id, operation, error = %err, "Teardown failed, instance may still be running");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec2_agent_common::SessionBuffer;
    use ec2_agent_test_utils::{
        FakeInstanceService, TEST_ADDRESS, TEST_IMAGE_ID, TEST_INSTANCE_ID, fixed_config,
        image_config,
    };
    use InstanceState::*;

    fn controller(
        service: FakeInstanceService,
        config: NodeConfig,
    ) -> LifecycleController<FakeInstanceService> {
        LifecycleController::new(service, config)
    }

    async fn launch(
        ctl: &mut LifecycleController<FakeInstanceService>,
        log: &SessionBuffer,
    ) -> Result<ReadyInstance, LifecycleError> {
        ctl.ensure_running_and_ready(log, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn already_running_skips_start() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Running]),
            fixed_config(),
        );
        let log = SessionBuffer::default();

        let ready = launch(&mut ctl, &log).await.unwrap();

        assert_eq!(ready.address, TEST_ADDRESS);
        let calls = ctl.service().calls();
        assert_eq!(calls.start, 0);
        assert_eq!(calls.create, 0);
        assert_eq!(calls.describe, 1);
        assert!(log.contains("already running"));
    }

    #[tokio::test]
    async fn stopped_instance_is_started() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Stopped, Pending, Running]),
            fixed_config(),
        );

        let ready = launch(&mut ctl, &SessionBuffer::default()).await.unwrap();

        assert_eq!(ready.instance_id, TEST_INSTANCE_ID);
        assert_eq!(ctl.service().calls().start, 1);
        assert_eq!(ctl.service().calls().describe, 3);
    }

    #[tokio::test]
    async fn stopping_instance_waits_then_starts() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Stopping, Stopping, Stopped, Running]),
            fixed_config(),
        );

        launch(&mut ctl, &SessionBuffer::default()).await.unwrap();

        assert_eq!(ctl.service().calls().start, 1);
        assert_eq!(ctl.service().calls().describe, 4);
    }

    #[tokio::test]
    async fn running_without_address_polls_again() {
        let service = FakeInstanceService::new();
        service.push_running_without_address();
        service.push_states([Running]);
        let mut ctl = controller(service, fixed_config());

        let ready = launch(&mut ctl, &SessionBuffer::default()).await.unwrap();

        assert_eq!(ready.address, TEST_ADDRESS);
        assert_eq!(ctl.service().calls().start, 0);
    }

    #[tokio::test]
    async fn relaunch_after_stop_uses_start_not_create() {
        let service = FakeInstanceService::new().with_states([Stopped, Running]);
        let mut ctl = controller(service, fixed_config());
        let log = SessionBuffer::default();

        launch(&mut ctl, &log).await.unwrap();
        assert!(matches!(ctl.teardown(&log).await, TeardownOutcome::Stopped(Stopping)));

        ctl.service().push_states([Stopped, Pending, Running]);
        launch(&mut ctl, &log).await.unwrap();

        let calls = ctl.service().calls();
        assert_eq!(calls.create, 0);
        assert_eq!(calls.start, 2);
        assert_eq!(calls.stop, 1);
    }

    #[tokio::test]
    async fn image_mode_creates_when_no_instance_exists() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Pending, Running]),
            image_config(),
        );
        assert_eq!(ctl.instance_id(), None);

        let ready = launch(&mut ctl, &SessionBuffer::default()).await.unwrap();

        assert_eq!(ready.instance_id, TEST_INSTANCE_ID);
        assert_eq!(ctl.instance_id(), Some(TEST_INSTANCE_ID));
        assert_eq!(ctl.service().calls().create, 1);
        assert_eq!(ctl.service().calls().start, 0);
        assert_eq!(
            ctl.service().created_with().map(|p| p.image_id),
            Some(TEST_IMAGE_ID.to_string())
        );
    }

    #[tokio::test]
    async fn image_mode_reuses_stopped_instance() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Running]),
            image_config(),
        );
        let log = SessionBuffer::default();
        launch(&mut ctl, &log).await.unwrap();
        ctl.teardown(&log).await;

        ctl.service().push_states([Stopped, Running]);
        launch(&mut ctl, &log).await.unwrap();

        assert_eq!(ctl.service().calls().create, 1);
        assert_eq!(ctl.service().calls().start, 1);
    }

    #[tokio::test]
    async fn fixed_mode_terminated_is_terminal() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Terminated]),
            fixed_config(),
        );
        let log = SessionBuffer::default();

        let err = launch(&mut ctl, &log).await.unwrap_err();

        assert!(matches!(err, LifecycleError::InstanceTerminated { .. }));
        assert_eq!(ctl.service().calls().start, 0);
        assert_eq!(ctl.service().calls().create, 0);
        assert!(log.contains("ERROR: Instance i-0123456789abcdef0 is terminated"));
    }

    #[tokio::test]
    async fn image_mode_terminated_is_replaced() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Terminated, Running]),
            image_config(),
        )
        .with_instance_id("i-0fffffffffffffff0");

        let ready = launch(&mut ctl, &SessionBuffer::default()).await.unwrap();

        assert_eq!(ready.instance_id, TEST_INSTANCE_ID);
        assert_eq!(ctl.service().calls().create, 1);
    }

    #[tokio::test]
    async fn fixed_mode_missing_instance_fails() {
        let mut ctl = controller(FakeInstanceService::new(), fixed_config());

        let err = launch(&mut ctl, &SessionBuffer::default()).await.unwrap_err();

        assert!(matches!(err, LifecycleError::InstanceNotFound { .. }));
    }

    #[tokio::test]
    async fn shutting_down_is_unexpected() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([ShuttingDown]),
            fixed_config(),
        );

        let err = launch(&mut ctl, &SessionBuffer::default()).await.unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::UnexpectedState {
                state: ShuttingDown,
                goal: Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn start_failure_is_surfaced_with_hint() {
        let service = FakeInstanceService::new()
            .with_states([Stopped])
            .fail_start(ServiceError::Api {
                code: Some("IncorrectInstanceState".to_string()),
                message: "instance is not in a state from which it can be started".to_string(),
            });
        let mut ctl = controller(service, fixed_config());
        let log = SessionBuffer::default();

        let err = launch(&mut ctl, &log).await.unwrap_err();

        assert!(matches!(err, LifecycleError::Service { operation: "start", .. }));
        assert_eq!(ctl.service().calls().describe, 1);
        assert!(log.contains("hint:"));
    }

    #[tokio::test]
    async fn transient_first_describe_is_retried() {
        let service = FakeInstanceService::new();
        service.push_describe_error(ServiceError::Throttled);
        service.push_states([Running]);
        let mut ctl = controller(service, fixed_config());

        let ready = launch(&mut ctl, &SessionBuffer::default()).await.unwrap();

        assert_eq!(ready.address, TEST_ADDRESS);
        assert_eq!(ctl.service().calls().describe, 2);
        assert_eq!(ctl.service().calls().start, 0);
    }

    #[tokio::test]
    async fn persistent_describe_failure_spends_the_budget() {
        let service = FakeInstanceService::new();
        service.push_describe_error(ServiceError::Throttled);
        let mut ctl = controller(service, fixed_config());
        let log = SessionBuffer::default();

        let err = launch(&mut ctl, &log).await.unwrap_err();

        assert!(matches!(err, LifecycleError::Service { operation: "describe", .. }));
        assert_eq!(ctl.service().calls().describe, 10);
        assert_eq!(ctl.service().calls().start, 0);
        assert!(log.contains("ERROR: Failed to describe instance"));
    }

    #[tokio::test]
    async fn lifecycle_lines_carry_state_and_elapsed_time() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Stopped, Running]),
            fixed_config(),
        );
        let log = SessionBuffer::default();

        launch(&mut ctl, &log).await.unwrap();
        ctl.teardown(&log).await;

        let id = TEST_INSTANCE_ID;
        assert!(log.contains(&format!("starting instance [{id}] (last seen [stopped], ")));
        assert!(log.contains(&format!("start requested for instance [{id}], now [pending] (")));
        assert!(log.contains(&format!("stopping instance [{id}] (last seen [running])")));
        assert!(log.contains(&format!("stop requested for instance [{id}], now [stopping] (")));
        assert!(
            log.snapshot()
                .iter()
                .filter(|line| line.contains("requested for instance"))
                .all(|line| line.ends_with("s elapsed)"))
        );
        assert_eq!(ctl.last_state(), Some(&Stopping));
    }

    #[tokio::test]
    async fn teardown_twice_is_harmless() {
        let mut ctl = controller(
            FakeInstanceService::new().with_states([Stopped]),
            fixed_config(),
        );
        let log = SessionBuffer::default();

        assert!(!ctl.teardown(&log).await.is_failed());
        assert!(!ctl.teardown(&log).await.is_failed());

        assert_eq!(ctl.service().calls().stop, 2);
    }

    #[tokio::test]
    async fn teardown_without_instance_is_a_no_op() {
        let mut ctl = controller(FakeInstanceService::new(), image_config());

        let outcome = ctl.teardown(&SessionBuffer::default()).await;

        assert!(matches!(outcome, TeardownOutcome::NothingToDo));
        assert_eq!(ctl.service().calls().stop, 0);
    }

    #[tokio::test]
    async fn teardown_failure_is_absorbed() {
        let service = FakeInstanceService::new().fail_stop(ServiceError::Throttled);
        let mut ctl = controller(service, fixed_config());
        let log = SessionBuffer::default();

        let outcome = ctl.teardown(&log).await;

        assert!(outcome.is_failed());
        assert!(log.contains("may still be running"));
    }

    #[tokio::test]
    async fn terminate_forgets_the_instance() {
        let mut config = image_config();
        config.teardown = TeardownAction::Terminate;
        let mut ctl = controller(FakeInstanceService::new().with_states([Running]), config);
        let log = SessionBuffer::default();
        launch(&mut ctl, &log).await.unwrap();

        let outcome = ctl.teardown(&log).await;

        assert!(matches!(outcome, TeardownOutcome::Terminated(ShuttingDown)));
        assert_eq!(ctl.instance_id(), None);
        assert_eq!(ctl.service().calls().terminate, 1);
    }

    #[tokio::test]
    async fn is_instance_running_reflects_describe() {
        let ctl = controller(
            FakeInstanceService::new().with_states([Running, Stopped]),
            fixed_config(),
        );
        assert!(ctl.is_instance_running().await.unwrap());
        assert!(!ctl.is_instance_running().await.unwrap());

        let ctl = controller(FakeInstanceService::new(), image_config());
        assert!(!ctl.is_instance_running().await.unwrap());
        assert_eq!(ctl.service().calls().describe, 0);
    }

    #[test]
    fn replace_config_resets_identity() {
        let mut ctl = controller(FakeInstanceService::new(), fixed_config());
        assert_eq!(ctl.instance_id(), Some(TEST_INSTANCE_ID));

        let mut same_identity = fixed_config();
        same_identity.polling.max_retries = 3;
        ctl.replace_config(same_identity);
        assert_eq!(ctl.instance_id(), Some(TEST_INSTANCE_ID));
        assert_eq!(ctl.config().polling.max_retries, 3);

        ctl.replace_config(image_config());
        assert_eq!(ctl.instance_id(), None);
    }
}
