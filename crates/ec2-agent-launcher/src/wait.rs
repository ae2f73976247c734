//! Instance state polling with a bounded retry budget and cancellation.
//!
//! Each wait makes at most `max_retries` describe calls, sleeping
//! `poll_interval` between them. Transitional states (`pending`, `stopping`)
//! and transient describe failures consume an attempt and retry; any other
//! state fails immediately because it will not resolve by itself.

use crate::lifecycle::{LifecycleError, ReadyInstance};
use backon::{BackoffBuilder, ConstantBuilder};
use ec2_agent_common::{InstanceDescription, InstanceService, InstanceState, PollSettings, SessionLog};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runtime polling parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum describe calls per wait
    pub max_retries: u32,
    /// Delay between describe calls
    pub poll_interval: Duration,
    /// Hold after reaching running, before the address is handed off
    pub settle_delay: Duration,
}

impl From<&PollSettings> for PollConfig {
    fn from(settings: &PollSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            poll_interval: settings.poll_interval(),
            settle_delay: settings.settle_delay(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl PollConfig {
    /// Same budget, no settle delay
    pub fn without_settle(&self) -> Self {
        Self {
            settle_delay: Duration::ZERO,
            ..self.clone()
        }
    }
}

/// Sleep for `delay`, returning `false` if `cancel` fired first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Wait until the instance is running with a public address, then hold for
/// the settle delay.
pub async fn wait_until_running<S: InstanceService>(
    service: &S,
    instance_id: &str,
    config: &PollConfig,
    log: &dyn SessionLog,
    cancel: &CancellationToken,
) -> Result<ReadyInstance, LifecycleError> {
    let ready = poll_state(
        service,
        instance_id,
        &InstanceState::Running,
        config,
        log,
        cancel,
        |desc| match desc.public_address {
            Some(address) => Ok(ReadyInstance {
                instance_id: desc.instance_id,
                address,
            }),
            None => Err("running but has no public address yet".to_string()),
        },
    )
    .await?;

    if !config.settle_delay.is_zero() {
        log.write_line(&format!(
            "instance [{instance_id}] is running at {}, waiting {}s for it to finish booting",
            ready.address,
            config.settle_delay.as_secs()
        ));
        if !sleep_or_cancel(config.settle_delay, cancel).await {
            return Err(cancelled(instance_id, log));
        }
    }

    info!(instance_id = %instance_id, address = %ready.address, "Instance is ready");
    Ok(ready)
}

/// Wait until the instance reports stopped.
pub async fn wait_until_stopped<S: InstanceService>(
    service: &S,
    instance_id: &str,
    config: &PollConfig,
    log: &dyn SessionLog,
    cancel: &CancellationToken,
) -> Result<(), LifecycleError> {
    poll_state(
        service,
        instance_id,
        &InstanceState::Stopped,
        config,
        log,
        cancel,
        |_| Ok(()),
    )
    .await
}

/// Describe the instance, retrying transient failures at the poll cadence
/// within the same budget as a wait.
///
/// Returns `Ok(None)` when the instance does not exist. Non-retryable
/// failures, and the last transient one once the budget is spent, come back
/// as [`LifecycleError::Service`] without being written to `log`.
pub async fn describe_with_retry<S: InstanceService>(
    service: &S,
    instance_id: &str,
    config: &PollConfig,
    log: &dyn SessionLog,
    cancel: &CancellationToken,
) -> Result<Option<InstanceDescription>, LifecycleError> {
    let start = Instant::now();
    let max = config.max_retries;
    let mut delays = ConstantBuilder::default()
        .with_delay(config.poll_interval)
        .with_max_times(max as usize)
        .build();
    let mut attempt = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(cancelled(instance_id, log));
        }

        match service.describe_instance(instance_id).await {
            Ok(desc) => return Ok(Some(desc)),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) if e.is_retryable() && attempt < max => {
                let delay = delays.next().unwrap_or(config.poll_interval);
                log.write_line(&format!(
                    "instance [{instance_id}] could not be described: {e} (attempt {attempt}/{max}, {:.1}s elapsed), waiting {}s before retrying",
                    start.elapsed().as_secs_f64(),
                    delay.as_secs()
                ));
                warn!(instance_id = %instance_id, attempt, error = %e, "Failed to describe instance");
                if !sleep_or_cancel(delay, cancel).await {
                    return Err(cancelled(instance_id, log));
                }
            }
            Err(e) => return Err(LifecycleError::service("describe", Some(instance_id), e)),
        }
    }
}

/// Core poll loop.
///
/// `at_goal` runs when the instance reports `goal`; returning `Err(reason)`
/// means "at goal but not usable yet" and consumes an attempt like a
/// transitional state does.
async fn poll_state<S, T, F>(
    service: &S,
    instance_id: &str,
    goal: &InstanceState,
    config: &PollConfig,
    log: &dyn SessionLog,
    cancel: &CancellationToken,
    mut at_goal: F,
) -> Result<T, LifecycleError>
where
    S: InstanceService,
    F: FnMut(InstanceDescription) -> Result<T, String>,
{
    let start = Instant::now();
    let max = config.max_retries;
    let mut delays = ConstantBuilder::default()
        .with_delay(config.poll_interval)
        .with_max_times(max as usize)
        .build();

    for attempt in 1..=max {
        if cancel.is_cancelled() {
            return Err(cancelled(instance_id, log));
        }

        let progress = format!(
            "attempt {attempt}/{max}, {:.1}s elapsed",
            start.elapsed().as_secs_f64()
        );

        let reason = match service.describe_instance(instance_id).await {
            Ok(desc) if desc.state == *goal => {
                let state = desc.state.clone();
                match at_goal(desc) {
                    Ok(value) => {
                        log.write_line(&format!(
                            "instance [{instance_id}] is [{state}] ({progress})"
                        ));
                        debug!(instance_id = %instance_id, state = %state, attempt, "Reached goal state");
                        return Ok(value);
                    }
                    Err(reason) => format!("is [{state}] but {reason}"),
                }
            }
            Ok(desc) if desc.state.is_transitional() => format!("is [{}]", desc.state),
            Ok(desc) => {
                let err = LifecycleError::UnexpectedState {
                    instance_id: instance_id.to_string(),
                    state: desc.state,
                    goal: goal.clone(),
                };
                log.error(&format!("{err} ({progress}). Aborting"));
                warn!(instance_id = %instance_id, attempt, error = %err, "Unexpected instance state");
                return Err(err);
            }
            Err(e) if e.is_not_found() => {
                let err = LifecycleError::InstanceNotFound {
                    instance_id: instance_id.to_string(),
                };
                log.error(&format!("{err} ({progress})"));
                return Err(err);
            }
            Err(e) if e.is_retryable() => {
                warn!(instance_id = %instance_id, attempt, error = %e, "Failed to describe instance");
                format!("could not be described: {e}")
            }
            Err(e) => {
                log.error(&format!("failed to describe instance [{instance_id}]: {e} ({progress})"));
                return Err(LifecycleError::service("describe", Some(instance_id), e));
            }
        };

        if attempt == max {
            log.write_line(&format!("instance [{instance_id}] {reason} ({progress})"));
            break;
        }

        let delay = delays.next().unwrap_or(config.poll_interval);
        log.write_line(&format!(
            "instance [{instance_id}] {reason} ({progress}), waiting {}s before retrying",
            delay.as_secs()
        ));
        debug!(
            instance_id = %instance_id,
            attempt,
            delay_ms = delay.as_millis(),
            "Instance not ready, retrying"
        );

        if !sleep_or_cancel(delay, cancel).await {
            return Err(cancelled(instance_id, log));
        }
    }

    let err = LifecycleError::RetriesExhausted {
        instance_id: instance_id.to_string(),
        goal: goal.clone(),
        max_retries: max,
    };
    log.error(&format!("{err}. Aborting"));
    warn!(instance_id = %instance_id, max_retries = max, "Retry budget exhausted");
    Err(err)
}

fn cancelled(instance_id: &str, log: &dyn SessionLog) -> LifecycleError {
    log.write_line(&format!("wait for instance [{instance_id}] cancelled"));
    info!(instance_id = %instance_id, "Wait cancelled");
    LifecycleError::Cancelled {
        instance_id: instance_id.to_string(),
    }
}
