//! Scripted instance service
//!
//! Each describe call pops the next scripted observation. Once the script
//! runs out, the last observation repeats forever, which is how "stuck in
//! pending" scenarios are expressed.

use crate::journal::Journal;
use ec2_agent_common::{
    ImageLaunchParams, InstanceDescription, InstanceService, InstanceState, ServiceError,
};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Instance id reported by the fake
pub const TEST_INSTANCE_ID: &str = "i-0123456789abcdef0";

/// Public address reported for running instances
pub const TEST_ADDRESS: &str = "ec2-203-0-113-10.us-west-1.compute.amazonaws.com";

/// Number of calls made to each operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub describe: usize,
    pub create: usize,
    pub start: usize,
    pub stop: usize,
    pub terminate: usize,
}

#[derive(Debug, Default)]
struct State {
    script: VecDeque<Result<InstanceDescription, ServiceError>>,
    last: Option<Result<InstanceDescription, ServiceError>>,
    calls: CallCounts,
    created_with: Option<ImageLaunchParams>,
    create_error: Option<ServiceError>,
    start_error: Option<ServiceError>,
    stop_error: Option<ServiceError>,
}

/// An [`InstanceService`] that replays a script of observations
#[derive(Debug)]
pub struct FakeInstanceService {
    instance_id: String,
    journal: Journal,
    state: Mutex<State>,
}

impl Default for FakeInstanceService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeInstanceService {
    pub fn new() -> Self {
        Self {
            instance_id: TEST_INSTANCE_ID.to_string(),
            journal: Journal::default(),
            state: Mutex::new(State::default()),
        }
    }

    /// Record every call into `journal`
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Script a sequence of states; running states get [`TEST_ADDRESS`]
    pub fn with_states(self, states: impl IntoIterator<Item = InstanceState>) -> Self {
        self.push_states(states);
        self
    }

    /// Append states to the script after construction
    pub fn push_states(&self, states: impl IntoIterator<Item = InstanceState>) {
        let mut guard = self.lock();
        for state in states {
            let public_address = (state == InstanceState::Running).then(|| TEST_ADDRESS.to_string());
            guard.script.push_back(Ok(InstanceDescription {
                instance_id: self.instance_id.clone(),
                state,
                public_address,
            }));
        }
    }

    /// Append a running observation that has no public address yet
    pub fn push_running_without_address(&self) {
        self.lock().script.push_back(Ok(InstanceDescription {
            instance_id: self.instance_id.clone(),
            state: InstanceState::Running,
            public_address: None,
        }));
    }

    /// Append a failing describe call
    pub fn push_describe_error(&self, error: ServiceError) {
        self.lock().script.push_back(Err(error));
    }

    pub fn fail_create(self, error: ServiceError) -> Self {
        self.lock().create_error = Some(error);
        self
    }

    pub fn fail_start(self, error: ServiceError) -> Self {
        self.lock().start_error = Some(error);
        self
    }

    pub fn fail_stop(self, error: ServiceError) -> Self {
        self.lock().stop_error = Some(error);
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Parameters of the most recent create call
    pub fn created_with(&self) -> Option<ImageLaunchParams> {
        self.lock().created_with.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(&self) -> ServiceError {
        ServiceError::NotFound {
            instance_id: self.instance_id.clone(),
        }
    }
}

impl InstanceService for FakeInstanceService {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescription, ServiceError> {
        self.journal.record(format!("describe:{instance_id}"));
        let mut guard = self.lock();
        guard.calls.describe += 1;
        match guard.script.pop_front() {
            Some(next) => {
                guard.last = Some(next.clone());
                next
            }
            None => guard.last.clone().unwrap_or_else(|| Err(self.not_found())),
        }
    }

    async fn create_instance(
        &self,
        params: &ImageLaunchParams,
        node_name: &str,
    ) -> Result<String, ServiceError> {
        self.journal.record(format!("create:{node_name}"));
        let mut guard = self.lock();
        guard.calls.create += 1;
        guard.created_with = Some(params.clone());
        match guard.create_error.clone() {
            Some(err) => Err(err),
            None => Ok(self.instance_id.clone()),
        }
    }

    async fn start_instance(&self, instance_id: &str) -> Result<InstanceState, ServiceError> {
        self.journal.record(format!("start:{instance_id}"));
        let mut guard = self.lock();
        guard.calls.start += 1;
        match guard.start_error.clone() {
            Some(err) => Err(err),
            None => Ok(InstanceState::Pending),
        }
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<InstanceState, ServiceError> {
        self.journal.record(format!("stop:{instance_id}"));
        let mut guard = self.lock();
        guard.calls.stop += 1;
        match guard.stop_error.clone() {
            Some(err) => Err(err),
            None => Ok(InstanceState::Stopping),
        }
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<InstanceState, ServiceError> {
        self.journal.record(format!("terminate:{instance_id}"));
        self.lock().calls.terminate += 1;
        Ok(InstanceState::ShuttingDown)
    }
}
