//! Polls a server until it reaches a condition
//!
//! Always talks to the uncached provider. Transient errors only cost one
//! poll interval; permanent errors end the wait.

use hostflow_cloud::{CallContext, CloudError, ProviderClient, ServerObservation};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the caller waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor<'a> {
    Running,
    RunningAtSize(&'a str),
    Gone,
}

impl WaitFor<'_> {
    fn is_met(&self, observation: &ServerObservation) -> bool {
        match self {
            WaitFor::Running => observation.status.is_ready(),
            WaitFor::RunningAtSize(size) => observation.status.is_ready() && observation.size == *size,
            WaitFor::Gone => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Condition met; `None` for [`WaitFor::Gone`]
    Reached(Option<ServerObservation>),
    TimedOut { last: Option<ServerObservation> },
}

#[derive(Debug, Clone)]
pub struct Poller {
    pub interval: Duration,
    pub call_timeout: Duration,
}

impl Poller {
    pub fn new(interval: Duration, call_timeout: Duration) -> Self {
        Self {
            interval,
            call_timeout,
        }
    }

    pub async fn wait(
        &self,
        provider: &dyn ProviderClient,
        provider_resource_id: &str,
        condition: WaitFor<'_>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, CloudError> {
        let deadline = Instant::now() + timeout;
        let parent = CallContext::with_deadline(deadline).with_cancel(cancel.child_token());
        let mut last = None;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            let ctx = parent.child(self.call_timeout);

            match provider.get(provider_resource_id, &ctx).await {
                Ok(observation) => {
                    if condition.is_met(&observation) {
                        tracing::debug!(
                            provider_resource_id,
                            polls,
                            status = %observation.status,
                            "Wait condition reached"
                        );
                        return Ok(PollOutcome::Reached(Some(observation)));
                    }
                    tracing::debug!(
                        provider_resource_id,
                        polls,
                        status = %observation.status,
                        size = %observation.size,
                        "Still waiting"
                    );
                    last = Some(observation);
                }
                Err(e) if e.is_not_found() && condition == WaitFor::Gone => {
                    return Ok(PollOutcome::Reached(None));
                }
                Err(e) if cancel.is_cancelled() => return Err(e),
                Err(e) if e.is_transient() => {
                    tracing::warn!(provider_resource_id, polls, error = %e, "Poll failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + self.interval > deadline {
                return Ok(PollOutcome::TimedOut { last });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CloudError::Cancelled(format!(
                        "waiting for {} was cancelled",
                        provider_resource_id
                    )));
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
