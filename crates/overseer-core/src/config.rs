use std::time::Duration;

/// Tunables for the controller runtime and the state machine's requeue
/// cadence.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum reconciliations in flight at once.
    pub workers: usize,
    /// Work-queue depth before enqueues start to apply backpressure.
    pub queue_depth: usize,
    /// Backoff between polls while an external party has not answered yet
    /// (approval pending, human reply pending, sub-agent running).
    pub poll_interval: Duration,
    /// Backoff after a transient transport failure.
    pub transport_backoff: Duration,
    /// Deadline for a single reconciliation. A reconciliation cut off here
    /// leaves the record untouched and relies on re-enqueue.
    pub reconcile_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
            poll_interval: Duration::from_secs(5),
            transport_backoff: Duration::from_secs(15),
            reconcile_timeout: Duration::from_secs(30),
        }
    }
}
