//! hostflow Provisioner
//!
//! Turns provisioning requests into servers at a cloud provider.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   outbox    ┌───────────┐
//! │ ProvisioningService  │────────────▶│ TaskQueue │
//! └──────────┬───────────┘   relay     └─────┬─────┘
//!            │                               │ dequeue
//!            ▼                               ▼
//! ┌──────────────────────┐          ┌────────────────┐
//! │    ResourceStore     │◀─────────│   WorkerPool   │
//! └──────────────────────┘          └───────┬────────┘
//!            ▲                              │
//!            │                       ┌──────▼───────┐
//!            └───────────────────────│ Orchestrator │──▶ CachedProvider
//!                                    └──────────────┘
//! ```
//!
//! Every request writes its resource row and task in one store write. The
//! outbox relay moves tasks into the queue; workers run them through the
//! orchestrator, which talks to the provider via the retry controller and
//! the result cache. The reconciler compares provider and store on an
//! interval.

pub mod audit;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod outbox;
pub mod poller;
pub mod queue;
pub mod reconcile;
pub mod resource;
pub mod service;
pub mod store;
pub mod task;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::ProvisionerConfig;
pub use error::{ProvisionError, QueueError, Result, StoreError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Outcome};
pub use outbox::OutboxRelay;
pub use poller::{PollOutcome, Poller, WaitFor};
pub use queue::{
    DeadLetter, FailOutcome, Lane, LaneMapping, MemoryTaskQueue, QueueConfig, QueueStats,
    TaskQueue,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use resource::{
    ManagedResource, NewResource, ResourceKind, ResourceStatus, ResourceUpdate,
};
pub use service::ProvisioningService;
pub use store::{FileStore, MemoryStore, ResourceStore};
pub use task::{Delivery, Operation, OutboxEntry, ProvisioningTask, Receipt, TaskPayload};
pub use worker::{WorkerConfig, WorkerPool};
