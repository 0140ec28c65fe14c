//! failwatch pipeline - watch, settle, extract
//!
//! Watches directory trees for newly arriving archives and runs failing-log
//! extraction on each one once it has finished being written.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐    ┌──────────────┐    ┌─────────────┐    ┌────────────┐    ┌───────────┐
//! │ WatchSource│───▶│WatchDispatcher───▶│  Debouncer  │───▶│ WorkerPool │───▶│  Handler  │
//! │  (notify)  │    │ (extension)  │    │ (per path)  │    │ probe, run │    │ (extract) │
//! └────────────┘    └──────────────┘    └─────────────┘    └────────────┘    └───────────┘
//!        ▲                  │
//!        │                  ▼ root failures
//!        └──────────── Orchestrator (lifecycle, control channel, shutdown)
//! ```
//!
//! # Core Concepts
//!
//! - **WatchRoot**: an absolute directory, watched recursively or not
//! - **Debouncer**: at most one active job per path; duplicates dropped
//! - **StabilityProbe**: waits until the file size stops changing
//! - **WorkerPool**: bounded std threads; job failures and panics contained
//! - **Orchestrator**: `Stopped -> Starting -> Running -> Stopping -> Stopped`

pub mod cancel;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod intake;
pub mod orchestrator;
pub mod pool;
pub mod stability;
pub mod stats;
pub mod watch;

// Re-exports for convenience
pub use cancel::ShutdownToken;
pub use config::{DestinationPlan, OutputLayout, PipelineConfig, WatchBackend};
pub use debounce::{Admission, AdmissionTicket, Debouncer, PendingJob};
pub use dispatch::{Dispatch, WatchDispatcher};
pub use error::{ConfigError, OrchestratorError, PoolError, Result, WatchError};
pub use handler::{ArchiveHandler, ExtractionTask, FailLogHandler};
pub use intake::{Intake, Offer};
pub use orchestrator::{
    prepare_output_root, resolve_watch_roots, ControlEvent, LifecycleState, Orchestrator,
    ShutdownHandle, ShutdownReport,
};
pub use pool::{DrainReport, JobError, JobResult, PoolStats, WorkerPool};
pub use stability::{Stability, StabilityConfig, StabilityProbe};
pub use stats::{RunStats, StatsSnapshot};
pub use watch::{
    classify, ChangeEvent, ChangeKind, NoticeSink, NotifySource, Subscription, WatchNotice,
    WatchRoot, WatchSource,
};
