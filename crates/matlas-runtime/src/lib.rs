//! Runtime side of the matlas apply engine.
//!
//! The engine never talks to Atlas directly: every call goes through the
//! contracts in [`services`], bundled into a [`Services`] value that a run
//! owns. [`memory::InMemoryAtlas`] serves all of them from process memory.

pub mod cancel;
pub mod dispatch;
pub mod discovery;
pub mod dryrun;
pub mod error;
pub mod executor;
pub mod memory;
pub mod progress;
pub mod retry;
pub mod services;
pub mod tempuser;

pub use cancel::{CancelToken, RUN_DEADLINE};
pub use discovery::{Discoverer, Discovery};
pub use dryrun::{
    simulate, simulate_quick, simulate_thorough, DryRunMode, Prediction, SimulationReport,
};
pub use error::{ExecuteError, ServiceError, ServiceErrorKind, TempUserError};
pub use executor::{record_statuses, Executor};
pub use memory::{EmulatorOptions, Fault, InMemoryAtlas, Method};
pub use progress::{CollectingProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
pub use services::{
    AlertsService, AtlasBackend, MongoAdminService, MongoCredentials, OpenAlert, ResourceService,
    Services,
};
pub use tempuser::{AccessTier, CleanupReport, TempUserGuard, TempUserManager, TempUserRequest};
