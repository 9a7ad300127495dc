pub mod exclusion;
pub mod hardware;
pub mod migrator;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod synchronizer;

pub use exclusion::ExclusionRules;
pub use hardware::{DeviceEvent, DevicePattern, MountEntry, MountTable, RemovablePredicate};
pub use migrator::{MigrateError, MigrationHandle, Migrator};
pub use models::{SyncError, SyncOutcome, SyncPhase, SyncRequest};
pub use monitor::{DeviceMonitor, DeviceSnapshot, diff_snapshots};
pub use orchestrator::Orchestrator;
pub use progress::{NullSink, ProgressSink, SyncProgress};
pub use registry::{Device, DeviceRegistry};
pub use synchronizer::TreeSynchronizer;
