//! Starts synchronization runs for a selected device, one at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use super::models::{SyncOutcome, SyncRequest};
use super::progress::SyncProgress;
use super::registry::Device;
use super::synchronizer::TreeSynchronizer;
use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("please select a USB drive first")]
    NoDestination,

    #[error("a migration is already running")]
    AlreadyRunning,

    #[error("could not determine the directory to migrate")]
    NoSource,
}

/// A running migration. Progress arrives on `progress`; the terminal outcome
/// is delivered once through [`MigrationHandle::wait`].
pub struct MigrationHandle {
    pub run_id: Uuid,
    pub request: SyncRequest,
    pub progress: mpsc::UnboundedReceiver<SyncProgress>,
    outcome: oneshot::Receiver<SyncOutcome>,
    cancel: CancellationToken,
}

impl MigrationHandle {
    /// Stop the run before its next file copy.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<SyncOutcome> {
        self.outcome
            .await
            .context("Synchronization task ended without reporting an outcome")
    }
}

/// Clears the active flag when the run finishes, even by panic.
struct ActiveRun(Arc<AtomicBool>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct Migrator {
    config: Arc<AppConfig>,
    active: Arc<AtomicBool>,
}

impl Migrator {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Build the request that copies the source tree to
    /// `<mount>/<backup_dir_name>`.
    pub fn request_for(&self, device: &Device) -> Result<SyncRequest, MigrateError> {
        let source_root = self.config.source_root().ok_or(MigrateError::NoSource)?;
        let destination_root: PathBuf = device.mount_path.join(&self.config.backup_dir_name);

        Ok(SyncRequest::new(source_root, destination_root)
            .with_excluded_substrings(self.config.exclude_substrings.clone()))
    }

    /// Spawn a run on the blocking pool. Must be called from within a Tokio
    /// runtime.
    pub fn start(&self, destination: Option<&Device>) -> Result<MigrationHandle, MigrateError> {
        let device = destination.ok_or(MigrateError::NoDestination)?;
        let request = self.request_for(device)?;

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(device = %device.name, "Rejected migration request, another run is active");
            return Err(MigrateError::AlreadyRunning);
        }
        let guard = ActiveRun(self.active.clone());

        let run_id = Uuid::now_v7();
        let (mut progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        info!(
            run_id = %run_id,
            device = %device.label(),
            source = %request.source_root.display(),
            destination = %request.destination_root.display(),
            "Starting migration"
        );

        let synchronizer = TreeSynchronizer {
            sync_files: self.config.sync_files,
        };
        let task_request = request.clone();
        let task_cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            let span = info_span!("migration", run_id = %run_id);
            let outcome = span.in_scope(|| {
                synchronizer.synchronize(&task_request, &mut progress_tx, &task_cancel)
            });

            drop(guard);
            if outcome_tx.send(outcome).is_err() {
                warn!(run_id = %run_id, "Migration outcome dropped, no receiver");
            }
        });

        Ok(MigrationHandle {
            run_id,
            request,
            progress: progress_rx,
            outcome: outcome_rx,
            cancel,
        })
    }
}
