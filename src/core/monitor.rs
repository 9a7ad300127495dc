//! Polling monitor for removable storage.
//!
//! Every poll cycle the mount table is queried, filtered through the
//! removable predicate, and diffed against the previous snapshot. Only the
//! differences leave the monitor, as `DeviceEvent`s on a single channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::hardware::{DeviceEvent, MountTable, RemovablePredicate};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Mount points of the removable devices seen at the most recent poll,
/// in mount-table order and without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    mount_points: Vec<PathBuf>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, mount_point: &Path) -> bool {
        self.mount_points.iter().any(|m| m == mount_point)
    }

    pub fn len(&self) -> usize {
        self.mount_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mount_points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.mount_points.iter().map(PathBuf::as_path)
    }
}

impl FromIterator<PathBuf> for DeviceSnapshot {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        let mut snapshot = DeviceSnapshot::new();
        for mount_point in iter {
            if !snapshot.contains(&mount_point) {
                snapshot.mount_points.push(mount_point);
            }
        }
        snapshot
    }
}

/// Set differences between two snapshots.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// `added = current - previous`, `removed = previous - current`.
pub fn diff_snapshots(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> SnapshotDiff {
    let added = current
        .iter()
        .filter(|m| !previous.contains(m))
        .map(Path::to_path_buf)
        .collect();
    let removed = previous
        .iter()
        .filter(|m| !current.contains(m))
        .map(Path::to_path_buf)
        .collect();

    SnapshotDiff { added, removed }
}

pub struct DeviceMonitor {
    table: Arc<dyn MountTable>,
    predicate: Arc<dyn RemovablePredicate>,
    interval: Duration,
    snapshot: DeviceSnapshot,
}

impl DeviceMonitor {
    pub fn new(table: Arc<dyn MountTable>, predicate: Arc<dyn RemovablePredicate>) -> Self {
        Self {
            table,
            predicate,
            interval: DEFAULT_POLL_INTERVAL,
            snapshot: DeviceSnapshot::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    /// Query the mount table for the removable devices present right now.
    pub fn scan(&self) -> Result<DeviceSnapshot> {
        let mounts = self
            .table
            .mounts()
            .context("Failed to enumerate mounted filesystems")?;

        Ok(mounts
            .into_iter()
            .filter(|entry| self.predicate.is_removable(entry))
            .map(|entry| entry.mount_point)
            .collect())
    }

    /// Run a single poll cycle and return the events it produced.
    ///
    /// On enumeration failure the stored snapshot is left untouched and the
    /// error is returned, so no device is reported as detached.
    pub fn poll_once(&mut self) -> Result<Vec<DeviceEvent>> {
        let current = self.scan()?;
        let diff = diff_snapshots(&self.snapshot, &current);

        let mut events = Vec::with_capacity(diff.added.len() + diff.removed.len());

        for mount_path in diff.added {
            let size_bytes = match self.table.capacity(&mount_path) {
                Ok(size) => size,
                Err(e) => {
                    warn!(
                        mount = %mount_path.display(),
                        error = %e,
                        "Failed to read device capacity"
                    );
                    0
                }
            };
            info!(mount = %mount_path.display(), size_bytes, "Removable device attached");
            events.push(DeviceEvent::Attached {
                mount_path,
                size_bytes,
            });
        }

        for mount_path in diff.removed {
            info!(mount = %mount_path.display(), "Removable device detached");
            events.push(DeviceEvent::Detached { mount_path });
        }

        self.snapshot = current;
        Ok(events)
    }

    /// Poll until `cancel` fires or the receiving side of `tx` is dropped.
    ///
    /// The mount table is queried on the blocking pool since `statvfs` on a
    /// sluggish device can stall.
    pub async fn run(mut self, tx: mpsc::Sender<DeviceEvent>, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Device monitor started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let (monitor, result) = match tokio::task::spawn_blocking(move || {
                let result = self.poll_once();
                (self, result)
            })
            .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Device poll task failed, stopping monitor");
                    return;
                }
            };
            self = monitor;

            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Skipping device poll cycle");
                    continue;
                }
            };

            debug!(devices = self.snapshot.len(), events = events.len(), "Device poll complete");

            for event in events {
                if tx.send(event).await.is_err() {
                    debug!("Device event receiver dropped, stopping monitor");
                    return;
                }
            }
        }

        info!("Device monitor stopped");
    }
}
