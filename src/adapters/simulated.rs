use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};

use crate::core::hardware::{MountEntry, MountTable};

#[derive(Default)]
struct SimulatedState {
    mounts: Vec<MountEntry>,
    capacities: HashMap<PathBuf, u64>,
    failing_queries: u32,
}

/// In-memory mount table driven by a [`Simulator`].
#[derive(Clone, Default)]
pub struct SimulatedMountTable {
    state: Arc<Mutex<SimulatedState>>,
}

/// Controller used to plug and unplug simulated devices.
#[derive(Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimulatedState>>,
}

fn lock(state: &Mutex<SimulatedState>) -> MutexGuard<'_, SimulatedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedMountTable {
    pub fn new() -> (Self, Simulator) {
        let table = Self::default();
        let simulator = Simulator {
            state: table.state.clone(),
        };
        (table, simulator)
    }
}

impl Simulator {
    /// Mount `device` at `mount_point`. A size of zero makes capacity lookups fail.
    pub fn attach(&self, device: &str, mount_point: impl Into<PathBuf>, size_gb: u64) {
        let mount_point = mount_point.into();
        let mut state = lock(&self.state);

        state.mounts.retain(|m| m.mount_point != mount_point);
        state.mounts.push(MountEntry {
            device: device.to_string(),
            mount_point: mount_point.clone(),
            filesystem: "vfat".to_string(),
        });
        if size_gb > 0 {
            state
                .capacities
                .insert(mount_point, size_gb * 1024 * 1024 * 1024);
        } else {
            state.capacities.remove(&mount_point);
        }
    }

    pub fn detach(&self, mount_point: impl AsRef<Path>) {
        let mount_point = mount_point.as_ref();
        let mut state = lock(&self.state);
        state.mounts.retain(|m| m.mount_point != mount_point);
        state.capacities.remove(mount_point);
    }

    /// Make the next `count` mount-table queries fail.
    pub fn fail_next_queries(&self, count: u32) {
        lock(&self.state).failing_queries = count;
    }
}

impl MountTable for SimulatedMountTable {
    fn mounts(&self) -> Result<Vec<MountEntry>> {
        let mut state = lock(&self.state);
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            bail!("simulated mount table failure");
        }
        Ok(state.mounts.clone())
    }

    fn capacity(&self, mount_point: &Path) -> Result<u64> {
        lock(&self.state)
            .capacities
            .get(mount_point)
            .copied()
            .ok_or_else(|| anyhow!("no capacity known for {}", mount_point.display()))
    }
}
