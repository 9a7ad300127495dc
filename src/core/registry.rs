//! Live list of removable devices, folded from monitor events.
//!
//! The registry is owned by whichever task consumes the monitor's channel.
//! Nothing else mutates it; a presentation layer renders `devices()`.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::Serialize;

use super::hardware::DeviceEvent;

pub const WAITING_STATUS: &str = "Waiting for USB drive...";
pub const SELECT_STATUS: &str = "Please select a USB drive for migration";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub name: String,
    pub mount_path: PathBuf,
    pub size_bytes: u64,
}

impl Device {
    pub fn new(mount_path: PathBuf, size_bytes: u64) -> Self {
        let name = mount_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| mount_path.to_string_lossy().into_owned());

        Self {
            name,
            mount_path,
            size_bytes,
        }
    }

    /// `"<name> (<size> GB)"`, size in GiB with one decimal.
    pub fn label(&self) -> String {
        format!("{} ({:.1} GB)", self.name, self.size_bytes as f64 / GIB)
    }

    fn matches(&self, query: &str) -> bool {
        self.name == query || self.label() == query || self.mount_path == Path::new(query)
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    selected: Option<PathBuf>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Attached {
                mount_path,
                size_bytes,
            } => {
                let device = Device::new(mount_path, size_bytes);
                match self
                    .devices
                    .iter_mut()
                    .find(|d| d.mount_path == device.mount_path)
                {
                    Some(existing) => *existing = device,
                    None => self.devices.push(device),
                }
            }
            DeviceEvent::Detached { mount_path } => {
                self.devices.retain(|d| d.mount_path != mount_path);
                if self.selected.as_deref() == Some(mount_path.as_path()) {
                    self.selected = None;
                }
            }
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Select a device by name, label, or mount path.
    pub fn select(&mut self, query: &str) -> Result<&Device> {
        let Some(device) = self.devices.iter().find(|d| d.matches(query)) else {
            bail!("No removable device matches '{}'", query);
        };
        self.selected = Some(device.mount_path.clone());
        Ok(device)
    }

    pub fn selected(&self) -> Option<&Device> {
        let mount_path = self.selected.as_ref()?;
        self.devices.iter().find(|d| &d.mount_path == mount_path)
    }

    pub fn status_line(&self) -> &'static str {
        if self.devices.is_empty() {
            WAITING_STATUS
        } else {
            SELECT_STATUS
        }
    }
}
