use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::AppContext;
use crate::core::hardware::DeviceEvent;
use crate::core::migrator::Migrator;
use crate::core::monitor::DeviceMonitor;
use crate::core::registry::DeviceRegistry;

/// Host-side composition: owns the device registry and feeds it from the
/// monitor's event channel.
pub struct Orchestrator {
    ctx: AppContext,
    registry: DeviceRegistry,
    migrator: Migrator,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        let migrator = Migrator::new(Arc::clone(&ctx.config));
        Self {
            ctx,
            registry: DeviceRegistry::new(),
            migrator,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    fn monitor(&self) -> DeviceMonitor {
        DeviceMonitor::new(self.ctx.mount_table.clone(), self.ctx.predicate.clone())
            .with_interval(self.ctx.config.poll_interval())
    }

    /// Run a single poll and fold its events into the registry.
    pub async fn discover(&mut self) -> Result<()> {
        let mut monitor = self.monitor();
        let events = tokio::task::spawn_blocking(move || monitor.poll_once())
            .await
            .context("Device poll task failed")??;

        for event in events {
            self.handle_device_event(event);
        }
        Ok(())
    }

    /// Run the monitor until `cancel` fires, folding events as they arrive.
    pub async fn watch(&mut self, cancel: CancellationToken) -> Result<()> {
        info!("Watching for removable devices");
        info!("{}", self.registry.status_line());

        let (tx, mut rx) = mpsc::channel(32);
        let monitor = self.monitor();
        let monitor_task = tokio::spawn(monitor.run(tx, cancel.clone()));

        while let Some(event) = rx.recv().await {
            self.handle_device_event(event);
        }

        monitor_task.await.context("Device monitor task failed")?;
        Ok(())
    }

    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        self.registry.apply(event);

        info!("{}", self.registry.status_line());
        for device in self.registry.devices() {
            info!(mount = %device.mount_path.display(), "  {}", device.label());
        }
    }
}
