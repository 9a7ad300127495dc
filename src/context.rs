use std::sync::Arc;

use anyhow::Result;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::hardware::{DevicePattern, MountTable, RemovablePredicate};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub mount_table: Arc<dyn MountTable>,
    pub predicate: Arc<dyn RemovablePredicate>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Result<Self> {
        let mount_table = adapters::get_mount_table(&config);
        Self::with_mount_table(config, mount_table)
    }

    pub fn with_mount_table(config: AppConfig, mount_table: Arc<dyn MountTable>) -> Result<Self> {
        let predicate = Arc::new(DevicePattern::new(&config.device_pattern)?);

        Ok(Self {
            config: Arc::new(config),
            mount_table,
            predicate,
        })
    }
}
