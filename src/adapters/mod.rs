use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::core::hardware::MountTable;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{ProcMountTable, parse_mounts};
pub use simulated::{SimulatedMountTable, Simulator};

/// Pick the mount table for this run. In simulation mode, stdin drives it:
/// `attach <device> <mount> [size_gb]` and `detach <mount>`.
pub fn get_mount_table(config: &AppConfig) -> Arc<dyn MountTable> {
    if config.simulation {
        let (table, simulator) = SimulatedMountTable::new();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lines().map_while(Result::ok) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                match parts.as_slice() {
                    ["attach", device, mount] => simulator.attach(device, *mount, 16),
                    ["attach", device, mount, size] => match size.parse() {
                        Ok(size_gb) => simulator.attach(device, *mount, size_gb),
                        Err(_) => warn!(size = %size, "(Simulator) Invalid size"),
                    },
                    ["detach", mount] => simulator.detach(mount),
                    ["fail", count] => simulator.fail_next_queries(count.parse().unwrap_or(1)),
                    _ => println!(
                        "(Simulator) Use: 'attach <device> <mount> [size_gb]', \
                         'detach <mount>' or 'fail <n>'"
                    ),
                }
            }
        });

        return Arc::new(table);
    }

    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcMountTable::new(config.mounts_path.clone()))
    }

    #[cfg(not(target_os = "linux"))]
    {
        warn!("No native mount table on this platform, falling back to simulation");
        Arc::new(SimulatedMountTable::new().0)
    }
}
