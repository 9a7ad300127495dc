use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use homesync::adapters::{SimulatedMountTable, Simulator};
use homesync::core::{DeviceEvent, DeviceMonitor, DevicePattern, MountEntry};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn monitor() -> (DeviceMonitor, Simulator) {
    let (table, simulator) = SimulatedMountTable::new();
    let monitor = DeviceMonitor::new(
        Arc::new(table),
        Arc::new(DevicePattern::new("^/dev/sd").unwrap()),
    )
    .with_interval(Duration::from_millis(20));
    (monitor, simulator)
}

fn attached(events: &[DeviceEvent]) -> Vec<PathBuf> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Attached { mount_path, .. } => Some(mount_path.clone()),
            _ => None,
        })
        .collect()
}

fn detached(events: &[DeviceEvent]) -> Vec<PathBuf> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Detached { mount_path } => Some(mount_path.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_attach_reports_capacity() {
    let (mut monitor, simulator) = monitor();
    simulator.attach("/dev/sdb1", "/media/usb", 64);

    let events = monitor.poll_once().unwrap();
    assert_eq!(
        events,
        vec![DeviceEvent::Attached {
            mount_path: PathBuf::from("/media/usb"),
            size_bytes: 64 * 1024 * 1024 * 1024,
        }]
    );
}

#[test]
fn test_capacity_failure_defaults_to_zero() {
    let (mut monitor, simulator) = monitor();
    simulator.attach("/dev/sdb1", "/media/usb", 0);

    let events = monitor.poll_once().unwrap();
    assert!(matches!(
        events.as_slice(),
        [DeviceEvent::Attached { size_bytes: 0, .. }]
    ));
}

#[test]
fn test_non_removable_mounts_are_ignored() {
    let (mut monitor, simulator) = monitor();
    simulator.attach("/dev/nvme0n1p2", "/", 512);
    simulator.attach("tmpfs", "/run", 1);

    assert!(monitor.poll_once().unwrap().is_empty());
    assert!(monitor.snapshot().is_empty());
}

#[test]
fn test_unchanged_set_emits_nothing() {
    let (mut monitor, simulator) = monitor();
    simulator.attach("/dev/sdb1", "/media/a", 8);
    simulator.attach("/dev/sdc1", "/media/b", 8);

    assert_eq!(monitor.poll_once().unwrap().len(), 2);
    assert!(monitor.poll_once().unwrap().is_empty());
    assert!(monitor.poll_once().unwrap().is_empty());
}

#[test]
fn test_event_counts_match_set_differences() {
    let (mut monitor, simulator) = monitor();
    simulator.attach("/dev/sdb1", "/media/a", 8);
    simulator.attach("/dev/sdc1", "/media/b", 8);
    simulator.attach("/dev/sdd1", "/media/c", 8);
    monitor.poll_once().unwrap();

    simulator.detach("/media/a");
    simulator.detach("/media/c");
    simulator.attach("/dev/sde1", "/media/d", 8);
    simulator.attach("/dev/sdf1", "/media/e", 8);
    simulator.attach("/dev/sdg1", "/media/f", 8);

    let events = monitor.poll_once().unwrap();
    let mut added = attached(&events);
    let mut removed = detached(&events);
    added.sort();
    removed.sort();

    assert_eq!(
        added,
        vec![
            PathBuf::from("/media/d"),
            PathBuf::from("/media/e"),
            PathBuf::from("/media/f")
        ]
    );
    assert_eq!(removed, vec![PathBuf::from("/media/a"), PathBuf::from("/media/c")]);
}

#[test]
fn test_enumeration_failure_preserves_snapshot() {
    let (mut monitor, simulator) = monitor();
    simulator.attach("/dev/sdb1", "/media/a", 8);
    monitor.poll_once().unwrap();

    simulator.fail_next_queries(1);
    assert!(monitor.poll_once().is_err());
    assert_eq!(monitor.snapshot().len(), 1);

    // Recovery: nothing changed, so nothing is reported
    assert!(monitor.poll_once().unwrap().is_empty());
}

#[test]
fn test_custom_predicate() {
    let (table, simulator) = SimulatedMountTable::new();
    let predicate = |entry: &MountEntry| entry.mount_point.starts_with("/media");
    let mut monitor = DeviceMonitor::new(Arc::new(table), Arc::new(predicate));

    simulator.attach("/dev/mmcblk0p1", "/media/card", 32);
    simulator.attach("/dev/sda1", "/boot", 1);

    let events = monitor.poll_once().unwrap();
    assert_eq!(attached(&events), vec![PathBuf::from("/media/card")]);
}

#[tokio::test]
async fn test_run_streams_events() {
    let (monitor, simulator) = monitor();
    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(tx, cancel.clone()));

    simulator.attach("/dev/sdb1", "/media/usb", 16);
    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for attach")
        .expect("channel closed");
    assert!(matches!(event, DeviceEvent::Attached { .. }));

    simulator.detach("/media/usb");
    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for detach")
        .expect("channel closed");
    assert_eq!(
        event,
        DeviceEvent::Detached {
            mount_path: PathBuf::from("/media/usb")
        }
    );

    cancel.cancel();
    timeout(Duration::from_secs(2), task)
        .await
        .expect("monitor did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_run_survives_enumeration_failures() {
    let (monitor, simulator) = monitor();
    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(tx, cancel.clone()));

    simulator.attach("/dev/sdb1", "/media/usb", 16);
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for attach")
        .expect("channel closed");

    simulator.fail_next_queries(5);

    // Failed cycles must not look like the device disappeared
    let spurious = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(spurious.is_err(), "unexpected event: {:?}", spurious);

    simulator.attach("/dev/sdc1", "/media/second", 16);
    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for second attach")
        .expect("channel closed");
    assert_eq!(event.mount_path(), PathBuf::from("/media/second"));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_run_stops_when_receiver_dropped() {
    let (monitor, simulator) = monitor();
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    simulator.attach("/dev/sdb1", "/media/usb", 16);
    let task = tokio::spawn(monitor.run(tx, CancellationToken::new()));

    timeout(Duration::from_secs(2), task)
        .await
        .expect("monitor kept running without a receiver")
        .unwrap();
}
