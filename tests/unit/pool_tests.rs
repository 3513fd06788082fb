//! Unit tests for the static device pool.
//!
//! Validates:
//! - All-or-nothing reservation across several constraint requests
//! - Constrained requests are served before unconstrained ones
//! - Release and problem-device quarantine

use std::path::PathBuf;
use std::sync::Arc;

use gauntlet_orchestrator::device::pool::DeviceState;
use gauntlet_orchestrator::device::{
    ConstraintRequest, Device, DeviceError, DevicePool, LocalDevice, StaticDevicePool,
};
use gauntlet_orchestrator::models::role::{DeviceConstraint, Platform};

fn device(name: &str, platform: &str, constraint: &str) -> Arc<dyn Device> {
    Arc::new(
        LocalDevice::new(name, Platform::new(platform), PathBuf::from("/tmp/sandbox"))
            .with_constraint(DeviceConstraint(constraint.to_owned())),
    )
}

fn request(platform: &str, constraint: &str, count: usize) -> ConstraintRequest {
    ConstraintRequest {
        platform: Platform::new(platform),
        constraint: DeviceConstraint(constraint.to_owned()),
        count,
    }
}

fn names(devices: &[Arc<dyn Device>]) -> Vec<String> {
    let mut names: Vec<String> = devices.iter().map(|d| d.name().to_owned()).collect();
    names.sort();
    names
}

#[test]
fn reserves_matching_devices() {
    let pool = StaticDevicePool::new(vec![
        device("linux-1", "Linux", ""),
        device("win-1", "Win64", ""),
        device("linux-2", "Linux", ""),
    ]);

    let reserved = pool
        .reserve(&[request("linux", "", 2)], &[])
        .expect("reserve");
    assert_eq!(names(&reserved), vec!["linux-1", "linux-2"]);
    assert_eq!(pool.state_of("linux-1"), Some(DeviceState::Reserved));
    assert_eq!(pool.state_of("win-1"), Some(DeviceState::Available));
    assert_eq!(pool.available_count(), 1);
}

#[test]
fn shortage_reserves_nothing() {
    let pool = StaticDevicePool::new(vec![
        device("linux-1", "Linux", ""),
        device("win-1", "Win64", ""),
    ]);

    let err = pool
        .reserve(&[request("Linux", "", 1), request("Win64", "", 2)], &[])
        .expect_err("not enough Win64 devices");
    assert!(matches!(err, DeviceError::Unavailable(_)));
    assert_eq!(pool.available_count(), 2);
}

#[test]
fn constrained_requests_pick_first() {
    let pool = StaticDevicePool::new(vec![
        device("fast", "Linux", "HighEnd"),
        device("slow", "Linux", ""),
    ]);

    // The unconstrained request comes first but must not take the only
    // HighEnd device.
    let reserved = pool
        .reserve(&[request("Linux", "", 1), request("Linux", "HighEnd", 1)], &[])
        .expect("both requests satisfiable");
    assert_eq!(names(&reserved), vec!["fast", "slow"]);
}

#[test]
fn excluded_devices_are_skipped() {
    let pool = StaticDevicePool::new(vec![
        device("linux-1", "Linux", ""),
        device("linux-2", "Linux", ""),
    ]);

    let reserved = pool
        .reserve(&[request("Linux", "", 1)], &["linux-1".to_owned()])
        .expect("reserve");
    assert_eq!(names(&reserved), vec!["linux-2"]);
}

#[test]
fn release_returns_devices() {
    let pool = StaticDevicePool::new(vec![device("linux-1", "Linux", "")]);
    let reserved = pool
        .reserve(&[request("Linux", "", 1)], &[])
        .expect("reserve");
    assert_eq!(pool.available_count(), 0);

    pool.release(&reserved);
    assert_eq!(pool.state_of("linux-1"), Some(DeviceState::Available));
}

#[test]
fn problem_devices_stay_quarantined() {
    let pool = StaticDevicePool::new(vec![device("linux-1", "Linux", "")]);
    let reserved = pool
        .reserve(&[request("Linux", "", 1)], &[])
        .expect("reserve");

    pool.mark_problem("linux-1");
    pool.release(&reserved);

    assert_eq!(pool.state_of("linux-1"), Some(DeviceState::Problem));
    assert!(pool.reserve(&[request("Linux", "", 1)], &[]).is_err());
    assert_eq!(pool.state_of("unknown"), None);
}
