use super::*;
use std::thread;

fn manager_with(memory_mb: u64, cpu_percent: f64) -> ResourceManager {
    let config = WarmupConfig {
        max_memory_mb: memory_mb,
        max_cpu_percent: cpu_percent,
        ..Default::default()
    };
    ResourceManager::new(SharedConfig::new(config).unwrap())
}

#[test]
fn test_snapshot_reflects_reservations() {
    let manager = manager_with(1024, 30.0);
    let before = manager.get_available_resources().unwrap();
    assert_eq!(before.memory_mb, 1024);
    assert_eq!(before.cpu_percent, 30.0);

    let allocation = manager
        .allocate_resources(&ResourceRequirements::new(700, 12.5, 5.0, 50))
        .unwrap();
    let during = manager.get_available_resources().unwrap();
    assert_eq!(during.memory_mb, 324);
    assert!((during.cpu_percent - 17.5).abs() < 1e-9);

    allocation.release().unwrap();
    assert_eq!(manager.get_available_resources().unwrap(), before);
}

#[test]
fn test_allocation_is_all_or_nothing() {
    let manager = manager_with(1024, 30.0);
    let _held = manager
        .allocate_resources(&ResourceRequirements::new(100, 25.0, 0.0, 0))
        .unwrap();

    // Memory fits, CPU does not: nothing may be reserved.
    let err = manager
        .allocate_resources(&ResourceRequirements::new(500, 10.0, 0.0, 0))
        .unwrap_err();
    match err {
        WarmupError::ResourceExhausted { dimension, requested, available } => {
            assert_eq!(dimension, ResourceDimension::Cpu);
            assert_eq!(requested, 10.0);
            assert!((available - 5.0).abs() < 1e-9);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(manager.reserved().memory_mb, 100);
    assert_eq!(manager.stats().failures, 1);
}

#[test]
fn test_second_700mb_reservation_rejected_under_1024_ceiling() {
    let manager = manager_with(1024, 30.0);
    let first = manager.allocate_resources(&ResourceRequirements::new(700, 1.0, 0.0, 0));
    assert!(first.is_ok());
    let second = manager.allocate_resources(&ResourceRequirements::new(700, 1.0, 0.0, 0));
    assert!(matches!(
        second,
        Err(WarmupError::ResourceExhausted { dimension: ResourceDimension::Memory, .. })
    ));
}

#[test]
fn test_drop_releases_exactly_once() {
    let manager = manager_with(1024, 30.0);
    {
        let _allocation = manager
            .allocate_resources(&ResourceRequirements::new(256, 3.3, 1.1, 10))
            .unwrap();
        assert_eq!(manager.stats().live_allocations, 1);
    }
    let stats = manager.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.releases, 1);
    assert_eq!(stats.live_allocations, 0);
    assert_eq!(manager.reserved(), ResourceRequirements::default());
}

#[test]
fn test_explicit_release_then_drop_does_not_double_release() {
    let manager = manager_with(1024, 30.0);
    let allocation = manager
        .allocate_resources(&ResourceRequirements::new(128, 1.0, 0.0, 0))
        .unwrap();
    allocation.release().unwrap();
    assert_eq!(manager.stats().releases, 1);
    assert_eq!(manager.stats().consistency_repairs, 0);
}

#[test]
fn test_invalid_requirements_rejected() {
    let manager = manager_with(1024, 30.0);
    let result = manager.allocate_resources(&ResourceRequirements::new(1, f64::NAN, 0.0, 0));
    assert!(matches!(result, Err(WarmupError::ResourceAllocation(_))));
}

#[test]
fn test_exceeds_ceiling() {
    let manager = manager_with(1024, 30.0);
    assert_eq!(
        manager.exceeds_ceiling(&ResourceRequirements::new(2048, 1.0, 0.0, 0)),
        Some(ResourceDimension::Memory)
    );
    assert_eq!(manager.exceeds_ceiling(&ResourceRequirements::new(512, 1.0, 0.0, 0)), None);
}

#[test]
fn test_consistency_check_repairs_drift() {
    let manager = manager_with(1024, 30.0);
    let allocation = manager
        .allocate_resources(&ResourceRequirements::new(200, 0.0, 0.0, 0))
        .unwrap();
    manager.ledger().corrupt_for_test(0, 999);

    assert_eq!(manager.check_consistency(), 1);
    assert_eq!(manager.reserved().memory_mb, 200);
    assert_eq!(manager.stats().consistency_repairs, 1);
    drop(allocation);
    assert_eq!(manager.reserved().memory_mb, 0);
}

#[test]
fn test_concurrent_allocations_never_exceed_ceiling() {
    let manager = Arc::new(manager_with(1000, 100.0));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut granted = 0;
                for _ in 0..200 {
                    if let Ok(allocation) =
                        manager.allocate_resources(&ResourceRequirements::new(300, 10.0, 0.0, 0))
                    {
                        assert!(manager.reserved().memory_mb <= 1000);
                        granted += 1;
                        drop(allocation);
                    }
                }
                granted
            })
        })
        .collect();

    let granted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(granted > 0);
    let stats = manager.stats();
    assert_eq!(stats.allocations, granted);
    assert_eq!(stats.releases, granted);
    assert_eq!(manager.reserved(), ResourceRequirements::default());
}

#[test]
fn test_lowered_ceiling_reports_zero_headroom() {
    let config = SharedConfig::new(WarmupConfig { max_memory_mb: 1024, ..Default::default() }).unwrap();
    let manager = ResourceManager::new(config.clone());
    let _held = manager
        .allocate_resources(&ResourceRequirements::new(800, 1.0, 0.0, 0))
        .unwrap();
    config
        .replace(WarmupConfig { max_memory_mb: 512, ..Default::default() })
        .unwrap();
    assert_eq!(manager.get_available_resources().unwrap().memory_mb, 0);
    assert!(manager
        .allocate_resources(&ResourceRequirements::new(1, 0.0, 0.0, 0))
        .is_err());
}
