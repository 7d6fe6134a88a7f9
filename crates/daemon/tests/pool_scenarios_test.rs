mod support;

use common::ReleaseOutcome;
use std::collections::BTreeSet;
use std::time::Duration;
use support::{pools, test_config};
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_node_allocations_never_share_a_node() {
    let pools = pools(&test_config(4, Duration::from_secs(60))).await;

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let nodes = pools.nodes.clone();
        tasks.spawn(async move { nodes.allocate().await.leased() });
    }
    let mut leased = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Some(lease) = result.unwrap() {
            leased.push(lease.port);
        }
    }

    let distinct: BTreeSet<_> = leased.iter().copied().collect();
    assert_eq!(leased.len(), 4);
    assert_eq!(distinct.len(), 4);
    assert!(!pools.nodes.is_all_free());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_device_allocations_never_share_a_device() {
    let pools = pools(&test_config(1, Duration::from_secs(60))).await;
    pools.bridge.attach(&["a", "b", "c"]);

    let mut tasks = JoinSet::new();
    for _ in 0..12 {
        let devices = pools.devices.clone();
        tasks.spawn(async move { devices.allocate().await.leased() });
    }
    let mut serials = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Some(lease) = result.unwrap() {
            serials.push(lease.serial);
        }
    }
    serials.sort();
    assert_eq!(serials, vec!["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn releases_interleaved_with_allocations_keep_leases_bounded() {
    let pools = pools(&test_config(2, Duration::from_secs(60))).await;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let nodes = pools.nodes.clone();
        tasks.spawn(async move {
            for _ in 0..10 {
                if let Some(lease) = nodes.allocate().await.leased() {
                    tokio::task::yield_now().await;
                    assert_eq!(nodes.release(lease.port), ReleaseOutcome::Released);
                }
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    assert!(pools.nodes.is_all_free());
    assert_eq!(pools.host.starts(), 2);
}

#[tokio::test]
async fn detached_device_is_dropped_and_its_port_reaped() {
    let pools = pools(&test_config(1, Duration::from_secs(60))).await;
    pools.bridge.attach(&["X", "Y"]);
    let serials = pools.devices.refresh().await;
    assert_eq!(serials, vec!["X", "Y"]);

    let ports: Vec<u16> = pools.devices.snapshot().iter().map(|r| r.aux_port).collect();
    assert_eq!(ports, vec![8200, 8201]);

    pools.bridge.attach(&["Y"]);
    assert_eq!(pools.devices.refresh().await, vec!["Y"]);
    assert_eq!(pools.devices.snapshot()[0].aux_port, 8201);
}

#[tokio::test]
async fn reserved_device_is_invisible() {
    let mut config = test_config(1, Duration::from_secs(60));
    config.reserved_device = Some("R".to_string());
    let pools = pools(&config).await;
    pools.bridge.attach(&["R"]);

    assert!(pools.devices.refresh().await.is_empty());
    assert!(pools.devices.allocate().await.is_wait());
    assert_eq!(pools.devices.release("R"), ReleaseOutcome::Unknown);
}
