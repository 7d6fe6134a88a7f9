#![allow(dead_code)]

pub mod fakes;

use droidpool::{platform, router, AppState, DevicePool, NodePool, PoolConfig, ProcessError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub use fakes::{FakeBridge, FakeHost};

pub fn test_config(pool_size: usize, ttl: Duration) -> PoolConfig {
    PoolConfig {
        pool_size,
        ttl,
        probe_interval: Duration::from_millis(2),
        probe_attempts_per_node: 5,
        ..PoolConfig::default()
    }
}

pub struct Pools {
    pub host: Arc<FakeHost>,
    pub bridge: Arc<FakeBridge>,
    pub nodes: Arc<NodePool>,
    pub devices: Arc<DevicePool>,
}

pub async fn pools(config: &PoolConfig) -> Pools {
    let host = Arc::new(FakeHost::default());
    let bridge = Arc::new(FakeBridge::default());
    let nodes = Arc::new(NodePool::new(config, host.clone(), host.clone()));
    nodes.init().await;
    let devices = Arc::new(DevicePool::new(config, bridge.clone(), host.clone()));
    Pools {
        host,
        bridge,
        nodes,
        devices,
    }
}

pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub pools: Pools,
}

impl TestServer {
    pub async fn get(&self, path: &str) -> (u16, String) {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .expect("request failed");
        let status = response.status().as_u16();
        (status, response.text().await.expect("body"))
    }
}

/// Serves the real router on an ephemeral port.
pub async fn spawn_server(config: PoolConfig) -> TestServer {
    let pools = pools(&config).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = router(AppState {
        devices: pools.devices.clone(),
        nodes: pools.nodes.clone(),
        base_url: base.clone(),
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer {
        base,
        client: reqwest::Client::new(),
        pools,
    }
}
