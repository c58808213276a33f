use std::collections::HashSet;
use std::sync::Arc;

use shortmint_allocator::lock::LOCK_ROOT;
use shortmint_allocator::manager::COUNTER_PATH;
use shortmint_allocator::{AllocatorSettings, DistributedLock, LockSettings, TokenRangeManager};
use shortmint_coordination::{Coordinator, CoordinationMode, ZooKeeperCoordination};
use shortmint_test_infra::{ZooKeeperConfig, ZooKeeperServer};

/// Test fixture that manages a ZooKeeper container using test-infra.
pub struct ZooKeeperTestContainer {
    #[allow(dead_code)]
    server: ZooKeeperServer,
    connect_string: String,
}

impl ZooKeeperTestContainer {
    pub async fn start() -> Self {
        let server = ZooKeeperServer::new(ZooKeeperConfig::default())
            .await
            .expect("Failed to start ZooKeeper");
        let connect_string = server
            .connect_string()
            .await
            .expect("Failed to get ZooKeeper address");
        Self {
            server,
            connect_string,
        }
    }

    /// Opens a new client session, standing in for a separate process.
    pub async fn coordinator(&self) -> Coordinator {
        let client = ZooKeeperCoordination::connect(&self.connect_string)
            .await
            .expect("Failed to connect to ZooKeeper");
        Coordinator::connected(client)
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_zookeeper_bootstrap_and_first_code() {
    let fixture = ZooKeeperTestContainer::start().await;
    let coordinator = fixture.coordinator().await;
    let manager = TokenRangeManager::new(
        coordinator.clone(),
        AllocatorSettings::builder().window_size(100).build(),
    );
    assert_eq!(manager.mode(), CoordinationMode::Distributed);

    manager.bootstrap().await.unwrap();
    manager.bootstrap().await.unwrap();
    assert_eq!(coordinator.get_data(COUNTER_PATH).await.unwrap(), b"999999");

    assert_eq!(manager.next_code().await.unwrap().as_str(), "29c4");
    assert_eq!(coordinator.get_data(COUNTER_PATH).await.unwrap(), b"1000100");
    assert!(coordinator.get_children(LOCK_ROOT).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_zookeeper_tokens_unique_across_sessions() {
    let fixture = ZooKeeperTestContainer::start().await;

    let mut managers = Vec::new();
    for _ in 0..3 {
        managers.push(Arc::new(TokenRangeManager::new(
            fixture.coordinator().await,
            AllocatorSettings::builder().window_size(5).build(),
        )));
    }
    managers[0].bootstrap().await.unwrap();

    let mut tasks = Vec::new();
    for manager in &managers {
        let manager = Arc::clone(manager);
        tasks.push(tokio::spawn(async move {
            let mut minted = Vec::new();
            for _ in 0..20 {
                minted.push(manager.next_token().await.unwrap());
            }
            minted
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for token in task.await.unwrap() {
            assert!(seen.insert(token), "token {token} issued twice");
        }
    }
    assert_eq!(seen.len(), 60);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_zookeeper_lock_handover() {
    let fixture = ZooKeeperTestContainer::start().await;
    let first = DistributedLock::new(fixture.coordinator().await, LockSettings::default());
    let second = DistributedLock::new(fixture.coordinator().await, LockSettings::default());

    let held = first.acquire().await.unwrap();
    let ticket = held.ticket().unwrap().to_string();
    assert!(ticket.starts_with("/locks/token_lock_"));

    let waiter = tokio::spawn(async move {
        let handle = second.acquire().await.unwrap();
        let ticket = handle.ticket().unwrap().to_string();
        second.release(handle).await.unwrap();
        ticket
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    first.release(held).await.unwrap();
    let next = waiter.await.unwrap();
    let sequence = |ticket: &str| ticket[ticket.len() - 10..].to_string();
    assert!(sequence(&next) > sequence(&ticket));
}
