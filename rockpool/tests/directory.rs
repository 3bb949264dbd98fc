//! End-to-end tests of the block directory over an in-process network.

use rockpool::prelude::*;
use rockpool::transport::memory::MemoryNetwork;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Mutex;

const COORDINATOR_PORT: u16 = 7077;
const WORKER_COMMANDS: &str = "worker-commands";

fn addr(port: u16) -> RpcAddress {
    RpcAddress::new("10.0.0.1", port)
}

fn start(network: &Arc<MemoryNetwork>, port: u16) -> RpcEnv {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    RpcEnv::start(addr(port), RpcConfig::default(), network.transport())
        .expect("environment failed to start")
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Worker-side command endpoint recording remove instructions.
struct CommandRecorder {
    removed: Mutex<Vec<BlockId>>,
}

impl CommandRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            removed: Mutex::new(Vec::new()),
        })
    }

    fn removed(&self) -> Vec<BlockId> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcEndpoint for CommandRecorder {
    async fn receive(&self, _sender: RpcAddress, payload: Bytes) -> Result<()> {
        let command: WorkerCommand = serde_json::from_slice(&payload)
            .map_err(|e| RpcError::UnhandledMessage(e.to_string()))?;
        match command {
            WorkerCommand::RemoveBlock { block } => self.removed.lock().unwrap().push(block),
        }
        Ok(())
    }
}

/// One registered worker: its environment, command recorder and the id the
/// directory assigned.
struct Worker {
    env: RpcEnv,
    recorder: Arc<CommandRecorder>,
    id: BlockManagerId,
    client: DirectoryClient,
}

async fn join_worker(
    network: &Arc<MemoryNetwork>,
    executor: &str,
    port: u16,
    max_mem: u64,
) -> Worker {
    let env = start(network, port);
    let recorder = CommandRecorder::new();
    env.register_endpoint(WORKER_COMMANDS, recorder.clone()).unwrap();

    let directory = env
        .setup_endpoint_ref(addr(COORDINATOR_PORT), DIRECTORY_ENDPOINT_NAME)
        .await
        .unwrap();
    let client = DirectoryClient::new(directory);
    let id = client
        .register_worker(
            BlockManagerId::new(executor, "10.0.0.1", port),
            max_mem,
            0,
            EndpointAddress::new(WORKER_COMMANDS, addr(port)),
        )
        .await
        .unwrap();
    Worker {
        env,
        recorder,
        id,
        client,
    }
}

#[tokio::test]
async fn test_register_report_locate_remove_roundtrip() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let w1 = join_worker(&network, "w1", 5001, 100 << 20).await;
    let block = BlockId::new("rdd_0_0");

    assert!(w1
        .client
        .update_block_info(
            w1.id.clone(),
            block.clone(),
            StorageLevel::MEMORY_ONLY,
            10 << 20,
            0,
        )
        .await
        .unwrap());
    assert_eq!(
        w1.client.get_locations(block.clone()).await.unwrap(),
        HashSet::from([w1.id.clone()])
    );
    assert!(w1.client.contains(block.clone()).await.unwrap());
    assert!(w1.client.has_cached_blocks("w1").await.unwrap());

    assert!(w1.client.remove_executor("w1").await.unwrap());
    assert!(w1.client.get_locations(block.clone()).await.unwrap().is_empty());
    // Removing again is an acknowledged no-op.
    assert!(!w1.client.remove_executor("w1").await.unwrap());

    w1.env.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_invalid_level_removes_membership_idempotently() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let w1 = join_worker(&network, "w1", 5001, 100 << 20).await;
    let block = BlockId::new("rdd_0_1");

    // No prior membership: removal succeeds without side effects.
    assert!(w1
        .client
        .update_block_info(w1.id.clone(), block.clone(), StorageLevel::NONE, 0, 0)
        .await
        .unwrap());
    assert!(w1.client.get_locations(block).await.unwrap().is_empty());

    w1.env.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_update_for_unregistered_worker_is_a_typed_error() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let driver = start(&network, 5001);
    let directory = driver
        .setup_endpoint_ref(addr(COORDINATOR_PORT), DIRECTORY_ENDPOINT_NAME)
        .await
        .unwrap();
    let client = DirectoryClient::new(directory);

    let result = client
        .update_block_info(
            BlockManagerId::new("ghost", "10.0.0.1", 9999),
            BlockId::new("rdd_0_0"),
            StorageLevel::MEMORY_ONLY,
            1,
            0,
        )
        .await;
    assert!(matches!(
        result,
        Err(RpcError::Directory(DirectoryError::UnknownWorker(_)))
    ));

    driver.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_peers_and_memory_status() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let w1 = join_worker(&network, "w1", 5001, 100).await;
    let w2 = join_worker(&network, "w2", 5002, 200).await;
    let w3 = join_worker(&network, "w3", 5003, 300).await;

    assert_eq!(
        w1.client.get_peers(w1.id.clone()).await.unwrap(),
        HashSet::from([w2.id.clone(), w3.id.clone()])
    );

    let mut status = w1.client.memory_status().await.unwrap();
    status.sort_by(|(a, _), (b, _)| a.executor_id.cmp(&b.executor_id));
    assert_eq!(
        status,
        vec![
            (w1.id.clone(), (100, 100)),
            (w2.id.clone(), (200, 200)),
            (w3.id.clone(), (300, 300)),
        ]
    );

    for worker in [w1, w2, w3] {
        worker.env.shutdown();
    }
    coordinator.shutdown();
}

#[tokio::test]
async fn test_locations_multiple_preserves_input_order() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let w1 = join_worker(&network, "w1", 5001, 100 << 20).await;
    let stored = BlockId::new("rdd_1_0");
    w1.client
        .update_block_info(w1.id.clone(), stored.clone(), StorageLevel::DISK_ONLY, 0, 5)
        .await
        .unwrap();

    let locations = w1
        .client
        .get_locations_multiple(vec![
            BlockId::new("absent-1"),
            stored,
            BlockId::new("absent-2"),
        ])
        .await
        .unwrap();
    assert_eq!(locations.len(), 3);
    assert!(locations[0].is_empty());
    assert_eq!(locations[1], HashSet::from([w1.id.clone()]));
    assert!(locations[2].is_empty());

    w1.env.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_remove_block_fans_out_to_every_holder() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let w1 = join_worker(&network, "w1", 5001, 100 << 20).await;
    let w2 = join_worker(&network, "w2", 5002, 100 << 20).await;
    let bystander = join_worker(&network, "w3", 5003, 100 << 20).await;

    let block = BlockId::new("rdd_2_0");
    for worker in [&w1, &w2] {
        worker
            .client
            .update_block_info(
                worker.id.clone(),
                block.clone(),
                StorageLevel::MEMORY_ONLY,
                1 << 20,
                0,
            )
            .await
            .unwrap();
    }

    assert!(w1.client.remove_block(block.clone()).await.unwrap());

    eventually("both holders to receive the remove command", || {
        w1.recorder.removed() == vec![block.clone()] && w2.recorder.removed() == vec![block.clone()]
    })
    .await;
    assert!(bystander.recorder.removed().is_empty());
    assert!(w1.client.get_locations(block.clone()).await.unwrap().is_empty());

    // A second remove finds no holders.
    assert!(!w1.client.remove_block(block).await.unwrap());

    for worker in [w1, w2, bystander] {
        worker.env.shutdown();
    }
    coordinator.shutdown();
}

#[tokio::test]
async fn test_colliding_executor_ids_are_disambiguated() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let first = join_worker(&network, "dup", 5001, 100).await;
    let second = join_worker(&network, "dup", 5002, 100).await;
    assert_ne!(first.id, second.id);
    assert_eq!(second.id.executor_id, "dup-1");

    first.env.shutdown();
    second.env.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_heartbeat_hints_unknown_workers_to_reregister() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let w1 = join_worker(&network, "w1", 5001, 100).await;
    assert!(w1.client.heartbeat(w1.id.clone()).await.unwrap());

    w1.client.remove_executor("w1").await.unwrap();
    // The directory forgot this worker; the heartbeat reply says re-register.
    assert!(!w1.client.heartbeat(w1.id.clone()).await.unwrap());

    w1.env.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_executor_endpoint_lookup() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let w1 = join_worker(&network, "w1", 5001, 100).await;
    assert_eq!(
        w1.client.executor_endpoint("w1").await.unwrap(),
        Some(EndpointAddress::new(WORKER_COMMANDS, addr(5001)))
    );
    assert_eq!(w1.client.executor_endpoint("ghost").await.unwrap(), None);

    w1.env.shutdown();
    coordinator.shutdown();
}

#[tokio::test]
async fn test_stop_directory_unregisters_the_endpoint() {
    let network = MemoryNetwork::new();
    let coordinator = start(&network, COORDINATOR_PORT);
    BlockDirectoryEndpoint::register(&coordinator).unwrap();

    let driver = start(&network, 5001);
    let directory = driver
        .setup_endpoint_ref(addr(COORDINATOR_PORT), DIRECTORY_ENDPOINT_NAME)
        .await
        .unwrap();
    let client = DirectoryClient::new(directory);

    assert!(client.stop_directory().await.unwrap());
    eventually("the directory endpoint to disappear", || {
        coordinator.endpoint_ref(DIRECTORY_ENDPOINT_NAME).is_err()
    })
    .await;

    // Later operations fail instead of silently queuing.
    let result = client.memory_status().await;
    assert!(result.is_err());

    driver.shutdown();
    coordinator.shutdown();
}
