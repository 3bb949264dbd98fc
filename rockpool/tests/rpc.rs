//! End-to-end tests of the RPC layer over an in-process network.

use rockpool::prelude::*;
use rockpool::rpc::message::{MessageKind, NetworkMessage};
use rockpool::transport::memory::MemoryNetwork;
use bytes::Bytes;
use std::sync::Mutex;

fn addr(port: u16) -> RpcAddress {
    RpcAddress::new("127.0.0.1", port)
}

fn start(network: &Arc<MemoryNetwork>, port: u16, config: RpcConfig) -> RpcEnv {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    RpcEnv::start(addr(port), config, network.transport()).expect("environment failed to start")
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

struct Echo;

#[async_trait]
impl RpcEndpoint for Echo {
    async fn receive_and_reply(&self, _sender: RpcAddress, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}

struct Recorder {
    seen: Mutex<Vec<u8>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<u8> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcEndpoint for Recorder {
    async fn receive(&self, _sender: RpcAddress, payload: Bytes) -> Result<()> {
        let value: u8 = serde_json::from_slice(&payload)
            .map_err(|e| RpcError::UnhandledMessage(e.to_string()))?;
        self.seen.lock().unwrap().push(value);
        Ok(())
    }
}

#[tokio::test]
async fn test_local_ask_roundtrip() {
    let network = MemoryNetwork::new();
    let env = start(&network, 7000, RpcConfig::default());

    let echo = env.register_endpoint("echo", Arc::new(Echo)).unwrap();
    let reply: String = echo.ask(&"ping".to_string()).await.unwrap();
    assert_eq!(reply, "ping");
    env.shutdown();
}

#[tokio::test]
async fn test_remote_ask_roundtrip() {
    let network = MemoryNetwork::new();
    let server = start(&network, 7000, RpcConfig::default());
    let client = start(&network, 7001, RpcConfig::default());

    server.register_endpoint("echo", Arc::new(Echo)).unwrap();
    let echo = client.setup_endpoint_ref(addr(7000), "echo").await.unwrap();
    assert!(!echo.is_local());

    let reply: String = echo.ask(&"ping".to_string()).await.unwrap();
    assert_eq!(reply, "ping");

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_setup_endpoint_ref_rejects_unknown_names() {
    let network = MemoryNetwork::new();
    let server = start(&network, 7000, RpcConfig::default());
    let client = start(&network, 7001, RpcConfig::default());

    let result = client.setup_endpoint_ref(addr(7000), "no-such-endpoint").await;
    assert!(matches!(result, Err(RpcError::EndpointNotFound(_))));

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_local_ask_unknown_endpoint_fails_fast() {
    let network = MemoryNetwork::new();
    let env = start(&network, 7000, RpcConfig::default());
    assert!(matches!(
        env.endpoint_ref("ghost"),
        Err(RpcError::EndpointNotFound(_))
    ));
    env.shutdown();
}

#[tokio::test]
async fn test_remote_ask_to_missing_endpoint_surfaces_remote_failure() {
    let network = MemoryNetwork::new();
    let server = start(&network, 7000, RpcConfig::default());
    let client = start(&network, 7001, RpcConfig::default());

    // An unchecked ref skips verification, so the failure comes back from
    // the remote side as a failed reply rather than a timeout.
    let ghost = client.endpoint_ref_unchecked(EndpointAddress::new("ghost", addr(7000)));
    let result: Result<String> = ghost.ask(&"hello".to_string()).await;
    match result {
        Err(RpcError::RemoteFailure(text)) => assert!(text.contains("ghost")),
        other => panic!("expected remote failure, got {other:?}"),
    }

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_delivery_order_holds_across_reconnect() {
    let network = MemoryNetwork::new();
    let config = RpcConfig::default().with_connect_retries(20, Duration::from_millis(25));
    let server = start(&network, 7000, config.clone());
    let client = start(&network, 7001, config);

    let recorder = Recorder::new();
    server.register_endpoint("recorder", recorder.clone()).unwrap();
    let target = client.setup_endpoint_ref(addr(7000), "recorder").await.unwrap();

    for i in 0..5u8 {
        target.send(&i).unwrap();
    }
    network.set_reachable(&addr(7000), false);
    for i in 5..10u8 {
        target.send(&i).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(60)).await;
    network.set_reachable(&addr(7000), true);

    eventually("all ten messages to arrive", || recorder.seen().len() == 10).await;
    assert_eq!(recorder.seen(), (0..10u8).collect::<Vec<_>>());

    // The wire saw the same order: the head message is retried in place
    // after a reconnect, never requeued behind later ones.
    let one_way_payloads: Vec<u8> = network
        .wire_log(&addr(7000))
        .iter()
        .map(|bytes| serde_json::from_slice::<NetworkMessage>(bytes).unwrap())
        .filter(|frame| frame.kind == MessageKind::OneWay)
        .map(|frame| serde_json::from_slice::<u8>(&frame.payload).unwrap())
        .collect();
    assert_eq!(one_way_payloads, (0..10u8).collect::<Vec<_>>());

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_ask_timeout_releases_correlation_and_discards_late_reply() {
    struct SlowEcho;

    #[async_trait]
    impl RpcEndpoint for SlowEcho {
        async fn receive_and_reply(&self, _sender: RpcAddress, payload: Bytes) -> Result<Bytes> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(payload)
        }
    }

    let network = MemoryNetwork::new();
    let server = start(&network, 7000, RpcConfig::default());
    let client = start(&network, 7001, RpcConfig::default());

    server.register_endpoint("slow", Arc::new(SlowEcho)).unwrap();
    server.register_endpoint("echo", Arc::new(Echo)).unwrap();

    let slow = client.setup_endpoint_ref(addr(7000), "slow").await.unwrap();
    let result: Result<String> = slow
        .ask_with_timeout(&"stale".to_string(), Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(RpcError::AskTimeout(_))));

    // Let the late reply arrive; it must be discarded, and the channel must
    // keep serving fresh asks with their own correlation ids.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let echo = client.setup_endpoint_ref(addr(7000), "echo").await.unwrap();
    let reply: String = echo.ask(&"fresh".to_string()).await.unwrap();
    assert_eq!(reply, "fresh");

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_unreachable_destination_fails_queued_asks() {
    let network = MemoryNetwork::new();
    let config = RpcConfig::default().with_connect_retries(2, Duration::from_millis(10));
    let client = start(&network, 7001, config);

    // Nothing listens on 7000, so connection establishment exhausts its
    // retries and the queued ask fails with a transport error.
    let ghost = client.endpoint_ref_unchecked(EndpointAddress::new("ghost", addr(7000)));
    let result: Result<String> = ghost
        .ask_with_timeout(&"hello".to_string(), Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(RpcError::Transport(_))));

    client.shutdown();
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_asks() {
    struct NeverReply;

    #[async_trait]
    impl RpcEndpoint for NeverReply {
        async fn receive_and_reply(&self, _sender: RpcAddress, _payload: Bytes) -> Result<Bytes> {
            std::future::pending().await
        }
    }

    let network = MemoryNetwork::new();
    let server = start(&network, 7000, RpcConfig::default());
    let client = start(&network, 7001, RpcConfig::default());

    server.register_endpoint("void", Arc::new(NeverReply)).unwrap();
    let void = client.setup_endpoint_ref(addr(7000), "void").await.unwrap();

    let pending = tokio::spawn(async move {
        void.ask_with_timeout::<String, String>(&"hello".to_string(), Duration::from_secs(30))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.shutdown();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(RpcError::EnvironmentStopped)));

    server.shutdown();
}

#[tokio::test]
async fn test_sends_after_shutdown_are_rejected() {
    let network = MemoryNetwork::new();
    let env = start(&network, 7000, RpcConfig::default());
    let echo = env.register_endpoint("echo", Arc::new(Echo)).unwrap();

    env.shutdown();
    env.shutdown(); // idempotent

    assert!(matches!(
        echo.send(&"hello".to_string()),
        Err(RpcError::EnvironmentStopped)
    ));
    let result: Result<String> = echo.ask(&"hello".to_string()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_no_wire_delivery_after_outbox_stop() {
    let network = MemoryNetwork::new();
    let config = RpcConfig::default().with_connect_retries(20, Duration::from_millis(25));
    let server = start(&network, 7000, config.clone());
    let client = start(&network, 7001, config);

    let recorder = Recorder::new();
    server.register_endpoint("recorder", recorder.clone()).unwrap();
    let target = client.endpoint_ref_unchecked(EndpointAddress::new("recorder", addr(7000)));

    // Queue messages while the destination is down, so they are pending
    // when the outbox is stopped.
    network.set_reachable(&addr(7000), false);
    for i in 0..5u8 {
        target.send(&i).unwrap();
    }
    let queued_ask = {
        let target = target.clone();
        tokio::spawn(async move {
            target
                .ask_with_timeout::<u8, String>(&42u8, Duration::from_secs(30))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let delivered_before_stop = network.wire_log(&addr(7000)).len();
    client.remove_outbox(&addr(7000));
    assert_eq!(client.outbox_depth(&addr(7000)), None);

    // Even with the destination healthy again, the stopped outbox's queue
    // must never reach the wire.
    network.set_reachable(&addr(7000), true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(network.wire_log(&addr(7000)).len(), delivered_before_stop);
    assert!(recorder.seen().is_empty());

    let result = queued_ask.await.unwrap();
    assert!(matches!(result, Err(RpcError::EnvironmentStopped)));

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_outbox_depth_observation_and_proactive_teardown() {
    let network = MemoryNetwork::new();
    let config = RpcConfig::default().with_connect_retries(50, Duration::from_millis(20));
    let client = start(&network, 7001, config);

    // Nothing listens on 7000: the queue can only grow.
    let sink = client.endpoint_ref_unchecked(EndpointAddress::new("sink", addr(7000)));
    for i in 0..5u8 {
        sink.send(&i).unwrap();
    }
    assert_eq!(client.outbox_depth(&addr(7000)), Some(5));

    let queued_ask = {
        let sink = sink.clone();
        tokio::spawn(async move {
            sink.ask_with_timeout::<u8, String>(&42u8, Duration::from_secs(30))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.outbox_depth(&addr(7000)), Some(6));

    // A caller observing the backlog tears the dead peer's queue down.
    client.remove_outbox(&addr(7000));
    assert_eq!(client.outbox_depth(&addr(7000)), None);
    let result = queued_ask.await.unwrap();
    assert!(matches!(result, Err(RpcError::EnvironmentStopped)));

    client.shutdown();
}

#[tokio::test]
async fn test_destination_recovers_after_outbox_teardown() {
    let network = MemoryNetwork::new();
    let config = RpcConfig::default().with_connect_retries(2, Duration::from_millis(10));
    let client = start(&network, 7001, config);

    // First ask exhausts connection retries and tears the outbox down.
    let echo = client.endpoint_ref_unchecked(EndpointAddress::new("echo", addr(7000)));
    let result: Result<String> = echo
        .ask_with_timeout(&"early".to_string(), Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(RpcError::Transport(_))));

    // The destination comes up afterwards. The torn-down outbox must not
    // poison the address: the next send gets a fresh one.
    let server = start(&network, 7000, RpcConfig::default());
    server.register_endpoint("echo", Arc::new(Echo)).unwrap();
    let reply: String = echo.ask(&"later".to_string()).await.unwrap();
    assert_eq!(reply, "later");

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_unregister_then_reregister_same_name() {
    let network = MemoryNetwork::new();
    let env = start(&network, 7000, RpcConfig::default());

    env.register_endpoint("echo", Arc::new(Echo)).unwrap();
    assert!(matches!(
        env.register_endpoint("echo", Arc::new(Echo)),
        Err(RpcError::DuplicateName(_))
    ));

    env.unregister_endpoint("echo");
    // The name is free again once the previous registration is gone.
    let echo = env.register_endpoint("echo", Arc::new(Echo)).unwrap();
    let reply: String = echo.ask(&"back".to_string()).await.unwrap();
    assert_eq!(reply, "back");

    env.shutdown();
}
