// Integration tests for the agent-connection broker.
//
// Each test spins up a real axum server bound to an ephemeral loopback port
// and drives it with a tokio-tungstenite client acting as an agent, rather
// than mocking the transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agent_broker::wire::{Envelope, Kind, RegisterPayload};
use agent_broker::{Broker, BrokerConfig, ExecuteCommandRequest};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

fn init() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

type TestClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn spawn_server(broker: Arc<Broker>) -> (SocketAddr, JoinHandle<()>) {
    let app = Router::new()
        .route("/ws", get(agent_broker::handle_upgrade))
        .with_state(broker);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    (addr, handle)
}

async fn connect(addr: SocketAddr) -> TestClient {
    let url = format!("ws://{addr}/ws");
    let (ws, _response) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

fn frame(kind: Kind, id: Option<&str>, payload: serde_json::Value) -> String {
    serde_json::to_string(&serde_json::json!({
        "type": serde_json::to_value(kind).unwrap(),
        "id": id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "payload": payload,
    }))
    .unwrap()
}

async fn send_register(ws: &mut TestClient, agent_id: &str, token: &str) {
    let payload = serde_json::to_value(RegisterPayload {
        agent_id: agent_id.to_string(),
        hostname: format!("{agent_id}.example.com"),
        version: "1.2.3".to_string(),
        platform: "linux".to_string(),
        tags: ["tag1".to_string()].into_iter().collect(),
        token: token.to_string(),
    })
    .unwrap();
    ws.send(WsMessage::Text(frame(Kind::AgentRegister, None, payload)))
        .await
        .unwrap();
}

async fn recv_envelope(ws: &mut TestClient) -> Option<Envelope> {
    loop {
        match ws.next().await? {
            Ok(WsMessage::Text(text)) => return Envelope::decode(&text).ok(),
            Ok(WsMessage::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

async fn reply_command_result(
    ws: &mut TestClient,
    request_id: &str,
    stdout: &str,
    exit_code: i32,
) {
    let payload = serde_json::json!({
        "request_id": request_id,
        "success": true,
        "stdout": stdout,
        "stderr": "",
        "exit_code": exit_code,
        "duration": 1,
    });
    ws.send(WsMessage::Text(frame(Kind::CommandResult, Some(request_id), payload)))
        .await
        .unwrap();
}

fn exec_request(request_id: &str, command: &str, timeout_seconds: i64) -> ExecuteCommandRequest {
    ExecuteCommandRequest {
        request_id: request_id.to_string(),
        command: command.to_string(),
        target_type: "host".to_string(),
        target_id: "t1".to_string(),
        timeout_seconds,
    }
}

#[tokio::test]
async fn happy_path_register_execute_disconnect() {
    init();
    let broker = Broker::with_token_validator(
        BrokerConfig::default(),
        Arc::new(|token, agent_id| token == "ok" && agent_id == "a1"),
    );
    let (addr, _server) = spawn_server(broker.clone()).await;

    let mut ws = connect(addr).await;
    send_register(&mut ws, "a1", "ok").await;

    let ack = recv_envelope(&mut ws).await.expect("registration ack");
    assert_eq!(ack.kind, Kind::Registered);
    let ack_payload: serde_json::Value = ack.payload_as().unwrap();
    assert_eq!(ack_payload["success"], true);
    assert_eq!(ack_payload["message"], "Registered");

    assert!(broker.is_connected("a1").await);

    let broker_for_agent = broker.clone();
    let agent_task = tokio::spawn(async move {
        let envelope = recv_envelope(&mut ws).await.expect("execute_command frame");
        assert_eq!(envelope.kind, Kind::ExecuteCommand);
        reply_command_result(&mut ws, "req1", "ok", 0).await;
        let _ = broker_for_agent; // keep broker alive for the duration of the task
        ws
    });

    let result = broker
        .execute_command(
            CancellationToken::new(),
            "a1",
            exec_request("req1", "echo ok", 1),
        )
        .await
        .expect("execute_command should succeed");
    assert_eq!(result.request_id, "req1");
    assert!(result.success);
    assert_eq!(result.stdout, "ok");
    assert_eq!(result.exit_code, 0);

    let mut ws = agent_task.await.unwrap();
    ws.close(None).await.ok();
    drop(ws);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!broker.is_connected("a1").await);
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    init();
    let broker = Broker::with_token_validator(BrokerConfig::default(), Arc::new(|_, _| false));
    let (addr, _server) = spawn_server(broker.clone()).await;

    let mut ws = connect(addr).await;
    send_register(&mut ws, "a1", "bad").await;

    let reply = recv_envelope(&mut ws).await.expect("registered reply");
    assert_eq!(reply.kind, Kind::Registered);
    let payload: serde_json::Value = reply.payload_as().unwrap();
    assert_eq!(payload["success"], false);
    assert_eq!(payload["message"], "Invalid token");

    assert!(!broker.is_connected("a1").await);
}

#[tokio::test]
async fn first_frame_must_be_register() {
    init();
    let broker = Broker::new(BrokerConfig::default());
    let (addr, _server) = spawn_server(broker.clone()).await;

    let mut ws = connect(addr).await;
    ws.send(WsMessage::Text(frame(Kind::AgentPing, None, serde_json::Value::Null)))
        .await
        .unwrap();

    assert!(recv_envelope(&mut ws).await.is_none());
    assert!(broker.connected_agents().await.is_empty());
}

#[tokio::test]
async fn reconnect_takeover_keeps_agent_connected() {
    init();
    let broker = Broker::with_token_validator(BrokerConfig::default(), Arc::new(|_, _| true));
    let (addr, _server) = spawn_server(broker.clone()).await;

    let mut first = connect(addr).await;
    send_register(&mut first, "a1", "ok").await;
    let ack = recv_envelope(&mut first).await.unwrap();
    assert_eq!(ack.kind, Kind::Registered);
    assert!(broker.is_connected("a1").await);

    let mut second = connect(addr).await;
    send_register(&mut second, "a1", "ok").await;
    let ack = recv_envelope(&mut second).await.unwrap();
    assert_eq!(ack.kind, Kind::Registered);

    assert!(broker.is_connected("a1").await);

    let closed = tokio::time::timeout(Duration::from_millis(500), recv_envelope(&mut first)).await;
    assert!(matches!(closed, Ok(None)));
    assert!(broker.is_connected("a1").await);
}

#[tokio::test]
async fn execute_command_times_out_with_no_reply() {
    init();
    let broker = Broker::with_token_validator(BrokerConfig::default(), Arc::new(|_, _| true));
    let (addr, _server) = spawn_server(broker.clone()).await;

    let mut ws = connect(addr).await;
    send_register(&mut ws, "a1", "ok").await;
    recv_envelope(&mut ws).await.unwrap();

    let start = tokio::time::Instant::now();
    let result = broker
        .execute_command(CancellationToken::new(), "a1", exec_request("req2", "sleep 100", 1))
        .await;
    assert!(matches!(result, Err(agent_broker::BrokerError::Timeout { .. })));
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn cross_caller_responses_do_not_interfere() {
    init();
    let broker = Broker::with_token_validator(BrokerConfig::default(), Arc::new(|_, _| true));
    let (addr, _server) = spawn_server(broker.clone()).await;

    let mut ws = connect(addr).await;
    send_register(&mut ws, "a1", "ok").await;
    recv_envelope(&mut ws).await.unwrap();

    let broker_a = broker.clone();
    let broker_b = broker.clone();
    let call_a = tokio::spawn(async move {
        broker_a
            .execute_command(CancellationToken::new(), "a1", exec_request("A", "cmd-a", 5))
            .await
    });
    let call_b = tokio::spawn(async move {
        broker_b
            .execute_command(CancellationToken::new(), "a1", exec_request("B", "cmd-b", 5))
            .await
    });

    let first = recv_envelope(&mut ws).await.unwrap();
    let second = recv_envelope(&mut ws).await.unwrap();
    let ids: Vec<String> = [first, second]
        .into_iter()
        .map(|e| e.id.unwrap())
        .collect();
    assert!(ids.contains(&"A".to_string()));
    assert!(ids.contains(&"B".to_string()));

    reply_command_result(&mut ws, "B", "b-out", 0).await;
    let result_b = call_b.await.unwrap().unwrap();
    assert_eq!(result_b.request_id, "B");
    assert_eq!(result_b.stdout, "b-out");
    assert!(!call_a.is_finished());

    reply_command_result(&mut ws, "A", "a-out", 0).await;
    let result_a = call_a.await.unwrap().unwrap();
    assert_eq!(result_a.request_id, "A");
    assert_eq!(result_a.stdout, "a-out");
}

#[tokio::test]
async fn pending_guard_cleans_up_when_its_registry_entry_key_is_reused() {
    use agent_broker::registry::{PendingGuard, Registry};

    let registry = Arc::new(Registry::new());
    let key = ("a1".to_string(), "req1".to_string());
    let _rx = registry.register_pending(key.clone()).await;
    {
        let _guard = PendingGuard::new(registry.clone(), key.clone());
        // dropped here without the owning future ever reaching a select arm
    }

    let leftover = agent_broker::CommandResult {
        request_id: key.1.clone(),
        success: true,
        stdout: String::new(),
        stderr: String::new(),
        exit_code: 0,
        duration: 0,
        error: None,
    };
    assert!(!registry.deliver(&key, leftover).await);
}

#[tokio::test]
async fn execute_command_future_drop_does_not_leak_pending_entry() {
    init();
    let broker = Broker::with_token_validator(BrokerConfig::default(), Arc::new(|_, _| true));
    let (addr, _server) = spawn_server(broker.clone()).await;

    let mut ws = connect(addr).await;
    send_register(&mut ws, "a1", "ok").await;
    recv_envelope(&mut ws).await.unwrap();

    // Race the call against a shorter outer timeout so the `execute_command`
    // future is dropped mid-select, never reaching any of its own select arms.
    let dropped = tokio::time::timeout(
        Duration::from_millis(50),
        broker.execute_command(
            CancellationToken::new(),
            "a1",
            exec_request("req-dropped", "sleep 100", 30),
        ),
    )
    .await;
    assert!(dropped.is_err(), "outer timeout should have fired first");

    // The agent's command_result for the dropped request must be reported as
    // unmatched rather than silently accepted by a leaked pending entry.
    recv_envelope(&mut ws).await.expect("execute_command frame still arrived");
    reply_command_result(&mut ws, "req-dropped", "too-late", 0).await;

    // A fresh call reusing the same request_id must succeed normally, proving
    // the prior guard's cleanup ran rather than leaving a stale oneshot behind.
    let agent_task = tokio::spawn(async move {
        let envelope = recv_envelope(&mut ws).await.expect("second execute_command frame");
        assert_eq!(envelope.kind, Kind::ExecuteCommand);
        reply_command_result(&mut ws, "req-dropped", "fresh", 0).await;
        ws
    });
    let result = broker
        .execute_command(
            CancellationToken::new(),
            "a1",
            exec_request("req-dropped", "echo ok", 5),
        )
        .await
        .expect("reused request_id should succeed after the dropped call's guard cleaned up");
    assert_eq!(result.stdout, "fresh");
    agent_task.await.unwrap();
}
