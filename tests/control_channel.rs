use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

use gamelink::protocol::{Envelope, OutboundMessage};
use gamelink::transport::ConnectionState;
use gamelink::transport::control::{ControlChannel, Handler};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct ServerState {
    inbound: mpsc::UnboundedSender<(String, Envelope)>,
    push: broadcast::Sender<String>,
}

async fn ws_handler(
    Path(endpoint): Path<String>,
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, endpoint, state))
}

async fn handle_socket(mut socket: WebSocket, endpoint: String, state: ServerState) {
    let mut push_rx = state.push.subscribe();
    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(envelope) = serde_json::from_str::<Envelope>(&text) {
                            let _ = state.inbound.send((endpoint.clone(), envelope));
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            pushed = push_rx.recv() => {
                let Ok(text) = pushed else { break };
                if socket.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn spawn_signaling_server() -> anyhow::Result<(
    String,
    mpsc::UnboundedReceiver<(String, Envelope)>,
    broadcast::Sender<String>,
)> {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (push_tx, _) = broadcast::channel(16);
    let state = ServerState {
        inbound: inbound_tx,
        push: push_tx.clone(),
    };
    let app = Router::new()
        .route("/ws/:endpoint", get(ws_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((format!("ws://{addr}"), inbound_rx, push_tx))
}

async fn wait_for_subscriber(push: &broadcast::Sender<String>) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while push.receiver_count() == 0 {
        if tokio::time::Instant::now() >= deadline {
            panic!("signaling server never saw the client");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

fn counting_handler(count: &Arc<AtomicUsize>) -> Handler {
    let count = Arc::clone(count);
    Arc::new(move |_env| {
        count.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn envelopes_carry_sequenced_pid_and_producer() -> anyhow::Result<()> {
    let (ws_base, mut inbound, _push) = spawn_signaling_server().await?;
    let channel = ControlChannel::new(ws_base);
    channel.connect("player-7").await?;

    channel.send(OutboundMessage::new("message", "room-1", "first"));
    channel.send(OutboundMessage::new("message", "room-1", "second"));

    let (endpoint, first) = timeout(TEST_TIMEOUT, inbound.recv()).await?.unwrap();
    let (_, second) = timeout(TEST_TIMEOUT, inbound.recv()).await?.unwrap();

    assert_eq!(endpoint, "player-7");
    assert_eq!(first.pid, "1");
    assert_eq!(first.producer, "player-7");
    assert_eq!(first.payload, "first");
    assert_eq!(second.pid, "2");
    assert_eq!(second.group, "room-1");
    Ok(())
}

#[tokio::test]
async fn duplicate_handler_sees_each_push_once() -> anyhow::Result<()> {
    let (ws_base, _inbound, push) = spawn_signaling_server().await?;
    let channel = ControlChannel::new(ws_base);

    let count = Arc::new(AtomicUsize::new(0));
    let handler = counting_handler(&count);
    channel.register_handler(&handler);
    channel.register_handler(&handler);

    channel.connect("player-7").await?;
    wait_for_subscriber(&push).await;

    let envelope = Envelope {
        action: "answer".into(),
        group: "room-1".into(),
        payload: r#"{"sdp":"v=0"}"#.into(),
        pid: "9".into(),
        producer: "backend".into(),
    };
    push.send(serde_json::to_string(&envelope)?)?;

    timeout(TEST_TIMEOUT, async {
        while count.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    // Give a second (erroneous) invocation a chance to land before asserting.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn reconnect_replaces_producer() -> anyhow::Result<()> {
    let (ws_base, mut inbound, _push) = spawn_signaling_server().await?;
    let channel = ControlChannel::new(ws_base);
    channel.connect("player-old").await?;
    channel.connect("player-new").await?;

    channel.send(OutboundMessage::new("message", "room-1", "hello"));
    let (endpoint, envelope) = timeout(TEST_TIMEOUT, inbound.recv()).await?.unwrap();
    assert_eq!(endpoint, "player-new");
    assert_eq!(envelope.producer, "player-new");
    Ok(())
}

#[tokio::test]
async fn disconnect_silences_send() -> anyhow::Result<()> {
    let (ws_base, mut inbound, _push) = spawn_signaling_server().await?;
    let channel = ControlChannel::new(ws_base);
    channel.connect("player-7").await?;
    assert_eq!(*channel.state().borrow(), ConnectionState::Connected);

    channel.disconnect();
    assert_eq!(*channel.state().borrow(), ConnectionState::Disconnected);

    // Dropped silently; the server must never see it.
    channel.send(OutboundMessage::new("message", "room-1", "late"));
    let outcome = timeout(Duration::from_millis(300), inbound.recv()).await;
    assert!(outcome.is_err(), "envelope leaked after disconnect");
    Ok(())
}
