use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use crate::protocol::{Envelope, OutboundMessage};
use crate::transport::{ConnectionState, TransportError};

/// Inbound envelope subscriber. Handlers are compared by allocation identity,
/// so registering the same `Handler` clone twice keeps a single entry.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Persistent control channel to the signaling endpoint.
///
/// Owns at most one socket; `connect` replaces any prior one wholesale. Every
/// outbound envelope is stamped with a locally incrementing `pid` and the
/// endpoint id as `producer`. Inbound envelopes are dispatched synchronously,
/// in registration order, to the registered handlers.
pub struct ControlChannel {
    ws_base: String,
    pid: AtomicU64,
    producer: Mutex<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    handlers: Arc<Mutex<Vec<Handler>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ControlChannel {
    pub fn new(ws_base: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        Self {
            ws_base: ws_base.into(),
            pid: AtomicU64::new(0),
            producer: Mutex::new(None),
            outbound: Mutex::new(None),
            handlers: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(state),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Open the socket for `endpoint_id`, closing any prior one first.
    pub async fn connect(&self, endpoint_id: &str) -> Result<(), TransportError> {
        self.teardown();
        self.state.send_replace(ConnectionState::Connecting);

        let url = endpoint_url(&self.ws_base, endpoint_id).inspect_err(|_| {
            self.state.send_replace(ConnectionState::Disconnected);
        })?;
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|err| {
            self.state.send_replace(ConnectionState::Disconnected);
            TransportError::Setup(format!("websocket connect failed: {err}"))
        })?;
        tracing::debug!(target: "control", url = %url, "control channel connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Message>();

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                if ws_write.send(message).await.is_err() {
                    break;
                }
            }
        });

        let handlers = Arc::clone(&self.handlers);
        let state = Arc::clone(&self.state);
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => dispatch(&handlers, &text),
                    Ok(Message::Binary(data)) => {
                        if let Ok(text) = String::from_utf8(data) {
                            dispatch(&handlers, &text);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::debug!(target: "control", "control channel closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(target: "control", "control channel closed: {err}");
                            }
                            _ => {
                                tracing::warn!(target: "control", "control channel error: {err}");
                            }
                        }
                        break;
                    }
                }
            }
            state.send_replace(ConnectionState::Disconnected);
        });

        *self.producer.lock().unwrap() = Some(endpoint_id.to_string());
        *self.outbound.lock().unwrap() = Some(send_tx);
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(writer_handle);
            tasks.push(reader_handle);
        }
        self.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    /// Stamp `pid`/`producer` on the message and transmit it. A missing or
    /// closed socket drops the envelope silently.
    pub fn send(&self, message: OutboundMessage) {
        let Some(tx) = self.outbound.lock().unwrap().clone() else {
            tracing::debug!(
                target: "control",
                action = %message.action,
                "send with no active socket; dropping envelope"
            );
            return;
        };
        let producer = self
            .producer
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default();
        let pid = self.pid.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = Envelope {
            action: message.action,
            group: message.group,
            payload: message.payload,
            pid: pid.to_string(),
            producer,
        };
        match serde_json::to_string(&envelope) {
            Ok(text) => {
                if tx.send(Message::Text(text)).is_err() {
                    tracing::debug!(
                        target: "control",
                        pid,
                        "socket writer gone; dropping envelope"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(target: "control", pid, "envelope serialization failed: {err}");
            }
        }
    }

    /// Add a subscriber; a handler already present is not added again.
    pub fn register_handler(&self, handler: &Handler) {
        let mut handlers = self.handlers.lock().unwrap();
        if handlers.iter().any(|h| Arc::ptr_eq(h, handler)) {
            return;
        }
        handlers.push(Arc::clone(handler));
    }

    /// Remove a previously registered subscriber, if present.
    pub fn remove_handler(&self, handler: &Handler) {
        let mut handlers = self.handlers.lock().unwrap();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Last-value stream of the socket lifecycle.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Close the socket and stop the reader/writer tasks.
    pub fn disconnect(&self) {
        if let Some(tx) = self.outbound.lock().unwrap().take() {
            let _ = tx.send(Message::Close(None));
        }
        self.teardown();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn teardown(&self) {
        self.outbound.lock().unwrap().take();
        let mut tasks = self.tasks.lock().unwrap();
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn dispatch_text(&self, text: &str) {
        dispatch(&self.handlers, text);
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

fn endpoint_url(ws_base: &str, endpoint_id: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(ws_base)
        .map_err(|err| TransportError::Setup(format!("invalid ws base {ws_base}: {err}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| TransportError::Setup("cannot extend ws url path".into()))?;
        segments.push("ws");
        segments.push(endpoint_id);
    }
    Ok(url)
}

fn dispatch(handlers: &Arc<Mutex<Vec<Handler>>>, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::debug!(target: "control", "ignoring malformed envelope: {err}");
            return;
        }
    };
    tracing::trace!(
        target: "control",
        action = %envelope.action,
        pid = %envelope.pid,
        "inbound envelope"
    );
    let snapshot: Vec<Handler> = handlers.lock().unwrap().clone();
    for handler in snapshot {
        handler(&envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn envelope_json(action: &str) -> String {
        serde_json::to_string(&Envelope {
            action: action.into(),
            group: "g".into(),
            payload: "p".into(),
            pid: "1".into(),
            producer: "remote".into(),
        })
        .unwrap()
    }

    #[test]
    fn endpoint_url_appends_ws_path() {
        let url = endpoint_url("ws://localhost:8089", "player-7").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8089/ws/player-7");
    }

    #[test]
    fn endpoint_url_rejects_garbage() {
        assert!(endpoint_url("not a url", "player-7").is_err());
    }

    #[test]
    fn send_before_connect_is_a_noop() {
        let channel = ControlChannel::new("ws://localhost:1");
        channel.send(OutboundMessage::new("message", "g", "payload"));
        assert_eq!(*channel.state().borrow(), ConnectionState::New);
    }

    #[test]
    fn duplicate_registration_invokes_once() {
        let channel = ControlChannel::new("ws://localhost:1");
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_handler = Arc::clone(&count);
        let handler: Handler = Arc::new(move |_env| {
            count_for_handler.fetch_add(1, Ordering::SeqCst);
        });
        channel.register_handler(&handler);
        channel.register_handler(&handler);
        channel.dispatch_text(&envelope_json("message"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let channel = ControlChannel::new("ws://localhost:1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_a = Arc::clone(&seen);
        let seen_b = Arc::clone(&seen);
        let first: Handler = Arc::new(move |_env| seen_a.lock().unwrap().push("first"));
        let second: Handler = Arc::new(move |_env| seen_b.lock().unwrap().push("second"));
        channel.register_handler(&first);
        channel.register_handler(&second);
        channel.dispatch_text(&envelope_json("message"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn removed_handler_is_not_invoked() {
        let channel = ControlChannel::new("ws://localhost:1");
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_handler = Arc::clone(&count);
        let handler: Handler = Arc::new(move |_env| {
            count_for_handler.fetch_add(1, Ordering::SeqCst);
        });
        channel.register_handler(&handler);
        channel.remove_handler(&handler);
        channel.dispatch_text(&envelope_json("message"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_envelopes_are_ignored() {
        let channel = ControlChannel::new("ws://localhost:1");
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_handler = Arc::clone(&count);
        let handler: Handler = Arc::new(move |_env| {
            count_for_handler.fetch_add(1, Ordering::SeqCst);
        });
        channel.register_handler(&handler);
        channel.dispatch_text("not json");
        channel.dispatch_text(r#"{"action":"x"}"#);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
