use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use wtransport::endpoint::endpoint_side::Client;
use wtransport::{ClientConfig, Connection, Endpoint, SendStream};

use crate::transport::TransportError;

const PING_INTERVAL: Duration = Duration::from_secs(3);

/// Alternate transport prototype: one HTTP/3 session with a single
/// bidirectional stream, a background read loop and a periodic ping. Write
/// errors are logged and otherwise swallowed.
pub struct WebTransportClient {
    url: String,
    endpoint: AsyncMutex<Option<Endpoint<Client>>>,
    connection: AsyncMutex<Option<Connection>>,
    writer: Arc<AsyncMutex<Option<SendStream>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WebTransportClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            endpoint: AsyncMutex::new(None),
            connection: AsyncMutex::new(None),
            writer: Arc::new(AsyncMutex::new(None)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Establish the session, open the bidirectional stream and start the
    /// read loop and ping ticker. Replaces any prior session.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.disconnect().await;

        let endpoint = Endpoint::client(ClientConfig::default())
            .map_err(|err| TransportError::Setup(format!("webtransport endpoint failed: {err}")))?;
        let connection = endpoint
            .connect(self.url.as_str())
            .await
            .map_err(|err| TransportError::Setup(format!("webtransport connect failed: {err}")))?;
        tracing::debug!(target: "webtransport", url = %self.url, "webtransport session established");

        let (send_stream, mut recv_stream) = connection
            .open_bi()
            .await
            .map_err(|err| TransportError::Setup(format!("stream open failed: {err}")))?
            .await
            .map_err(|err| TransportError::Setup(format!("stream open failed: {err}")))?;

        *self.writer.lock().await = Some(send_stream);

        let reader_handle = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match recv_stream.read(&mut buf).await {
                    Ok(Some(n)) => {
                        let text = String::from_utf8_lossy(&buf[..n]);
                        tracing::info!(target: "webtransport", payload = %text, "stream message");
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!(target: "webtransport", "read loop stopped: {err}");
                        break;
                    }
                }
            }
        });

        let writer = Arc::clone(&self.writer);
        let ping_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            loop {
                ticker.tick().await;
                let mut guard = writer.lock().await;
                let Some(stream) = guard.as_mut() else {
                    break;
                };
                if let Err(err) = stream.write_all(b"Ping").await {
                    tracing::debug!(target: "webtransport", "ping failed: {err}");
                    break;
                }
            }
        });

        *self.endpoint.lock().await = Some(endpoint);
        *self.connection.lock().await = Some(connection);
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(reader_handle);
            tasks.push(ping_handle);
        }
        Ok(())
    }

    /// Write a UTF-8 payload to the stream. No-op without an open writer;
    /// write errors are logged, not propagated.
    pub async fn send(&self, message: &str) {
        let mut guard = self.writer.lock().await;
        let Some(stream) = guard.as_mut() else {
            return;
        };
        if let Err(err) = stream.write_all(message.as_bytes()).await {
            tracing::warn!(target: "webtransport", "send failed: {err}");
        }
    }

    /// Stop the ticker and read loop and drop the stream and session.
    pub async fn disconnect(&self) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
        self.writer.lock().await.take();
        self.connection.lock().await.take();
        self.endpoint.lock().await.take();
    }
}

impl Drop for WebTransportClient {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}
