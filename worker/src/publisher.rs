use payment::{Envelope, PaymentCreatedEvent};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::UnixStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),
    #[error("write error: {0}")]
    WriteError(#[source] std::io::Error),
    #[error("operation timed out")]
    Timeout,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes newline-delimited messages to a Unix socket over a small pool of
/// reusable connections.
#[derive(Clone)]
pub struct SocketPublisher {
    socket_path: String,
    max_conns: usize,
    conn_pool: mpsc::Sender<UnixStream>,
    conn_receiver: Arc<Mutex<mpsc::Receiver<UnixStream>>>,
    connect_timeout: Duration,
    pool_size: Arc<AtomicUsize>,
}

impl SocketPublisher {
    pub async fn new(socket_path: String, max_conns: usize) -> Self {
        let max_conns = max_conns.max(1);
        let (sender, receiver) = mpsc::channel(max_conns);

        // Warm a few connections; the channel may not be up yet, which is fine.
        let mut initial_connections = 0;
        for _ in 0..std::cmp::min(max_conns, 5) {
            if let Ok(Ok(conn)) = tokio::time::timeout(
                Duration::from_millis(100),
                UnixStream::connect(&socket_path),
            )
            .await
            {
                if sender.send(conn).await.is_ok() {
                    initial_connections += 1;
                }
            }
        }

        tracing::debug!(socket = %socket_path, initial_connections, "publisher ready");

        SocketPublisher {
            socket_path,
            max_conns,
            conn_pool: sender,
            conn_receiver: Arc::new(Mutex::new(receiver)),
            connect_timeout: Duration::from_millis(250),
            pool_size: Arc::new(AtomicUsize::new(initial_connections)),
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    pub async fn publish_envelope<T: Serialize>(
        &self,
        envelope: &Envelope<T>,
    ) -> Result<(), PublisherError> {
        let msg = serde_json::to_vec(envelope)?;
        self.publish(&msg).await
    }

    pub async fn publish(&self, msg: &[u8]) -> Result<(), PublisherError> {
        let mut conn = self.acquire().await?;

        let mut writer = BufWriter::with_capacity(1024, &mut conn);

        let write_result = async {
            writer.write_all(msg).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        match write_result {
            Ok(_) => {
                self.release(conn);
                Ok(())
            }
            Err(e) => {
                let _ = conn.shutdown().await;
                tokio::task::spawn({
                    let publisher = self.clone();
                    async move {
                        publisher.replace().await;
                    }
                });
                Err(PublisherError::WriteError(e))
            }
        }
    }

    async fn acquire(&self) -> Result<UnixStream, PublisherError> {
        if let Ok(mut receiver) = self.conn_receiver.try_lock() {
            if let Ok(conn) = receiver.try_recv() {
                self.pool_size.fetch_sub(1, Ordering::Relaxed);
                return Ok(conn);
            }
        }

        tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| PublisherError::Timeout)?
            .map_err(PublisherError::ConnectionFailed)
    }

    fn release(&self, conn: UnixStream) {
        if self.pool_size.load(Ordering::Relaxed) < self.max_conns
            && self.conn_pool.try_send(conn).is_ok()
        {
            self.pool_size.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn replace(&self) {
        if let Ok(Ok(conn)) = tokio::time::timeout(
            self.connect_timeout,
            UnixStream::connect(&self.socket_path),
        )
        .await
        {
            self.release(conn);
        }
    }
}

/// Outbound channel for payment outcomes.
pub trait EventPublisher: Send + Sync {
    /// Hands the event off for delivery. Failures are logged by the
    /// implementation and never reach the caller.
    fn publish_payment_created(&self, event: PaymentCreatedEvent);
}

pub struct SocketEventPublisher {
    publisher: SocketPublisher,
}

impl SocketEventPublisher {
    pub fn new(publisher: SocketPublisher) -> Self {
        Self { publisher }
    }

    /// Sends in a background task. The outcome is logged there; the handle
    /// only matters to callers that want to wait for it.
    pub fn spawn_publish(
        &self,
        event: PaymentCreatedEvent,
    ) -> JoinHandle<Result<(), PublisherError>> {
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let order_id = event.order_id.clone();
            let envelope = Envelope::keyed(order_id.clone(), event);
            let result = publisher.publish_envelope(&envelope).await;
            match &result {
                Ok(()) => tracing::debug!(%order_id, "payment created event published"),
                Err(e) => tracing::error!(
                    %order_id,
                    socket = %publisher.socket_path(),
                    error = %e,
                    "failed to publish payment created event"
                ),
            }
            result
        })
    }
}

impl EventPublisher for SocketEventPublisher {
    fn publish_payment_created(&self, event: PaymentCreatedEvent) {
        drop(self.spawn_publish(event));
    }
}
