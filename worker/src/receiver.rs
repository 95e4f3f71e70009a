use crate::delivery_pool::DeliveryPool;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;

const MAX_PRODUCERS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("Socket error: {0}")]
    SocketError(#[from] std::io::Error),
}

/// Listens for order-created producers on a unix socket. Each newline
/// terminated line is one message.
pub struct Receiver {
    socket_path: String,
    deliveries: Arc<DeliveryPool>,
    conn_sem: Arc<Semaphore>,
}

impl Receiver {
    pub fn new(socket_path: String, deliveries: Arc<DeliveryPool>) -> Self {
        Self {
            socket_path,
            deliveries,
            conn_sem: Arc::new(Semaphore::new(MAX_PRODUCERS)),
        }
    }

    pub async fn start(&mut self) -> Result<(), ReceiverError> {
        let listener = self.bind()?;
        self.accept_loop(listener).await;
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ReceiverError> {
        tracing::info!("Starting receiver");
        if std::fs::metadata(&self.socket_path).is_ok() {
            let _ = std::fs::remove_file(&self.socket_path);
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        if let Err(e) = std::fs::set_permissions(
            &self.socket_path,
            std::os::unix::fs::PermissionsExt::from_mode(0o600),
        ) {
            tracing::warn!(error = %e, "Failed to set permissions on socket");
        }

        Ok(listener)
    }

    async fn accept_loop(&self, listener: UnixListener) {
        tracing::info!("Listening on {}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tracing::debug!("Accepted producer connection");

                    let deliveries = Arc::clone(&self.deliveries);
                    let semaphore = Arc::clone(&self.conn_sem);

                    tokio::task::spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return;
                        };
                        Self::read_producer(stream, deliveries).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    async fn read_producer(stream: UnixStream, deliveries: Arc<DeliveryPool>) {
        let mut reader = BufReader::with_capacity(8192, stream);
        let mut buffer = Vec::with_capacity(1024);

        loop {
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => {
                    tracing::debug!("Producer disconnected");
                    return;
                }
                Ok(_) => {
                    if buffer.last() == Some(&b'\n') {
                        buffer.pop();
                    }

                    if !buffer.iter().all(u8::is_ascii_whitespace) {
                        let bytes = Bytes::copy_from_slice(&buffer);
                        if let Err(e) = deliveries.submit(bytes).await {
                            tracing::warn!(error = %e, "Message rejected by delivery pool and dead-lettered");
                        }
                    }

                    buffer.clear();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error reading from connection");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::DeadLetterQueue;
    use crate::delivery_pool::RetryPolicy;
    use crate::pipeline::PaymentPipeline;
    use crate::pipeline::testing::{FixedDecider, RecordingPublisher};
    use crate::publisher::SocketPublisher;
    use payment::{MemoryPaymentStore, PaymentStatus};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn lines_from_producers_become_payments() {
        let dir = tempfile::tempdir().unwrap();
        let listen_path = dir.path().join("orders.sock").to_string_lossy().into_owned();
        let dlq_path = dir.path().join("dlq.sock").to_string_lossy().into_owned();

        let store = MemoryPaymentStore::new();
        let pipeline = Arc::new(PaymentPipeline::new(
            Arc::new(FixedDecider(PaymentStatus::Paid)),
            Arc::new(store.clone()),
            Arc::new(RecordingPublisher::default()),
        ));
        let dlq = Arc::new(DeadLetterQueue::new(SocketPublisher::new(dlq_path, 1).await));
        let mut pool = DeliveryPool::new(2, pipeline, dlq, RetryPolicy::default());
        pool.start().await;

        let receiver = Receiver::new(listen_path.clone(), Arc::new(pool));
        let listener = receiver.bind().unwrap();
        tokio::spawn(async move { receiver.accept_loop(listener).await });

        let mut producer = UnixStream::connect(&listen_path).await.unwrap();
        producer
            .write_all(
                b"{\"orderId\":\"o-1\",\"userId\":\"u-1\",\"paymentAmount\":100}\n\n\
                  {\"key\":\"o-2\",\"value\":{\"orderId\":\"o-2\",\"userId\":\"u-2\",\"paymentAmount\":5}}\n",
            )
            .await
            .unwrap();
        producer.flush().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len().await < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("payments were not stored in time");

        let mut orders: Vec<_> = store.all().await.into_iter().map(|p| p.order_id).collect();
        orders.sort();
        assert_eq!(orders, vec!["o-1", "o-2"]);
    }
}
