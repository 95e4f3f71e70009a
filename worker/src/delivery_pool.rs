use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::order_message::OrderMessage;
use crate::pipeline::PaymentPipeline;
use bytes::Bytes;
use std::collections::BinaryHeap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery pool is not running")]
    QueueClosed,
    #[error("worker queue is full")]
    QueueFull,
}

pub const DEFAULT_QUEUE_CAPACITY: usize = 32768;
const RETRY_QUEUE_SIZE: usize = 32768;
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first delivery included.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(2_000),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for the given attempt. `seed` spreads messages that
    /// fail on the same attempt across the jitter range.
    pub fn backoff(&self, attempts: u32, seed: u64) -> Duration {
        let base = self.base_backoff.as_millis() as u64;
        let cap = self.max_backoff.as_millis() as u64;
        let delay = base
            .saturating_mul(1_u64 << attempts.saturating_sub(1).min(10))
            .min(cap);

        let jitter_range = (delay as f64 * JITTER_FRACTION) as u64;
        let pseudo = seed
            .wrapping_add(u64::from(attempts))
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let jitter = (pseudo >> 33) % (2 * jitter_range).max(1);

        Duration::from_millis(delay.saturating_sub(jitter_range).saturating_add(jitter))
    }
}

struct RetryItem {
    msg: OrderMessage,
    next_attempt: Instant,
}

impl PartialEq for RetryItem {
    fn eq(&self, other: &Self) -> bool {
        self.next_attempt == other.next_attempt
    }
}

impl Eq for RetryItem {}

impl PartialOrd for RetryItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.next_attempt.cmp(&self.next_attempt)
    }
}

#[derive(Clone)]
struct DeliveryDependencies {
    pipeline: Arc<PaymentPipeline>,
    dead_letters: Arc<DeadLetterQueue>,
    retry: RetryPolicy,
}

/// Fans order-created messages out to workers. Failed messages are retried
/// with backoff and end up on the dead-letter channel when they cannot be
/// processed.
#[derive(Clone)]
pub struct DeliveryPool {
    senders: Vec<mpsc::Sender<OrderMessage>>,
    num_workers: usize,
    queue_capacity: usize,
    deps: DeliveryDependencies,
}

impl DeliveryPool {
    pub fn new(
        num_workers: usize,
        pipeline: Arc<PaymentPipeline>,
        dead_letters: Arc<DeadLetterQueue>,
        retry: RetryPolicy,
    ) -> Self {
        let num_workers = num_workers.max(1);
        Self {
            senders: Vec::with_capacity(num_workers),
            num_workers,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            deps: DeliveryDependencies {
                pipeline,
                dead_letters,
                retry,
            },
        }
    }

    /// Total queued messages across workers, split evenly between them.
    /// Takes effect on `start`.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Messages that cannot be queued are dead-lettered before the error is
    /// returned.
    pub async fn submit(&self, raw: Bytes) -> Result<(), DeliveryError> {
        let msg = match OrderMessage::decode(raw.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                self.deps
                    .dead_letters
                    .send(None, DeadLetter::new(&raw, format!("malformed message: {e}"), 0))
                    .await;
                return Ok(());
            }
        };

        let key = msg.key.clone();
        let attempts = msg.attempts;
        if let Err(e) = self.submit_internal(msg) {
            self.deps
                .dead_letters
                .send(Some(key), DeadLetter::new(&raw, &e, attempts))
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Messages sharing a key always land on the same worker, so they are
    /// processed in arrival order.
    fn worker_for(&self, key: &str) -> usize {
        (key_hash(key) % self.senders.len() as u64) as usize
    }

    fn submit_internal(&self, msg: OrderMessage) -> Result<(), DeliveryError> {
        if self.senders.is_empty() {
            return Err(DeliveryError::QueueClosed);
        }

        let worker_index = self.worker_for(&msg.key);

        self.senders[worker_index]
            .try_send(msg)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::QueueClosed,
            })?;

        tracing::debug!("Submitted message to worker {}", worker_index);
        Ok(())
    }

    pub async fn start(&mut self) {
        let mut senders = Vec::with_capacity(self.num_workers);
        let worker_channel_size = (self.queue_capacity / self.num_workers).max(1);
        let (retry_sender, retry_receiver) = mpsc::channel(RETRY_QUEUE_SIZE);

        for worker_id in 0..self.num_workers {
            let (sender, receiver) = mpsc::channel(worker_channel_size);
            let deps = self.deps.clone();
            let retry_sender_clone = retry_sender.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, receiver, retry_sender_clone, deps).await;
            });

            senders.push(sender);
        }

        self.senders = senders;

        let self_clone = self.clone();
        tokio::spawn(async move {
            Self::retry_loop(self_clone, retry_receiver).await;
        });

        tracing::info!("Started {} workers", self.num_workers);
    }

    async fn retry_loop(self, mut retry_receiver: mpsc::Receiver<RetryItem>) {
        let mut heap: BinaryHeap<RetryItem> = BinaryHeap::with_capacity(8 * 1024);

        loop {
            let now = Instant::now();
            while heap.peek().is_some_and(|item| item.next_attempt <= now) {
                let Some(item) = heap.pop() else { break };
                let key = item.msg.key.clone();
                let raw = item.msg.raw.clone();
                let attempts = item.msg.attempts;
                if let Err(e) = self.submit_internal(item.msg) {
                    tracing::error!("Failed to resubmit retry message: {}", e);
                    self.deps
                        .dead_letters
                        .send(Some(key), DeadLetter::new(&raw, e, attempts))
                        .await;
                }
            }

            let next_timer = heap
                .peek()
                .map(|item| tokio::time::sleep_until(item.next_attempt));

            tokio::select! {
                item = retry_receiver.recv() => {
                    match item {
                        Some(item) => heap.push(item),
                        None if heap.is_empty() => return,
                        None => {}
                    }
                }
                _ = async {
                    match next_timer {
                        Some(timer) => timer.await,
                        None => std::future::pending().await,
                    }
                } => {}
            }
        }
    }

    async fn retry(
        mut msg: OrderMessage,
        error: String,
        retry_sender: &mpsc::Sender<RetryItem>,
        deps: &DeliveryDependencies,
    ) {
        msg.attempts += 1;

        if msg.attempts >= deps.retry.max_attempts {
            tracing::warn!(key = %msg.key, attempts = msg.attempts, "Max attempts exceeded");
            deps.dead_letters
                .send(Some(msg.key.clone()), DeadLetter::new(&msg.raw, error, msg.attempts))
                .await;
            return;
        }

        let delay = deps.retry.backoff(msg.attempts, key_hash(&msg.key));
        let item = RetryItem {
            msg,
            next_attempt: Instant::now() + delay,
        };

        if let Err(e) = retry_sender.try_send(item) {
            tracing::warn!("Retry queue is full, dead-lettering message");
            let msg = match e {
                mpsc::error::TrySendError::Full(item) | mpsc::error::TrySendError::Closed(item) => {
                    item.msg
                }
            };
            deps.dead_letters
                .send(Some(msg.key.clone()), DeadLetter::new(&msg.raw, error, msg.attempts))
                .await;
        }
    }

    async fn worker_loop(
        id: usize,
        mut receiver: mpsc::Receiver<OrderMessage>,
        retry_sender: mpsc::Sender<RetryItem>,
        deps: DeliveryDependencies,
    ) {
        while let Some(mut msg) = receiver.recv().await {
            match deps.pipeline.create(&msg.event).await {
                Ok(payment) => {
                    tracing::debug!(worker_id = id, payment_id = %payment.id, "order processed");
                }
                Err(e) if e.is_retryable() => {
                    tracing::info!(worker_id = id, key = %msg.key, error = %e, "Worker failed to process message retrying");
                    Self::retry(msg, e.to_string(), &retry_sender, &deps).await;
                }
                Err(e) => {
                    msg.attempts += 1;
                    deps.dead_letters
                        .send(Some(msg.key.clone()), DeadLetter::new(&msg.raw, e, msg.attempts))
                        .await;
                }
            }
        }
        tracing::info!(worker_id = id, "Worker shutting down - channel closed");
    }
}

fn key_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
