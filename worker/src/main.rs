mod dead_letter;
mod decider;
mod delivery_pool;
mod order_message;
mod pipeline;
mod publisher;
mod receiver;

use crate::dead_letter::DeadLetterQueue;
use crate::decider::RandomNumberDecider;
use crate::delivery_pool::{DEFAULT_QUEUE_CAPACITY, DeliveryPool, RetryPolicy};
use crate::pipeline::PaymentPipeline;
use crate::publisher::{SocketEventPublisher, SocketPublisher};
use crate::receiver::Receiver;
use payment::PgPaymentStore;
use payment::config::{ConfigError, Env};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub listen_path: String,
    pub publish_path: String,
    pub dead_letter_path: String,
    pub postgres_url: String,
    pub random_number_url: String,
    pub num_workers: usize,
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub decider_timeout: Duration,
    pub retry: RetryPolicy,
}

impl WorkerConfig {
    pub fn from_env() -> Result<WorkerConfig, ConfigError> {
        Self::from_lookup(&Env::process())
    }

    fn from_lookup<F>(env: &Env<F>) -> Result<WorkerConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let num_workers = env.parsed_or("NUM_WORKERS", 4usize)?.max(1);
        let defaults = RetryPolicy::default();

        Ok(WorkerConfig {
            listen_path: env.required("LISTEN_PATH")?,
            publish_path: env.required("PUBLISH_PATH")?,
            dead_letter_path: env.required("DEAD_LETTER_PATH")?,
            postgres_url: env.required("POSTGRES_URL")?,
            random_number_url: env.required("RANDOM_NUMBER_API_URL")?,
            num_workers,
            pool_size: env.parsed_or("POOL_SIZE", num_workers)?.max(1),
            queue_capacity: env.parsed_or("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?.max(1),
            decider_timeout: Duration::from_millis(
                env.parsed_or("DECIDER_TIMEOUT_MS", decider::DEFAULT_TIMEOUT.as_millis() as u64)?,
            ),
            retry: RetryPolicy {
                max_attempts: env.parsed_or("MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
                base_backoff: Duration::from_millis(
                    env.parsed_or("BASE_BACKOFF_MS", defaults.base_backoff.as_millis() as u64)?,
                ),
                max_backoff: Duration::from_millis(
                    env.parsed_or("MAX_BACKOFF_MS", defaults.max_backoff.as_millis() as u64)?,
                ),
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing with default level WARN, overridable via RUST_LOG
    {
        use tracing_subscriber::{EnvFilter, fmt};
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt().with_env_filter(env_filter).try_init();
    }

    let config = WorkerConfig::from_env()?;

    let store = PgPaymentStore::connect(&config.postgres_url, config.pool_size)?;
    store.ensure_schema().await?;

    let decider = RandomNumberDecider::new(&config.random_number_url, config.decider_timeout)?;
    let events = SocketEventPublisher::new(
        SocketPublisher::new(config.publish_path.clone(), config.num_workers).await,
    );
    let dead_letters = DeadLetterQueue::new(SocketPublisher::new(config.dead_letter_path.clone(), 2).await);

    let pipeline = Arc::new(PaymentPipeline::new(
        Arc::new(decider),
        Arc::new(store),
        Arc::new(events),
    ));

    let mut delivery_pool = DeliveryPool::new(
        config.num_workers,
        pipeline,
        Arc::new(dead_letters),
        config.retry,
    )
    .with_queue_capacity(config.queue_capacity);
    delivery_pool.start().await;
    let delivery_pool = Arc::new(delivery_pool);

    let mut receiver = Receiver::new(config.listen_path, delivery_pool);

    Ok(receiver.start().await?)
}
