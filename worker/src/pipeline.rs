use crate::decider::{DeciderError, OutcomeDecider};
use crate::publisher::EventPublisher;
use payment::{OrderCreatedEvent, Payment, PaymentCreatedEvent, PaymentStore, StoreError};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid order event: {0}")]
    InvalidEvent(&'static str),
    #[error("payment outcome unavailable: {0}")]
    Decider(#[from] DeciderError),
    #[error("failed to store payment: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Bad input will never succeed; everything else may on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::InvalidEvent(_))
    }
}

/// Turns an order-created event into a stored payment and an outbound
/// payment-created event.
pub struct PaymentPipeline {
    decider: Arc<dyn OutcomeDecider>,
    store: Arc<dyn PaymentStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl PaymentPipeline {
    pub fn new(
        decider: Arc<dyn OutcomeDecider>,
        store: Arc<dyn PaymentStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            decider,
            store,
            publisher,
        }
    }

    pub async fn create(&self, event: &OrderCreatedEvent) -> Result<Payment, PipelineError> {
        tracing::debug!(order_id = %event.order_id, "processing order created event");
        validate(event)?;

        let status = self.decider.decide(event).await?;

        let payment = Payment::new(
            event.order_id.clone(),
            event.user_id.clone(),
            event.payment_amount,
            status,
            OffsetDateTime::now_utc(),
        );
        self.store.insert(&payment).await?;
        tracing::debug!(payment_id = %payment.id, order_id = %payment.order_id, %status, "payment saved");

        // No outbox: a crash after the insert leaves the payment unannounced.
        self.publisher
            .publish_payment_created(PaymentCreatedEvent::from(&payment));

        Ok(payment)
    }
}

fn validate(event: &OrderCreatedEvent) -> Result<(), PipelineError> {
    if event.order_id.trim().is_empty() {
        return Err(PipelineError::InvalidEvent("orderId is blank"));
    }
    if event.user_id.trim().is_empty() {
        return Err(PipelineError::InvalidEvent("userId is blank"));
    }
    if event.payment_amount < 0 {
        return Err(PipelineError::InvalidEvent("paymentAmount is negative"));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::publisher::{PublisherError, SocketEventPublisher, SocketPublisher};
    use payment::{MemoryPaymentStore, PaymentStatus};
    use tokio::task::JoinHandle;

    fn pipeline(
        decider: impl OutcomeDecider + 'static,
        store: &MemoryPaymentStore,
        publisher: Arc<dyn EventPublisher>,
    ) -> PaymentPipeline {
        PaymentPipeline::new(Arc::new(decider), Arc::new(store.clone()), publisher)
    }

    #[tokio::test]
    async fn stores_exactly_one_payment_and_publishes_it() {
        let store = MemoryPaymentStore::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = pipeline(FixedDecider(PaymentStatus::Paid), &store, publisher.clone());

        let received_at = OffsetDateTime::now_utc();
        let payment = pipeline.create(&order("o-1", "u-1", 100)).await.unwrap();

        let stored = store.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], payment);
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.amount, 100);
        assert!(payment.timestamp >= received_at);

        let events = publisher.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![PaymentCreatedEvent {
                order_id: "o-1".to_string(),
                status: PaymentStatus::Paid
            }]
        );
    }

    #[tokio::test]
    async fn failed_outcome_is_still_recorded() {
        let store = MemoryPaymentStore::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = pipeline(FixedDecider(PaymentStatus::Failed), &store, publisher.clone());

        pipeline.create(&order("o-2", "u-1", 50)).await.unwrap();

        assert_eq!(store.all().await[0].status, PaymentStatus::Failed);
        assert_eq!(publisher.events.lock().unwrap()[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn decider_failure_stores_and_publishes_nothing() {
        let store = MemoryPaymentStore::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = pipeline(FlakyDecider::new(1), &store, publisher.clone());

        let err = pipeline.create(&order("o-3", "u-1", 10)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Decider(DeciderError::Empty)));
        assert!(err.is_retryable());
        assert_eq!(store.len().await, 0);
        assert!(publisher.events.lock().unwrap().is_empty());
    }

    /// Keeps the handles of the background sends so a test can wait for them.
    struct TrackedPublisher {
        inner: SocketEventPublisher,
        sends: std::sync::Mutex<Vec<JoinHandle<Result<(), PublisherError>>>>,
    }

    impl EventPublisher for TrackedPublisher {
        fn publish_payment_created(&self, event: PaymentCreatedEvent) {
            let handle = self.inner.spawn_publish(event);
            self.sends.lock().unwrap().push(handle);
        }
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nobody-listens.sock");
        let publisher = Arc::new(TrackedPublisher {
            inner: SocketEventPublisher::new(
                SocketPublisher::new(missing.to_string_lossy().into_owned(), 1).await,
            ),
            sends: std::sync::Mutex::new(Vec::new()),
        });

        let store = MemoryPaymentStore::new();
        let pipeline = pipeline(FixedDecider(PaymentStatus::Paid), &store, publisher.clone());

        let payment = pipeline.create(&order("o-4", "u-1", 70)).await.unwrap();

        let sends: Vec<_> = publisher.sends.lock().unwrap().drain(..).collect();
        assert_eq!(sends.len(), 1);
        for send in sends {
            let result = tokio::time::timeout(std::time::Duration::from_secs(5), send)
                .await
                .expect("publish task did not finish")
                .unwrap();
            assert!(matches!(result, Err(PublisherError::ConnectionFailed(_))));
        }

        assert_eq!(store.all().await, vec![payment]);
    }

    #[tokio::test]
    async fn invalid_events_are_not_retryable() {
        let store = MemoryPaymentStore::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = pipeline(FixedDecider(PaymentStatus::Paid), &store, publisher);

        for event in [order(" ", "u", 1), order("o", "", 1), order("o", "u", -5)] {
            let err = pipeline.create(&event).await.unwrap_err();
            assert!(matches!(err, PipelineError::InvalidEvent(_)));
            assert!(!err.is_retryable());
        }
        assert_eq!(store.len().await, 0);
    }
}
