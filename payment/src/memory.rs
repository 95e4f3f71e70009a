use crate::filter::{Page, Pageable, PaymentFilter};
use crate::payment::Payment;
use crate::status::PaymentStatus;
use crate::store::{PaymentStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Keeps payments in insertion order behind a shared lock.
#[derive(Default, Clone)]
pub struct MemoryPaymentStore {
    payments: Arc<RwLock<Vec<Payment>>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payments(payments: impl IntoIterator<Item = Payment>) -> Self {
        Self {
            payments: Arc::new(RwLock::new(payments.into_iter().collect())),
        }
    }

    pub async fn all(&self) -> Vec<Payment> {
        self.payments.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<(), StoreError> {
        self.payments.write().await.push(payment.clone());
        Ok(())
    }

    async fn search(
        &self,
        filter: &PaymentFilter,
        pageable: &Pageable,
    ) -> Result<Page<Payment>, StoreError> {
        let payments = self.payments.read().await;
        let mut matched: Vec<&Payment> = payments.iter().filter(|p| filter.matches(p)).collect();
        matched.sort_by(|a, b| pageable.compare(a, b));

        let total = matched.len() as u64;
        let content = matched
            .into_iter()
            .skip(pageable.offset() as usize)
            .take(pageable.size as usize)
            .cloned()
            .collect();

        Ok(Page::new(content, total, pageable))
    }

    async fn sum_amount(
        &self,
        status: PaymentStatus,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<i64, StoreError> {
        let payments = self.payments.read().await;
        Ok(payments
            .iter()
            .filter(|p| p.status == status && p.timestamp >= from && p.timestamp <= to)
            .map(|p| p.amount)
            .sum())
    }
}
