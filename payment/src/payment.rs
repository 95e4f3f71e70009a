use crate::status::PaymentStatus;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A persisted payment record. Built once per processed order and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: String,
    pub user_id: String,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "paymentAmount")]
    pub amount: i64,
}

impl Payment {
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: i64,
        status: PaymentStatus,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.into(),
            user_id: user_id.into(),
            status,
            timestamp: now,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_id: String,
    pub user_id: String,
    pub payment_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCreatedEvent {
    pub order_id: String,
    pub status: PaymentStatus,
}

impl From<&Payment> for PaymentCreatedEvent {
    fn from(p: &Payment) -> Self {
        Self {
            order_id: p.order_id.clone(),
            status: p.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn payment_uses_wire_field_names() {
        let payment = Payment::new(
            "order-1",
            "user-1",
            100,
            PaymentStatus::Paid,
            datetime!(2025-03-01 12:00:00 UTC),
        );

        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["orderId"], "order-1");
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["status"], "PAID");
        assert_eq!(json["paymentAmount"], 100);
        assert_eq!(json["timestamp"], "2025-03-01T12:00:00Z");
        assert_eq!(json["id"], payment.id.to_string());
    }

    #[test]
    fn new_payments_get_distinct_ids() {
        let now = OffsetDateTime::now_utc();
        let a = Payment::new("o", "u", 1, PaymentStatus::Paid, now);
        let b = Payment::new("o", "u", 1, PaymentStatus::Paid, now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn order_created_event_reads_camel_case() {
        let event: OrderCreatedEvent = serde_json::from_str(
            r#"{"orderId":"o-9","userId":"u-3","paymentAmount":250}"#,
        )
        .unwrap();

        assert_eq!(event.order_id, "o-9");
        assert_eq!(event.user_id, "u-3");
        assert_eq!(event.payment_amount, 250);
    }

    #[test]
    fn payment_created_event_mirrors_payment() {
        let payment = Payment::new("o-2", "u", 5, PaymentStatus::Failed, OffsetDateTime::now_utc());
        let event = PaymentCreatedEvent::from(&payment);

        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"orderId":"o-2","status":"FAILED"}"#
        );
    }
}
