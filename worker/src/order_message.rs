use bytes::Bytes;
use payment::{Envelope, OrderCreatedEvent};

/// An order-created delivery travelling through the worker pool.
#[derive(Debug, Clone)]
pub struct OrderMessage {
    pub key: String,
    pub event: OrderCreatedEvent,
    pub raw: Bytes,
    pub attempts: u32,
}

impl OrderMessage {
    /// Accepts either an envelope or a bare event. Without an explicit key
    /// the order id routes the message.
    pub fn decode(raw: Bytes) -> Result<Self, serde_json::Error> {
        let (key, event) = match serde_json::from_slice::<Envelope<OrderCreatedEvent>>(&raw) {
            Ok(envelope) => (envelope.key, envelope.value),
            Err(_) => (None, serde_json::from_slice::<OrderCreatedEvent>(&raw)?),
        };

        Ok(Self {
            key: key.unwrap_or_else(|| event.order_id.clone()),
            event,
            raw,
            attempts: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_event_keyed_by_order() {
        let msg = OrderMessage::decode(Bytes::from_static(
            br#"{"orderId":"o-1","userId":"u-1","paymentAmount":100}"#,
        ))
        .unwrap();

        assert_eq!(msg.key, "o-1");
        assert_eq!(msg.event.user_id, "u-1");
        assert_eq!(msg.attempts, 0);
    }

    #[test]
    fn decodes_envelope_with_explicit_key() {
        let msg = OrderMessage::decode(Bytes::from_static(
            br#"{"key":"k-9","value":{"orderId":"o-2","userId":"u-2","paymentAmount":5}}"#,
        ))
        .unwrap();

        assert_eq!(msg.key, "k-9");
        assert_eq!(msg.event.order_id, "o-2");
    }

    #[test]
    fn envelope_without_key_falls_back_to_order_id() {
        let msg = OrderMessage::decode(Bytes::from_static(
            br#"{"value":{"orderId":"o-3","userId":"u","paymentAmount":1}}"#,
        ))
        .unwrap();

        assert_eq!(msg.key, "o-3");
    }

    #[test]
    fn rejects_garbage() {
        assert!(OrderMessage::decode(Bytes::from_static(b"not json")).is_err());
        assert!(OrderMessage::decode(Bytes::from_static(br#"{"orderId":"o"}"#)).is_err());
    }
}
