use crate::publisher::SocketPublisher;
use payment::Envelope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The original payload, or the raw line as a string when it was not JSON.
    pub value: serde_json::Value,
    pub error: String,
    pub attempts: u32,
}

impl DeadLetter {
    pub fn new(raw: &[u8], error: impl ToString, attempts: u32) -> Self {
        let value = serde_json::from_slice(raw)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(raw).into_owned()));

        Self {
            value,
            error: error.to_string(),
            attempts,
        }
    }
}

/// Parks messages that cannot be processed.
pub struct DeadLetterQueue {
    publisher: SocketPublisher,
}

impl DeadLetterQueue {
    pub fn new(publisher: SocketPublisher) -> Self {
        Self { publisher }
    }

    pub async fn send(&self, key: Option<String>, letter: DeadLetter) {
        tracing::warn!(
            key = key.as_deref().unwrap_or("-"),
            error = %letter.error,
            attempts = letter.attempts,
            "dead-lettering message"
        );

        let envelope = Envelope { key, value: letter };
        if let Err(e) = self.publisher.publish_envelope(&envelope).await {
            tracing::error!(
                socket = %self.publisher.socket_path(),
                error = %e,
                "failed to write dead letter, message dropped"
            );
        }
    }
}
