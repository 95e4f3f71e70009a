use serde::{Deserialize, Serialize};

/// One line on a message channel: an optional routing key plus the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub key: Option<String>,
    pub value: T,
}

impl<T> Envelope<T> {
    pub fn keyed(key: impl Into<String>, value: T) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }
}
