use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::HeaderValue;
use hyper::{Request, StatusCode, Uri};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use payment::{OrderCreatedEvent, PaymentStatus};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DeciderError {
    #[error("invalid numeric source url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("numeric source did not answer within {0:?}")]
    Timeout(Duration),
    #[error("numeric source unavailable: {0}")]
    Unavailable(#[from] hyper_util::client::legacy::Error),
    #[error("numeric source answered {0}")]
    Status(StatusCode),
    #[error("failed to read numeric source body: {0}")]
    Body(#[from] hyper::Error),
    #[error("numeric source returned malformed body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("numeric source returned no numbers")]
    Empty,
}

/// Decides whether an order gets paid.
#[async_trait]
pub trait OutcomeDecider: Send + Sync {
    async fn decide(&self, event: &OrderCreatedEvent) -> Result<PaymentStatus, DeciderError>;
}

/// Asks a random-number endpoint for `[n, ...]` and pays on even `n`.
pub struct RandomNumberDecider {
    url: Uri,
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
}

impl RandomNumberDecider {
    /// Only plain `http` URLs are accepted; the connector has no TLS.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DeciderError> {
        let invalid = |reason: String| DeciderError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let url = url.parse::<Uri>().map_err(|e| invalid(e.to_string()))?;
        if url.scheme_str() != Some("http") {
            return Err(invalid(format!(
                "unsupported scheme {:?}, expected http",
                url.scheme_str().unwrap_or("")
            )));
        }
        if url.host().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        let client =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            url,
            client,
            timeout,
        })
    }

    async fn draw(&self) -> Result<i64, DeciderError> {
        let mut req = Request::new(Empty::<Bytes>::new());
        *req.uri_mut() = self.url.clone();
        req.headers_mut().insert(
            hyper::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        let res = self.client.request(req).await?;

        if !res.status().is_success() {
            return Err(DeciderError::Status(res.status()));
        }

        let body = res.into_body().collect().await?.to_bytes();
        let numbers: Vec<i64> = serde_json::from_slice(&body)?;

        numbers.first().copied().ok_or(DeciderError::Empty)
    }
}

#[async_trait]
impl OutcomeDecider for RandomNumberDecider {
    async fn decide(&self, event: &OrderCreatedEvent) -> Result<PaymentStatus, DeciderError> {
        tracing::debug!(order_id = %event.order_id, url = %self.url, "fetching random number");

        let draw = tokio::time::timeout(self.timeout, self.draw())
            .await
            .map_err(|_| DeciderError::Timeout(self.timeout))
            .and_then(|r| r)
            .inspect_err(|e| {
                tracing::warn!(order_id = %event.order_id, error = %e, "failed to fetch random number")
            })?;

        let status = PaymentStatus::from_draw(draw);
        tracing::debug!(order_id = %event.order_id, draw, %status, "payment outcome decided");
        Ok(status)
    }
}
