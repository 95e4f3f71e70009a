use payment::config::{ConfigError, Env};
use payment::{PaymentStore, PgPaymentStore, StoreError};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

const DEFAULT_POOL_SIZE: usize = 3;

/// Where the HTTP server accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listen {
    Unix(String),
    Tcp(SocketAddr),
}

impl FromStr for Listen {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().strip_prefix("unix:") {
            Some(path) => Ok(Listen::Unix(path.to_string())),
            None => s.trim().parse().map(Listen::Tcp),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub listen: Listen,
    pub postgres_url: String,
    pub pool_size: usize,
    pub admin_token: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&Env::process())
    }

    fn from_lookup<F>(env: &Env<F>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen = env.required("GATEWAY_LISTEN")?;
        let listen = listen.parse().map_err(|_| ConfigError::Invalid {
            var: "GATEWAY_LISTEN",
            value: listen,
        })?;

        Ok(Self {
            listen,
            postgres_url: env.required("POSTGRES_URL")?,
            pool_size: env.parsed_or("POOL_SIZE", DEFAULT_POOL_SIZE)?.max(1),
            admin_token: env.optional("GATEWAY_ADMIN_TOKEN"),
        })
    }
}

pub struct Gateway {
    pub store: Arc<dyn PaymentStore>,
    pub admin_token: Option<String>,
}

impl Gateway {
    pub fn new(store: Arc<dyn PaymentStore>, admin_token: Option<String>) -> Self {
        Self { store, admin_token }
    }

    pub async fn connect(config: &GatewayConfig) -> Result<Self, StoreError> {
        let store = PgPaymentStore::connect(&config.postgres_url, config.pool_size)?;
        store.ensure_schema().await?;

        Ok(Self::new(Arc::new(store), config.admin_token.clone()))
    }
}
