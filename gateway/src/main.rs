mod api;
mod gateway;
mod routes;

use crate::gateway::{Gateway, GatewayConfig, Listen};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::error::Error;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};

fn serve<S>(stream: S, gateway: &Arc<Gateway>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Use an adapter to access something implementing `tokio::io` traits as if they implement
    // `hyper::rt` IO traits.
    let io = TokioIo::new(stream);
    let gateway = Arc::clone(gateway);

    tokio::task::spawn(async move {
        if let Err(err) = http1::Builder::new()
            .keep_alive(true)
            .half_close(false)
            .writev(true)
            .max_buf_size(16 * 1024)
            .title_case_headers(false)
            .serve_connection(
                io,
                service_fn(move |req| routes::route(req, Arc::clone(&gateway))),
            )
            .await
        {
            tracing::warn!(error = ?err, "Error serving connection");
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Initialize tracing with default level WARN, overridable via RUST_LOG
    {
        use tracing_subscriber::{EnvFilter, fmt};
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt().with_env_filter(env_filter).try_init();
    }

    let config = GatewayConfig::from_env()?;
    let gateway = Arc::new(Gateway::connect(&config).await?);

    match &config.listen {
        Listen::Unix(socket_path) => {
            if std::fs::metadata(socket_path).is_ok() {
                std::fs::remove_file(socket_path)?;
            }

            let listener = UnixListener::bind(socket_path)?;

            let permissions = std::fs::Permissions::from_mode(0o666);
            std::fs::set_permissions(socket_path, permissions)?;
            tracing::info!(%socket_path, "Gateway listening");

            loop {
                let (stream, _) = listener.accept().await?;
                serve(stream, &gateway);
            }
        }
        Listen::Tcp(addr) => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(%addr, "Gateway listening");

            loop {
                let (stream, _) = listener.accept().await?;
                serve(stream, &gateway);
            }
        }
    }
}
