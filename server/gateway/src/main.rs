mod config;
mod connection;
mod dispatcher;
mod frame;
mod rate_limiter;
mod session;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_control::{InMemoryDataManager, Manager};
use clap::Parser;
use config::Config;
use rate_limiter::RateLimiter;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Built with a manual `Builder` rather than `#[tokio::main]` because the
/// worker-thread count (spec.md §5: `max(12, hardware_concurrency)`) is a
/// runtime config value, not available at macro-expansion time.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = Arc::new(Config::parse());
    let worker_threads = config.resolved_worker_threads();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Arc<Config>) -> Result<()> {
    let addr: SocketAddr = config.listen.parse().context("parse --listen")?;

    let manager = Arc::new(Manager::new(Box::new(InMemoryDataManager)));
    let acceptor = tls::build_acceptor(config.tls_cert_pem.as_deref(), config.tls_key_pem.as_deref())
        .context("building TLS acceptor")?;
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_global_capacity,
        config.rate_limit_peer_capacity,
    ));

    tokio::spawn(connection::run_rate_limiter_sweep(
        limiter.clone(),
        Duration::from_secs(config.rate_limit_sweep_secs),
        Duration::from_secs(config.rate_limit_idle_secs),
    ));
    tokio::spawn(connection::run_retention_sweep(
        manager.clone(),
        Duration::from_secs(config.retention_sweep_minutes * 60),
        config.retention_days,
    ));

    let listener = TcpListener::bind(addr).await.context("bind listener")?;
    info!(%addr, worker_threads = config.resolved_worker_threads(), "gateway listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted.context("accept")?;
                if !limiter.allow(peer_addr.ip()) {
                    warn!(%peer_addr, "rate limited, dropping connection");
                    continue;
                }

                let acceptor = acceptor.clone();
                let manager = manager.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection::handle(stream, peer_addr, acceptor, manager, config).await {
                        warn!(%peer_addr, "connection ended with error: {e:#}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
