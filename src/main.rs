use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use courtbook::clock::SystemClock;
use courtbook::engine::Engine;
use courtbook::notify::{NotifyHub, log_outbound};
use courtbook::policy::{BookingPolicy, PolicyOverrides};
use courtbook::store::WalStore;
use courtbook::{reaper, wire};

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse an optional env var; a value that is set but malformed is an error.
fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{name}: invalid value {raw:?}")),
        Err(_) => Ok(None),
    }
}

/// Default policy with any `COURTBOOK_*` overrides applied.
fn policy_from_env() -> Result<BookingPolicy, String> {
    let overrides = PolicyOverrides {
        min_lead_minutes: env_value("COURTBOOK_MIN_LEAD_MINUTES")?,
        min_duration_minutes: env_value("COURTBOOK_MIN_DURATION_MINUTES")?,
        max_duration_minutes: env_value("COURTBOOK_MAX_DURATION_MINUTES")?,
        payment_timeout_minutes: env_value("COURTBOOK_PAYMENT_TIMEOUT_MINUTES")?,
        full_refund_hours: env_value("COURTBOOK_FULL_REFUND_HOURS")?,
        partial_refund_hours: env_value("COURTBOOK_PARTIAL_REFUND_HOURS")?,
        partial_refund_percent: env_value("COURTBOOK_PARTIAL_REFUND_PERCENT")?,
    };
    BookingPolicy::default().with_overrides(&overrides)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = env_parse("COURTBOOK_METRICS_PORT");
    courtbook::observability::init(metrics_port)?;

    let port = std::env::var("COURTBOOK_PORT").unwrap_or_else(|_| "5433".into());
    let bind = std::env::var("COURTBOOK_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("COURTBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password_file = std::env::var("COURTBOOK_PASSWORD_FILE").ok().map(PathBuf::from);
    let password = courtbook::auth::resolve_password(
        std::env::var("COURTBOOK_PASSWORD").ok(),
        password_file.as_deref(),
    )?;
    let max_connections: usize = env_parse("COURTBOOK_MAX_CONNECTIONS").unwrap_or(256);
    let compact_threshold: u64 = env_parse("COURTBOOK_COMPACT_THRESHOLD").unwrap_or(1000);
    let policy = policy_from_env()?;

    let tls_cert = std::env::var("COURTBOOK_TLS_CERT").ok();
    let tls_key = std::env::var("COURTBOOK_TLS_KEY").ok();
    let tls_acceptor = courtbook::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let store = Arc::new(WalStore::open(
        PathBuf::from(&data_dir).join("courtbook.wal"),
        notify.clone(),
    )?);
    let engine = Arc::new(Engine::with_store(store.clone(), Arc::new(SystemClock), policy));

    tokio::spawn(reaper::run_reaper(engine.clone()));
    tokio::spawn(reaper::run_compactor(store.clone(), compact_threshold));
    tokio::spawn(log_outbound(notify.subscribe_all()));

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("courtbook listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  venues: {}", store.venue_count());
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(courtbook::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(courtbook::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(courtbook::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let store = store.clone();
                let pw = password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, store, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(courtbook::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("courtbook stopped");
    Ok(())
}
