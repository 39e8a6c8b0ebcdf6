use marginal_watch::alert::{AlertDispatcher, AlertTransport, TelegramTransport};
use marginal_watch::config::Config;
use marginal_watch::metrics::MonitorMetrics;
use marginal_watch::onchain::BlockMonitor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const CONFIG_PATH: &str = "marginal-watch.toml";

/// How long to wait for queued alerts to drain on shutdown.
const ALERT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(Path::new(CONFIG_PATH))?
    } else {
        Config::from_env()?
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("marginal-watch v{} starting", env!("CARGO_PKG_VERSION"));

    let pool_address = config.pool_address()?;
    info!(
        pool = %pool_address,
        ws_url = %config.rpc.ws_url,
        fallbacks = config.rpc.fallback_ws_urls.len(),
        "monitoring Marginal v1 pool"
    );

    // --- Alerts ---
    let transport: Option<Arc<dyn AlertTransport>> = if config.has_telegram() {
        let telegram = TelegramTransport::from_config(
            &config.alerts.telegram_api_url,
            &config.alerts.telegram_bot_token,
            &config.alerts.telegram_chat_id,
            Duration::from_secs(config.alerts.request_timeout_secs),
        )?;
        Some(Arc::new(telegram) as Arc<dyn AlertTransport>)
    } else {
        warn!(
            "no Telegram credentials configured - alerts will only be logged \
             (set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID to enable)"
        );
        None
    };

    let (dispatcher, alert_task) = AlertDispatcher::spawn(transport, config.alerts.threshold);
    info!(
        enabled = dispatcher.is_enabled(),
        threshold = %dispatcher.threshold(),
        "alert dispatcher ready"
    );

    // --- Block monitor ---
    let metrics = Arc::new(Mutex::new(MonitorMetrics::new()));
    let monitor = BlockMonitor::new(
        config.rpc.clone(),
        pool_address,
        dispatcher,
        config.logging.verbose,
        metrics.clone(),
    );
    let mut monitor_task = monitor.start();

    let metrics_interval = config.logging.metrics_interval_secs;
    let mut ticker = tokio::time::interval(Duration::from_secs(metrics_interval.max(1)));
    ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stop = Stop::Signal;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutdown signal received");
                break;
            }
            result = &mut monitor_task => {
                match result {
                    Ok(()) => error!("block monitor exited"),
                    Err(e) => error!(error = %e, "block monitor task failed"),
                }
                stop = Stop::MonitorExited;
                break;
            }
            _ = ticker.tick(), if metrics_interval > 0 => {
                metrics.lock().await.log_summary();
            }
        }
    }

    // Dropping the monitor drops its dispatcher, which lets the alert task
    // finish once the queue is empty.
    if stop == Stop::Signal {
        monitor_task.abort();
        let _ = monitor_task.await;
    }

    if let Some(handle) = alert_task {
        if tokio::time::timeout(ALERT_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("timed out delivering queued alerts");
        }
    }

    metrics.lock().await.log_summary();

    exit_status(stop)
}

/// Why the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Signal,
    MonitorExited,
}

/// Only a shutdown signal is a clean exit.
fn exit_status(stop: Stop) -> anyhow::Result<()> {
    match stop {
        Stop::Signal => {
            info!("marginal-watch stopped");
            Ok(())
        }
        Stop::MonitorExited => anyhow::bail!("block monitor stopped unexpectedly"),
    }
}
