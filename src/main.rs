use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use slotbook::auth::AdminAuth;
use slotbook::booking::{BookingService, DEFAULT_RESOURCE};
use slotbook::calendar::{Calendar, HttpCalendar, NoCalendar};
use slotbook::catalog::Catalog;
use slotbook::config::{Config, LogFormat};
use slotbook::http::{self, AppState};
use slotbook::notify::{LogNotifier, Notifier, WebhookNotifier};
use slotbook::store::{BookingStore, LogStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    slotbook::observability::init_logging(config.log_format == LogFormat::Json);
    slotbook::observability::init(config.metrics_port)?;

    let catalog = match &config.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin(),
    };

    let store: Arc<dyn BookingStore> = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Arc::new(LogStore::open(&dir.join("bookings.wal"))?)
        }
        None => Arc::new(LogStore::in_memory()),
    };

    let (calendar, resource): (Arc<dyn Calendar>, String) = match &config.calendar {
        Some(c) => (
            Arc::new(HttpCalendar::new(&c.base_url, c.id.clone(), c.token.clone(), c.timeout)?),
            c.id.clone(),
        ),
        None => (Arc::new(NoCalendar), DEFAULT_RESOURCE.to_string()),
    };

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url, config.http_timeout())?),
        None => Arc::new(LogNotifier),
    };

    let booking = BookingService::new(Arc::new(catalog), config.timezone, calendar, store, notifier)
        .with_resource(resource.clone())
        .with_business_name(config.business_name.clone());
    let admin = AdminAuth::new(config.admin_token.clone());
    let app = http::router(AppState::new(Arc::new(booking), admin.clone()));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("slotbook listening on {addr}");
    info!("  timezone: {}", config.timezone);
    info!("  store: {}", config.data_dir.as_ref().map_or("in-memory".to_string(), |d| d.display().to_string()));
    info!("  calendar: {}", if config.calendar.is_some() { resource.as_str() } else { "none" });
    info!("  notifications: {}", if config.notify_webhook.is_some() { "webhook" } else { "log" });
    info!("  admin: {}", if admin.is_enabled() { "enabled" } else { "disabled" });
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("slotbook stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c; axum then drains in-flight requests.
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
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
