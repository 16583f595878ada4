//! Chalkline - operations reporting for school campuses.
//!
//! # Overview
//!
//! Staff log operational incidents from a web dashboard or from WhatsApp;
//! every change is pushed to connected dashboards over SSE. Free-text
//! reports are structured by an AI provider chain with a rule-based
//! fallback, so the service runs usefully with zero external configuration.
//!
//! # Configuration
//!
//! - `CHALKLINE_PORT` - listen port (default 3000)
//! - `CHALKLINE_DATABASE_URL` - SQLite URL (default `sqlite:chalkline.db?mode=rwc`)
//! - `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` / `TWILIO_WHATSAPP_FROM` -
//!   outbound WhatsApp notifications; all three required, otherwise
//!   notifications are disabled and everything else still works.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chalkline::api::{AppState, router};
use chalkline::broadcast::Broadcaster;
use chalkline::notify::WhatsAppNotifier;
use chalkline::storage::Storage;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:chalkline.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("chalkline=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("CHALKLINE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("CHALKLINE_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    info!(port, db_url = %db_url, "Starting Chalkline server");

    // Initialize storage
    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    // Outbound WhatsApp is optional; missing credentials disable it.
    let notifier = match (
        env::var("TWILIO_ACCOUNT_SID"),
        env::var("TWILIO_AUTH_TOKEN"),
        env::var("TWILIO_WHATSAPP_FROM"),
    ) {
        (Ok(sid), Ok(token), Ok(from)) => {
            info!("WhatsApp notifications enabled");
            Some(Arc::new(WhatsAppNotifier::new(&sid, &token, &from)))
        }
        _ => {
            info!("WhatsApp notifications disabled (Twilio credentials not set)");
            None
        }
    };

    // SSE fan-out plus its heartbeat and stale-connection sweeps
    let broadcaster = Broadcaster::new();
    broadcaster.spawn_maintenance();

    let state = AppState {
        storage,
        broadcaster,
        notifier,
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Chalkline is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
