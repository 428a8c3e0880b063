//! Demo 2: Caller-Side Reconnect
//!
//! Showcases: disconnect events, reconnect with backoff, resubscription
//!
//! The client never reconnects on its own. This loop waits for a
//! `Disconnected` event, connects again and re-subscribes every symbol,
//! which resets each observation and recalibrates from a fresh snapshot.
//!
//! Run: cargo run --bin reconnect_demo

use colored::*;
use kucoin_types::Market;
use kucoin_ws::{
    ConnectionConfig, ConnectionEvent, DisconnectReason, KucoinContext, Level2Feed,
    ObservationConfig,
};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MAX_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  RECONNECT DEMO".cyan().bold());
    println!("{}", "═".repeat(65).cyan());
    println!();

    let ctx = KucoinContext::production(None)?;
    let feed = Level2Feed::level2_with(
        &ctx,
        ConnectionConfig::spot().with_ping_interval(Duration::from_secs(5)),
        ObservationConfig::default().with_pieces(10),
    );
    let mut events = feed.connection().subscribe_events();

    connect_with_backoff(&feed).await;
    feed.subscribe(&["BTC-USDT"])?;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed connection events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        match event {
            ConnectionEvent::Connected { connect_id, .. } => {
                println!(
                    "  {} {} connected ({})",
                    format!("[{}]", timestamp).dimmed(),
                    "●".green(),
                    connect_id
                );
            }
            ConnectionEvent::Disconnected { reason } => {
                println!(
                    "  {} {} disconnected: {:?}",
                    format!("[{}]", timestamp).dimmed(),
                    "●".red(),
                    reason
                );
                if reason == DisconnectReason::Shutdown {
                    break;
                }
                connect_with_backoff(&feed).await;
                match feed.resubscribe() {
                    Ok(count) => info!(count, "Resubscribed"),
                    Err(e) => warn!(error = %e, "Resubscribe failed"),
                }
            }
            ConnectionEvent::ServerError { code, message } => {
                println!("  {} server error {}: {}", "●".yellow(), code, message);
            }
            _ => {}
        }
    }

    Ok(())
}

async fn connect_with_backoff(feed: &Level2Feed) {
    let mut delay = Duration::from_millis(250);
    loop {
        match feed.connect().await {
            Ok(true) => return,
            Ok(false) => warn!(?delay, "Connect failed, retrying"),
            Err(e) => warn!(error = %e, ?delay, "Connect rejected, retrying"),
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}
