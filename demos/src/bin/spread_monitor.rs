//! Demo 1: Spread Monitor
//!
//! Showcases: Level 2 calibration, throttled book pushes, symbol filters
//!
//! Full-depth Level 2 snapshots are authenticated, so set KUCOIN_API_KEY,
//! KUCOIN_API_SECRET and KUCOIN_API_PASSPHRASE.
//!
//! Run: cargo run --bin spread_monitor

use colored::*;
use kucoin_rest::Credentials;
use kucoin_types::Market;
use kucoin_ws::{KucoinContext, Level2Feed, ObservationEvent, SymbolFilter};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SYMBOLS: [&str; 3] = ["BTC-USDT", "ETH-USDT", "SOL-USDT"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  SPREAD MONITOR".cyan().bold());
    println!("{}", "═".repeat(65).cyan());
    println!();

    let ctx = KucoinContext::production(Credentials::from_env().ok())?;
    let feed = Level2Feed::level2(&ctx, Market::Spot);
    if !feed.connect().await? {
        return Err("could not connect".into());
    }

    let observations = feed.subscribe(&SYMBOLS)?;
    for observation in observations.values() {
        let mut events = observation.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ObservationEvent::Calibrated {
                        symbol,
                        sequence,
                        applied,
                        discarded,
                    } => println!(
                        "  {} {} at {} ({} replayed, {} already in snapshot)",
                        "●".green(),
                        symbol.cyan(),
                        sequence,
                        applied,
                        discarded
                    ),
                    ObservationEvent::SnapshotFailed { symbol, error } => {
                        println!("  {} {} {}", "●".red(), symbol.cyan(), error)
                    }
                    _ => {}
                }
            }
        });
    }

    let mut books = feed.observe(SymbolFilter::all());
    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            book = books.recv() => {
                let Some(book) = book else { break };
                let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) else {
                    continue;
                };
                let spread = ask - bid;
                let bps = if bid.is_zero() {
                    Decimal::ZERO
                } else {
                    (spread / bid * Decimal::from(10_000)).round_dp(2)
                };
                println!(
                    "  {} {:<10} bid {:>12} ask {:>12} spread {:>10} ({} bps)",
                    format!("[{}]", chrono::Local::now().format("%H:%M:%S%.3f")).dimmed(),
                    book.symbol.cyan(),
                    bid.to_string().green(),
                    ask.to_string().red(),
                    spread,
                    bps
                );
            }
        }
    }

    feed.dispose();
    Ok(())
}
