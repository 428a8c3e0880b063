//! Demo 3: Level 3 With a Tunnelled Ticker
//!
//! Showcases: Level 3 fast path, tunnel multiplexing, auto start/stop
//!
//! The Level 3 feed hosts the socket; the ticker feed rides it on a tunnel,
//! so both streams share one connection. Level 3 snapshots need
//! KUCOIN_API_KEY, KUCOIN_API_SECRET and KUCOIN_API_PASSPHRASE.
//!
//! Run: cargo run --bin level3_tunnel

use colored::*;
use kucoin_book::OrderBook;
use kucoin_rest::Credentials;
use kucoin_types::Market;
use kucoin_ws::{ConnectionConfig, FeedConnection, KucoinContext, Level3Feed, SymbolFilter, TickerFeed};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("{}", "═".repeat(65).cyan());
    println!("{}", "  LEVEL 3 + TUNNELLED TICKER".cyan().bold());
    println!("{}", "═".repeat(65).cyan());
    println!();

    let ctx = KucoinContext::production(Credentials::from_env().ok())?;
    let level3 = Level3Feed::level3(&ctx);
    level3.connection().init_as_multiplex_host(None)?;

    let child = FeedConnection::new(ConnectionConfig::spot(), ctx.rest(Market::Spot), ctx.connector());
    let tunnel = child.attach_as_child(level3.connection(), None)?;
    let tickers = TickerFeed::with_connection(child, 1024);
    println!("  Ticker tunnel: {}", tunnel.cyan());

    if !level3.connect().await? {
        return Err("could not connect".into());
    }
    let observation = level3.subscribe_one("BTC-USDT")?;

    let _ticker = tickers.on_ticker(SymbolFilter::only(["BTC-USDT"]), |ticker| {
        println!(
            "  {} last {:?} bid {:?} ask {:?}",
            "ticker".yellow(),
            ticker.price,
            ticker.best_bid,
            ticker.best_ask
        );
    });

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let summary = observation.with_book(|book| {
            (book.sequence(), book.order_count(), book.top_bids(1), book.top_asks(1))
        });
        match summary {
            Some((sequence, orders, bids, asks)) => println!(
                "  {} seq {} orders {} best bid level {:?} best ask level {:?}",
                "book".green(),
                sequence,
                orders,
                bids.first().map(|l| l.price),
                asks.first().map(|l| l.price)
            ),
            None => println!("  {} calibrating...", "book".dimmed()),
        }
    }

    level3.dispose();
    Ok(())
}
