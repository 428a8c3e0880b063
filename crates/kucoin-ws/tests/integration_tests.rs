//! Live tests against KuCoin's public websocket
//!
//! These tests make real network connections.
//! Run with: cargo test -p kucoin-ws --test integration_tests -- --ignored

use kucoin_types::Market;
use kucoin_ws::{ConnectionEvent, ConnectionState, KucoinContext, SymbolFilter, TickerFeed};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
#[ignore = "Makes real WebSocket connection"]
async fn test_public_connection_handshake() {
    let ctx = KucoinContext::production(None).expect("context");
    let feed = TickerFeed::new(&ctx);
    let mut events = feed.connection().subscribe_events();

    assert!(feed.connect().await.expect("connect"));
    assert_eq!(feed.connection().state(), ConnectionState::Connected);
    assert_eq!(feed.connection().market(), Market::Spot);

    let mut connected = false;
    while let Ok(event) = events.try_recv() {
        connected |= matches!(event, ConnectionEvent::Connected { .. });
    }
    assert!(connected);
    feed.dispose();
}

#[tokio::test]
#[ignore = "Makes real WebSocket connection"]
async fn test_ticker_stream() {
    let ctx = KucoinContext::production(None).expect("context");
    let feed = TickerFeed::new(&ctx);
    assert!(feed.connect().await.expect("connect"));

    let mut btc = feed.observe(SymbolFilter::only(["BTC-USDT"]));
    let ticker = timeout(Duration::from_secs(30), btc.recv())
        .await
        .expect("no ticker within 30s")
        .expect("feed closed");
    assert_eq!(ticker.symbol, "BTC-USDT");
    assert!(ticker.best_bid.is_some());

    drop(btc);
    feed.dispose();
}

#[tokio::test]
#[ignore = "Makes real WebSocket connection"]
async fn test_latency_measured_after_ping() {
    let ctx = KucoinContext::production(None).expect("context");
    let feed = TickerFeed::new(&ctx);
    assert!(feed.connect().await.expect("connect"));
    feed.connection()
        .set_ping_interval(Duration::from_secs(2))
        .expect("ping interval");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(feed.connection().latency().is_some());
    feed.dispose();
}
