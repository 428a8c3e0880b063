//! WebSocket transport abstraction
//!
//! A [`Connector`] opens a socket and hands back its two halves. The
//! connection owns a writer task on the [`TransportSink`] and a reader task
//! on the [`TransportStream`], so neither half ever waits on the other.
//! Tests swap [`WsConnector`] for [`MockConnector`] and script the server.
//!
//! # Example
//!
//! ```no_run
//! use kucoin_ws::transport::{Connector, WsConnector, TransportError};
//! use std::time::Duration;
//!
//! async fn example() -> Result<(), TransportError> {
//!     let pair = WsConnector::new()
//!         .connect("wss://ws-api-spot.kucoin.com/?token=t", Duration::from_secs(10))
//!         .await?;
//!     let (mut sink, mut stream) = (pair.sink, pair.stream);
//!     sink.send(r#"{"id":"1","type":"ping"}"#.to_string()).await?;
//!     if let Some(bytes) = stream.recv().await? {
//!         println!("Received {} bytes", bytes.len());
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use kucoin_types::KucoinError;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("connection timeout after {0:?}")]
    Timeout(Duration),
}

impl From<TransportError> for KucoinError {
    fn from(err: TransportError) -> Self {
        KucoinError::WebSocket(err.to_string())
    }
}

/// Outbound half of a socket
#[async_trait]
pub trait TransportSink: Send {
    /// Send one text frame
    async fn send(&mut self, message: String) -> Result<(), TransportError>;

    /// Close gracefully
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a socket
#[async_trait]
pub trait TransportStream: Send {
    /// Next chunk of payload bytes
    ///
    /// Returns `None` if the peer closed the connection gracefully. Chunks
    /// need not line up with JSON objects; the framer reassembles them.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Both halves of an open socket
pub struct TransportPair {
    pub sink: Box<dyn TransportSink>,
    pub stream: Box<dyn TransportStream>,
}

/// Opens sockets
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, timeout: Duration) -> Result<TransportPair, TransportError>;
}

// ============================================================================
// tokio-tungstenite
// ============================================================================

/// Real WebSocket connector using tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip(self, url))]
    async fn connect(
        &self,
        url: &str,
        connect_timeout: Duration,
    ) -> Result<TransportPair, TransportError> {
        debug!("Connecting to WebSocket");

        let (ws_stream, _response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(connect_timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected");
        let (sink, stream) = ws_stream.split();
        Ok(TransportPair {
            sink: Box::new(WsSink { inner: sink }),
            stream: Box::new(WsReader { inner: stream }),
        })
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(message))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

struct WsReader {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl TransportStream for WsReader {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Control frames are answered by tungstenite itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }
}

// ============================================================================
// Mock
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockConnector, MockServer};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use kucoin_types::{Envelope, MessageType};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    type Inbound = Result<Option<Vec<u8>>, TransportError>;

    /// Scripted server side of one mock socket
    #[derive(Clone)]
    pub struct MockServer {
        inbound: mpsc::UnboundedSender<Inbound>,
        sent: Arc<Mutex<Vec<String>>>,
        url: String,
    }

    impl MockServer {
        /// Deliver a frame to the client
        pub fn push(&self, frame: impl Into<String>) {
            let _ = self.inbound.send(Ok(Some(frame.into().into_bytes())));
        }

        /// Deliver raw bytes, which need not be a whole frame
        pub fn push_bytes(&self, bytes: impl Into<Vec<u8>>) {
            let _ = self.inbound.send(Ok(Some(bytes.into())));
        }

        /// Graceful close from the server
        pub fn close(&self) {
            let _ = self.inbound.send(Ok(None));
        }

        /// Abort the socket with an error
        pub fn fail(&self, error: TransportError) {
            let _ = self.inbound.send(Err(error));
        }

        /// Everything the client wrote, in order
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        /// Sent frames that parse as envelopes
        pub fn sent_envelopes(&self) -> Vec<Envelope> {
            self.sent()
                .iter()
                .filter_map(|s| Envelope::parse(s).ok())
                .collect()
        }

        /// Sent envelopes of one type
        pub fn sent_of(&self, kind: MessageType) -> Vec<Envelope> {
            self.sent_envelopes()
                .into_iter()
                .filter(|e| e.kind == kind)
                .collect()
        }

        pub fn url(&self) -> &str {
            &self.url
        }
    }

    #[derive(Default)]
    struct State {
        fail_connect: AtomicBool,
        no_welcome: AtomicBool,
        no_pong: AtomicBool,
        connects: AtomicUsize,
        servers: Mutex<Vec<MockServer>>,
    }

    /// Connector whose sockets are driven by the test
    ///
    /// By default every socket greets with `welcome` and answers each
    /// `ping` with a `pong` carrying the same id.
    #[derive(Clone, Default)]
    pub struct MockConnector {
        state: Arc<State>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail_connect(&self, fail: bool) {
            self.state.fail_connect.store(fail, Ordering::SeqCst);
        }

        pub fn set_welcome(&self, enabled: bool) {
            self.state.no_welcome.store(!enabled, Ordering::SeqCst);
        }

        pub fn set_auto_pong(&self, enabled: bool) {
            self.state.no_pong.store(!enabled, Ordering::SeqCst);
        }

        /// Connection attempts, including failed ones
        pub fn connect_count(&self) -> usize {
            self.state.connects.load(Ordering::SeqCst)
        }

        pub fn urls(&self) -> Vec<String> {
            self.state
                .servers
                .lock()
                .iter()
                .map(|s| s.url.clone())
                .collect()
        }

        /// Server side of the most recent successful connect
        pub fn last_server(&self) -> Option<MockServer> {
            self.state.servers.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            url: &str,
            _timeout: Duration,
        ) -> Result<TransportPair, TransportError> {
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionFailed(
                    "mock connection failure".into(),
                ));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let server = MockServer {
                inbound: tx,
                sent: Arc::new(Mutex::new(Vec::new())),
                url: url.to_string(),
            };
            if !self.state.no_welcome.load(Ordering::SeqCst) {
                server.push(r#"{"id":"mock-welcome","type":"welcome"}"#);
            }
            self.state.servers.lock().push(server.clone());

            Ok(TransportPair {
                sink: Box::new(MockSink {
                    server,
                    state: self.state.clone(),
                    closed: false,
                }),
                stream: Box::new(MockStream { rx }),
            })
        }
    }

    struct MockSink {
        server: MockServer,
        state: Arc<State>,
        closed: bool,
    }

    #[async_trait]
    impl TransportSink for MockSink {
        async fn send(&mut self, message: String) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::ConnectionClosed);
            }
            if !self.state.no_pong.load(Ordering::SeqCst) {
                if let Ok(env) = Envelope::parse(&message) {
                    if env.kind == MessageType::Ping {
                        let id = env.id.unwrap_or_default();
                        self.server.push(format!(r#"{{"id":"{id}","type":"pong"}}"#));
                    }
                }
            }
            self.server.sent.lock().push(message);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed = true;
            Ok(())
        }
    }

    struct MockStream {
        rx: mpsc::UnboundedReceiver<Inbound>,
    }

    #[async_trait]
    impl TransportStream for MockStream {
        async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            match self.rx.recv().await {
                Some(item) => item,
                None => Err(TransportError::ConnectionClosed),
            }
        }
    }
}
