//! Frame decoding, with a fast path for Level 3 diffs
//!
//! Level 3 is by far the busiest feed. Rather than build a `serde_json`
//! value and convert it, [`FieldScanner`] walks the frame once, hashes each
//! key with a compile-time FNV-1a and keeps the raw text of the scalars it
//! knows about (top level and inside `data`). Anything it does not
//! understand, such as escaped strings or a missing field, makes it decline,
//! and the frame goes down the generic serde path instead.

use kucoin_types::topic::LEVEL3;
use kucoin_types::{
    parse_decimal, Envelope, KucoinResult, Level3Subject, Level3Update, MessageType, Side,
};
use tracing::trace;

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Anything decoded through serde
    Envelope(Envelope),
    /// A Level 3 diff decoded by the scanner
    Level3 {
        tunnel_id: Option<String>,
        topic: String,
        update: Level3Update,
    },
}

impl Inbound {
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Envelope(env) => env.kind,
            Self::Level3 { .. } => MessageType::Message,
        }
    }

    pub fn tunnel_id(&self) -> Option<&str> {
        match self {
            Self::Envelope(env) => env.tunnel_id.as_deref(),
            Self::Level3 { tunnel_id, .. } => tunnel_id.as_deref(),
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Envelope(env) => env.topic.as_deref(),
            Self::Level3 { topic, .. } => Some(topic),
        }
    }

    /// Topic without the symbol list
    pub fn topic_base(&self) -> Option<&str> {
        self.topic()
            .map(|t| t.split_once(':').map_or(t, |(base, _)| base))
    }
}

/// Decode one frame; `fast_path` enables the scanner for sequenced diffs
pub fn decode(frame: &str, fast_path: bool) -> KucoinResult<Inbound> {
    if fast_path && is_sequenced_diff(frame) {
        if let Some(inbound) = scan_level3(frame) {
            return Ok(inbound);
        }
        trace!("Scanner declined frame, using generic decoder");
    }
    Envelope::parse(frame).map(Inbound::Envelope)
}

/// Cheap pre-check: a data message carrying a sequence number
pub fn is_sequenced_diff(frame: &str) -> bool {
    frame.contains("\"sequence\"") && frame.contains("\"type\":\"message\"")
}

/// Scan a Level 3 diff without building a DOM
pub fn scan_level3(frame: &str) -> Option<Inbound> {
    let fields = FieldScanner::new(frame).scan()?;
    if fields.kind? != "message" {
        return None;
    }
    let topic = fields.topic?;
    let (base, suffix) = topic.split_once(':')?;
    if base != LEVEL3 {
        return None;
    }

    let subject = Level3Subject::from_wire(fields.subject?)?;
    let symbol = fields.symbol.unwrap_or(suffix);
    let mut update = Level3Update::new(subject, symbol, fields.sequence?.parse().ok()?);
    update.side = match fields.side {
        Some(side) => Some(Side::from_wire(side)?),
        None => None,
    };
    update.order_id = fields.order_id.map(str::to_string);
    update.price = decimal(fields.price)?;
    update.size = decimal(fields.size)?;
    update.new_size = decimal(fields.new_size)?;
    update.maker_order_id = fields.maker_order_id.map(str::to_string);
    update.taker_order_id = fields.taker_order_id.map(str::to_string);
    update.trade_id = fields.trade_id.map(str::to_string);
    update.time = match fields.time.or(fields.ts) {
        Some(t) => t.parse().ok()?,
        None => 0,
    };

    Some(Inbound::Level3 {
        tunnel_id: fields.tunnel_id.map(str::to_string),
        topic: topic.to_string(),
        update,
    })
}

// Outer None: unparsable. Inner None: field absent.
fn decimal(raw: Option<&str>) -> Option<Option<rust_decimal::Decimal>> {
    match raw {
        Some(text) => parse_decimal(text).ok().map(Some),
        None => Some(None),
    }
}

// ============================================================================
// Field Scanner
// ============================================================================

/// FNV-1a, usable in const context
pub const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

mod key {
    use super::fnv1a;

    pub const TYPE: u64 = fnv1a(b"type");
    pub const TOPIC: u64 = fnv1a(b"topic");
    pub const SUBJECT: u64 = fnv1a(b"subject");
    pub const TUNNEL_ID: u64 = fnv1a(b"tunnelId");
    pub const DATA: u64 = fnv1a(b"data");

    pub const SEQUENCE: u64 = fnv1a(b"sequence");
    pub const SYMBOL: u64 = fnv1a(b"symbol");
    pub const SIDE: u64 = fnv1a(b"side");
    pub const ORDER_ID: u64 = fnv1a(b"orderId");
    pub const PRICE: u64 = fnv1a(b"price");
    pub const SIZE: u64 = fnv1a(b"size");
    pub const NEW_SIZE: u64 = fnv1a(b"newSize");
    pub const MAKER_ORDER_ID: u64 = fnv1a(b"makerOrderId");
    pub const TAKER_ORDER_ID: u64 = fnv1a(b"takerOrderId");
    pub const TRADE_ID: u64 = fnv1a(b"tradeId");
    pub const TIME: u64 = fnv1a(b"time");
    pub const TS: u64 = fnv1a(b"ts");
}

/// Raw scalar text captured by the scanner
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScannedFields<'a> {
    pub kind: Option<&'a str>,
    pub topic: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub tunnel_id: Option<&'a str>,
    pub sequence: Option<&'a str>,
    pub symbol: Option<&'a str>,
    pub side: Option<&'a str>,
    pub order_id: Option<&'a str>,
    pub price: Option<&'a str>,
    pub size: Option<&'a str>,
    pub new_size: Option<&'a str>,
    pub maker_order_id: Option<&'a str>,
    pub taker_order_id: Option<&'a str>,
    pub trade_id: Option<&'a str>,
    pub time: Option<&'a str>,
    pub ts: Option<&'a str>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    Top,
    Data,
}

impl<'a> ScannedFields<'a> {
    fn assign(&mut self, scope: Scope, hash: u64, value: &'a str) {
        let slot = match (scope, hash) {
            (Scope::Top, key::TYPE) => &mut self.kind,
            (Scope::Top, key::TOPIC) => &mut self.topic,
            (Scope::Top, key::SUBJECT) => &mut self.subject,
            (Scope::Top, key::TUNNEL_ID) => &mut self.tunnel_id,
            (Scope::Data, key::SEQUENCE) => &mut self.sequence,
            (Scope::Data, key::SYMBOL) => &mut self.symbol,
            (Scope::Data, key::SIDE) => &mut self.side,
            (Scope::Data, key::ORDER_ID) => &mut self.order_id,
            (Scope::Data, key::PRICE) => &mut self.price,
            (Scope::Data, key::SIZE) => &mut self.size,
            (Scope::Data, key::NEW_SIZE) => &mut self.new_size,
            (Scope::Data, key::MAKER_ORDER_ID) => &mut self.maker_order_id,
            (Scope::Data, key::TAKER_ORDER_ID) => &mut self.taker_order_id,
            (Scope::Data, key::TRADE_ID) => &mut self.trade_id,
            (Scope::Data, key::TIME) => &mut self.time,
            (Scope::Data, key::TS) => &mut self.ts,
            _ => return,
        };
        *slot = Some(value);
    }
}

/// Single-pass scanner over one frame
pub struct FieldScanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldScanner<'a> {
    pub fn new(frame: &'a str) -> Self {
        Self {
            text: frame,
            bytes: frame.as_bytes(),
            pos: 0,
        }
    }

    /// Scan the whole frame; `None` if it is not a plain JSON object
    pub fn scan(mut self) -> Option<ScannedFields<'a>> {
        let mut fields = ScannedFields::default();
        self.skip_ws();
        self.expect(b'{')?;
        self.object(Scope::Top, &mut fields)?;
        Some(fields)
    }

    fn object(&mut self, scope: Scope, fields: &mut ScannedFields<'a>) -> Option<()> {
        self.skip_ws();
        if self.peek()? == b'}' {
            self.pos += 1;
            return Some(());
        }

        loop {
            self.skip_ws();
            self.expect(b'"')?;
            let name = self.string_body()?;
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();

            let hash = fnv1a(name.as_bytes());
            if scope == Scope::Top && hash == key::DATA && self.peek()? == b'{' {
                self.pos += 1;
                self.object(Scope::Data, fields)?;
            } else if let Some(value) = self.value()? {
                fields.assign(scope, hash, value);
            }

            self.skip_ws();
            match self.next()? {
                b',' => continue,
                b'}' => return Some(()),
                _ => return None,
            }
        }
    }

    // Some(Some(text)) for scalars, Some(None) for null and composites
    fn value(&mut self) -> Option<Option<&'a str>> {
        match self.peek()? {
            b'"' => {
                self.pos += 1;
                self.string_body().map(Some)
            }
            b'{' | b'[' => {
                self.skip_composite()?;
                Some(None)
            }
            _ => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if matches!(b, b',' | b'}' | b']') || b.is_ascii_whitespace() {
                        break;
                    }
                    self.pos += 1;
                }
                let literal = self.text.get(start..self.pos)?;
                match literal {
                    "" => None,
                    "null" => Some(None),
                    other => Some(Some(other)),
                }
            }
        }
    }

    // Called just past the opening quote; escapes make the scanner decline
    fn string_body(&mut self) -> Option<&'a str> {
        let start = self.pos;
        loop {
            match self.next()? {
                b'"' => return self.text.get(start..self.pos - 1),
                b'\\' => return None,
                _ => {}
            }
        }
    }

    fn skip_composite(&mut self) -> Option<()> {
        let mut depth = 0usize;
        let mut in_quote = false;
        let mut in_escape = false;
        loop {
            let b = self.next()?;
            if in_escape {
                in_escape = false;
            } else if in_quote {
                match b {
                    b'\\' => in_escape = true,
                    b'"' => in_quote = false,
                    _ => {}
                }
            } else {
                match b {
                    b'"' => in_quote = true,
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth = depth.checked_sub(1)?;
                        if depth == 0 {
                            return Some(());
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().map_or(false, |b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn expect(&mut self, want: u8) -> Option<()> {
        (self.next()? == want).then_some(())
    }
}
