// =============================================================================
// Market Events — envelope decoding and typed event construction
// =============================================================================
//
// Inbound bus messages are JSON envelopes in the combined-stream format:
//
// ```json
// { "stream": "btcusdt@depth20@100ms", "data": { ... } }
// ```
//
// The `stream` tag identifies symbol and kind. Numeric fields arrive as
// strings ("37000.00") or plain numbers depending on the upstream adapter;
// both are accepted.
//
// Decoding is strict where it matters: a payload with a missing or
// mis-typed required field is a parse error, a depth snapshot with an
// empty side is a validation error. Neither ever propagates past the
// consumer — they are counted and dropped there.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::StreamKind;

// =============================================================================
// Typed events
// =============================================================================

/// One order-book level: (price, quantity).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Top-N order-book snapshot for one symbol.
///
/// Bids are descending by price, asks ascending, as delivered upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub event_time: DateTime<Utc>,
}

impl DepthSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Midpoint of best bid and best ask, if both sides are present.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / 2.0),
            _ => None,
        }
    }
}

/// A single executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub trade_id: u64,
    pub price: f64,
    pub quantity: f64,
    pub buyer_order_id: u64,
    pub seller_order_id: u64,
    /// Exchange trade timestamp in milliseconds.
    pub trade_time_ms: i64,
    /// True when the buyer was the maker (taker sold into the bid).
    pub is_buyer_maker: bool,
    pub event_time: DateTime<Utc>,
}

/// 24-hour rolling ticker update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub symbol: String,
    pub last_price: f64,
    pub volume_24h: Option<f64>,
    pub price_change_pct: Option<f64>,
    pub event_time: DateTime<Utc>,
}

/// Tagged union over the three event kinds the engine consumes.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Depth(DepthSnapshot),
    Trade(Trade),
    Ticker(TickerUpdate),
}

impl MarketEvent {
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Depth(_) => StreamKind::Depth,
            Self::Trade(_) => StreamKind::Trade,
            Self::Ticker(_) => StreamKind::Ticker,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Depth(d) => &d.symbol,
            Self::Trade(t) => &t.symbol,
            Self::Ticker(t) => &t.symbol,
        }
    }
}

// =============================================================================
// Envelope decoding
// =============================================================================

/// Raw envelope: stream tag plus the untyped payload.
#[derive(Debug)]
pub struct RawEnvelope {
    pub stream: String,
    pub data: Value,
}

/// Decode the transport envelope and extract the `stream` tag.
pub fn decode_envelope(payload: &[u8]) -> Result<RawEnvelope> {
    let root: Value = serde_json::from_slice(payload).context("envelope is not valid JSON")?;

    let stream = root["stream"]
        .as_str()
        .context("envelope missing field stream")?
        .to_string();

    if stream.is_empty() {
        bail!("envelope carries an empty stream tag");
    }

    // Single-stream payloads put the body at the root; combined streams nest
    // it under "data".
    let data = match root.get("data") {
        Some(d) => d.clone(),
        None => root,
    };

    Ok(RawEnvelope { stream, data })
}

/// Classify a stream tag by substring. Returns `None` for unknown kinds.
pub fn classify_stream(stream: &str) -> Option<StreamKind> {
    if stream.contains("@depth") {
        Some(StreamKind::Depth)
    } else if stream.contains("@trade") || stream.contains("@aggTrade") {
        Some(StreamKind::Trade)
    } else if stream.contains("@ticker") {
        Some(StreamKind::Ticker)
    } else {
        None
    }
}

/// Extract the uppercase symbol from a stream tag (`btcusdt@depth20@100ms`
/// -> `BTCUSDT`).
pub fn symbol_from_stream(stream: &str) -> String {
    stream
        .split('@')
        .next()
        .unwrap_or(stream)
        .to_uppercase()
}

/// Convert a classified envelope into a typed event.
pub fn parse_event(kind: StreamKind, envelope: &RawEnvelope) -> Result<MarketEvent> {
    let symbol = symbol_from_stream(&envelope.stream);
    match kind {
        StreamKind::Depth => parse_depth(&symbol, &envelope.data).map(MarketEvent::Depth),
        StreamKind::Trade => parse_trade(&symbol, &envelope.data).map(MarketEvent::Trade),
        StreamKind::Ticker => parse_ticker(&symbol, &envelope.data).map(MarketEvent::Ticker),
    }
}

// =============================================================================
// Per-kind parsers
// =============================================================================

/// Read a numeric field that may arrive as a JSON string or number.
fn num(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Parse one side of the book: an array of `[price, qty]` pairs.
fn parse_levels(side: &Value, field: &str) -> Result<Vec<PriceLevel>> {
    let entries = side
        .as_array()
        .with_context(|| format!("missing field {field}"))?;

    let mut levels = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let price = entry
            .get(0)
            .and_then(num)
            .with_context(|| format!("{field}[{i}] has no parsable price"))?;
        let quantity = entry
            .get(1)
            .and_then(num)
            .with_context(|| format!("{field}[{i}] has no parsable quantity"))?;
        if price < 0.0 || quantity < 0.0 {
            bail!("{field}[{i}] carries a negative value");
        }
        levels.push(PriceLevel { price, quantity });
    }
    Ok(levels)
}

fn event_time(data: &Value) -> DateTime<Utc> {
    data["E"]
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Parse a partial-depth snapshot.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
pub fn parse_depth(symbol: &str, data: &Value) -> Result<DepthSnapshot> {
    let last_update_id = data["lastUpdateId"]
        .as_u64()
        .or_else(|| data["u"].as_u64())
        .context("missing field lastUpdateId")?;

    let bids = parse_levels(&data["bids"], "bids")?;
    let asks = parse_levels(&data["asks"], "asks")?;

    if bids.is_empty() || asks.is_empty() {
        bail!(
            "depth snapshot for {symbol} has an empty side (bids={}, asks={})",
            bids.len(),
            asks.len()
        );
    }

    Ok(DepthSnapshot {
        symbol: symbol.to_string(),
        last_update_id,
        bids,
        asks,
        event_time: event_time(data),
    })
}

/// Parse a trade event.
///
/// Expected shape:
/// ```json
/// { "e": "trade", "E": 1672515782136, "s": "BTCUSDT", "t": 12345,
///   "p": "37000.00", "q": "0.123", "b": 88, "a": 50,
///   "T": 1672515782136, "m": true }
/// ```
pub fn parse_trade(symbol: &str, data: &Value) -> Result<Trade> {
    let trade_id = data["t"].as_u64().context("missing field t")?;

    let price = num(&data["p"]).context("missing field p")?;
    let quantity = num(&data["q"]).context("missing field q")?;

    let buyer_order_id = data["b"].as_u64().unwrap_or(0);
    let seller_order_id = data["a"].as_u64().unwrap_or(0);
    let trade_time_ms = data["T"].as_i64().context("missing field T")?;
    let is_buyer_maker = data["m"].as_bool().context("missing field m")?;

    Ok(Trade {
        symbol: symbol.to_string(),
        trade_id,
        price,
        quantity,
        buyer_order_id,
        seller_order_id,
        trade_time_ms,
        is_buyer_maker,
        event_time: event_time(data),
    })
}

/// Parse a 24h ticker update.
///
/// Expected shape:
/// ```json
/// { "e": "24hrTicker", "E": 1672515782136, "s": "BTCUSDT",
///   "c": "37002.10", "P": "1.25", "v": "12345.6" }
/// ```
pub fn parse_ticker(symbol: &str, data: &Value) -> Result<TickerUpdate> {
    let last_price = num(&data["c"]).context("missing field c")?;

    Ok(TickerUpdate {
        symbol: symbol.to_string(),
        last_price,
        volume_24h: num(&data["v"]),
        price_change_pct: num(&data["P"]),
        event_time: event_time(data),
    })
}
