//! Inbound order model and the stream-message parse boundary
//!
//! Orders arrive as flat field maps on the order stream, in one of two
//! shapes: a single `orderData` field holding the serialized order as
//! JSON, or the order fields spread directly across the message. The
//! shape is resolved explicitly here into a typed [`Order`] or a
//! [`ParseError`]; partially-typed data never flows into scoring.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ParseError;
use crate::ids::{OrderId, Symbol, UserId};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Parse a wire value, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        match value.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(ParseError::InvalidSide {
                value: value.to_string(),
            }),
        }
    }
}

/// Order execution type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    /// Parse a wire value, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        match value.to_ascii_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            "STOP" => Ok(OrderType::Stop),
            "STOP_LIMIT" => Ok(OrderType::StopLimit),
            _ => Err(ParseError::InvalidOrderType {
                value: value.to_string(),
            }),
        }
    }
}

/// A trade order, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub order_type: OrderType,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// The two message shapes accepted from the stream, resolved before
/// any field-level parsing happens.
enum MessagePayload<'a> {
    /// The whole order serialized as JSON in an `orderData` field.
    Wrapped(&'a str),
    /// Order fields spread directly across the message map.
    Direct(&'a HashMap<String, String>),
}

impl<'a> MessagePayload<'a> {
    fn classify(fields: &'a HashMap<String, String>) -> Self {
        match fields.get("orderData") {
            Some(raw) => MessagePayload::Wrapped(raw),
            None => MessagePayload::Direct(fields),
        }
    }
}

impl Order {
    /// Parse an order from a stream message field map.
    ///
    /// Accepts either the wrapped `orderData` shape or direct fields.
    /// Any missing field, unparseable number, or bad timestamp fails
    /// the whole parse; no partial order is produced.
    pub fn from_stream_fields(fields: &HashMap<String, String>) -> Result<Self, ParseError> {
        match MessagePayload::classify(fields) {
            MessagePayload::Wrapped(raw) => serde_json::from_str(raw)
                .map_err(|e| ParseError::InvalidPayload(e.to_string())),
            MessagePayload::Direct(map) => Self::from_direct_fields(map),
        }
    }

    fn from_direct_fields(fields: &HashMap<String, String>) -> Result<Self, ParseError> {
        let get = |field: &'static str| -> Result<&String, ParseError> {
            fields.get(field).ok_or(ParseError::MissingField { field })
        };

        let quantity = parse_decimal("quantity", get("quantity")?)?;
        let price = parse_decimal("price", get("price")?)?;

        Ok(Self {
            order_id: OrderId::new(get("orderId")?.clone()),
            user_id: UserId::new(get("userId")?.clone()),
            symbol: Symbol::new(get("symbol")?.clone()),
            side: Side::parse(get("side")?)?,
            quantity,
            price,
            order_type: OrderType::parse(get("orderType")?)?,
            timestamp: parse_timestamp(get("timestamp")?)?,
        })
    }

    /// Monetary size of the order (quantity × price).
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, ParseError> {
    value
        .trim()
        .parse::<Decimal>()
        .map_err(|_| ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Parse an ISO-8601 timestamp, with or without a UTC offset.
///
/// Upstream producers emit both `2024-05-01T10:00:00Z` and the
/// offset-less `2024-05-01T10:00:00.123`; the latter is taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ParseError::InvalidTimestamp {
            value: value.to_string(),
        })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}
