//! Canonical events.
//!
//! The normalizer maps raw wire messages into this closed set of variants.
//! Everything downstream of the normalizer (arbiter, tracker, subscribers)
//! sees only these types; wire aliases and loose typing never propagate
//! past the message boundary.

use crate::types::{
    AccountMode, BalanceSource, ClosedTrade, OpenPosition,
};
use serde::{Deserialize, Serialize};

/// Net position change for an (account, symbol) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub account: String,
    pub symbol: String,
    /// Signed net quantity. Zero means the position went flat.
    pub quantity: f64,
    /// Average entry price reported by the broker.
    pub avg_price: Option<f64>,
    /// Current market price if the message carried one.
    pub market_price: Option<f64>,
    pub target: Option<f64>,
    pub stop: Option<f64>,
    pub timestamp: i64,
}

/// Broker-reported account balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub account: String,
    pub balance: f64,
    pub timestamp: i64,
}

/// Working-order state change, passed through for display consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub account: String,
    pub symbol: String,
    pub order_id: String,
    pub status: String,
    pub quantity: f64,
    pub price: Option<f64>,
    pub timestamp: i64,
}

/// Execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub account: String,
    pub symbol: String,
    /// Signed fill quantity.
    pub quantity: f64,
    pub price: f64,
    pub timestamp: i64,
}

/// Market data tick. High-frequency, transported on the droppable path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
}

/// The closed set of normalized inbound events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    PositionUpdate(PositionEvent),
    BalanceUpdate(BalanceEvent),
    OrderUpdate(OrderEvent),
    Fill(FillEvent),
    Tick(TickEvent),
}

impl CanonicalEvent {
    /// Whether the event must never be dropped under overload.
    pub fn is_critical(&self) -> bool {
        !matches!(self, CanonicalEvent::Tick(_))
    }

    /// The (account, symbol) ordering key, if the event has one.
    pub fn key(&self) -> Option<(&str, &str)> {
        match self {
            CanonicalEvent::PositionUpdate(e) => Some((&e.account, &e.symbol)),
            CanonicalEvent::OrderUpdate(e) => Some((&e.account, &e.symbol)),
            CanonicalEvent::Fill(e) => Some((&e.account, &e.symbol)),
            CanonicalEvent::BalanceUpdate(_) | CanonicalEvent::Tick(_) => None,
        }
    }
}

/// One accepted balance-of-record mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub account: String,
    pub mode: AccountMode,
    pub previous: Option<f64>,
    pub new: f64,
    pub source: BalanceSource,
    pub timestamp: i64,
}

/// Events published to local display/analytics subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// An open position changed (structure or live-derived fields).
    PositionUpdated(OpenPosition),
    /// The balance-of-record changed.
    BalanceChanged(BalanceChange),
    /// A working order changed state.
    OrderUpdated(OrderEvent),
    /// A round trip completed. Emitted exactly once per close.
    TradeClosed(ClosedTrade),
}
