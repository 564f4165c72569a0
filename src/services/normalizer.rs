//! Protocol message normalizer.
//!
//! Converts raw broker messages into canonical events. A registry maps each
//! wire type code to a canonical kind, so supporting a new broker message is
//! a registry entry, not a consumer change. Field aliases are resolved here
//! exhaustively — several message variants label the same logical value
//! under different keys, and that ambiguity must never reach the components
//! that mutate state.
//!
//! Unknown type codes are counted and dropped, never fatal. Ticks are
//! normalized and forwarded but kept out of verbose tracing.

use crate::types::{
    codes, BalanceEvent, CanonicalEvent, FillEvent, OrderEvent, PositionEvent, RawMessage,
    TickEvent,
};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Canonical kind a wire type code maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalKind {
    Position,
    Balance,
    Order,
    Fill,
    Tick,
    /// Session-level messages acknowledged and dropped without diagnostics.
    Ack,
}

// Alias tables, in preference order. The first key present wins; resolution
// is deterministic regardless of which variant produced the message.
const ACCOUNT_ALIASES: &[&str] = &["account", "accountId", "accountName"];
const SYMBOL_ALIASES: &[&str] = &["symbol", "instrument", "contract"];
const BALANCE_ALIASES: &[&str] = &["cashBalance", "accountBalance", "balance"];
const QUANTITY_ALIASES: &[&str] = &["quantity", "netQuantity", "qty"];
const AVG_PRICE_ALIASES: &[&str] = &["avgPrice", "averagePrice", "entryPrice"];
const MARKET_PRICE_ALIASES: &[&str] = &["marketPrice", "lastPrice", "price"];
const FILL_PRICE_ALIASES: &[&str] = &["fillPrice", "execPrice", "price"];
const FILL_QTY_ALIASES: &[&str] = &["fillQuantity", "filledQuantity", "quantity"];
const ORDER_ID_ALIASES: &[&str] = &["orderId", "orderRef", "id"];
const ORDER_STATUS_ALIASES: &[&str] = &["status", "orderState", "state"];
const ORDER_PRICE_ALIASES: &[&str] = &["limitPrice", "price", "stopPrice"];
const TICK_PRICE_ALIASES: &[&str] = &["last", "price", "lastPrice"];
const TARGET_ALIASES: &[&str] = &["target", "targetPrice", "profitTarget"];
const STOP_ALIASES: &[&str] = &["stop", "stopPrice", "stopLoss"];
const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "time", "ts"];

/// Wire-message normalizer with an extensible type-code registry.
pub struct Normalizer {
    registry: HashMap<u16, CanonicalKind>,
    /// Per-code counts of messages with no registry entry.
    unhandled: DashMap<u16, u64>,
    /// Messages that matched the registry but failed field resolution.
    rejected: AtomicU64,
}

impl Normalizer {
    /// Empty normalizer. Use [`Normalizer::with_defaults`] for the known
    /// broker message set.
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
            unhandled: DashMap::new(),
            rejected: AtomicU64::new(0),
        }
    }

    /// Normalizer preloaded with the known broker type codes.
    pub fn with_defaults() -> Self {
        let mut n = Self::new();
        n.register(codes::CONNECTION_ACK, CanonicalKind::Ack);
        n.register(codes::POSITION_UPDATE, CanonicalKind::Position);
        n.register(codes::ORDER_UPDATE, CanonicalKind::Order);
        n.register(codes::FILL, CanonicalKind::Fill);
        n.register(codes::ACCOUNT_BALANCE, CanonicalKind::Balance);
        n.register(codes::ACCOUNT_INFO, CanonicalKind::Balance);
        n.register(codes::MARGIN_INFO, CanonicalKind::Balance);
        n.register(codes::MARKET_TICK, CanonicalKind::Tick);
        n
    }

    /// Add or replace a registry entry.
    pub fn register(&mut self, code: u16, kind: CanonicalKind) {
        self.registry.insert(code, kind);
    }

    /// Normalize one raw message into zero or one canonical event.
    pub fn normalize(&self, raw: &RawMessage) -> Option<CanonicalEvent> {
        let kind = match self.registry.get(&raw.kind) {
            Some(kind) => *kind,
            None => {
                let mut count = self.unhandled.entry(raw.kind).or_insert(0);
                *count += 1;
                if *count == 1 {
                    warn!("Unhandled broker message kind {}", raw.kind);
                }
                return None;
            }
        };

        let event = match kind {
            CanonicalKind::Ack => {
                debug!("Broker session message acknowledged (kind {})", raw.kind);
                return None;
            }
            CanonicalKind::Position => self.build_position(&raw.fields),
            CanonicalKind::Balance => self.build_balance(&raw.fields),
            CanonicalKind::Order => self.build_order(&raw.fields),
            CanonicalKind::Fill => self.build_fill(&raw.fields),
            CanonicalKind::Tick => self.build_tick(&raw.fields),
        };

        match event {
            Some(ev) => {
                if ev.is_critical() {
                    debug!("Normalized kind {} into {:?}", raw.kind, ev.key());
                } else {
                    trace!("Normalized tick (kind {})", raw.kind);
                }
                Some(ev)
            }
            None => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Rejected broker message kind {}: required field missing or unparseable",
                    raw.kind
                );
                None
            }
        }
    }

    /// Count of messages seen for a given unregistered type code.
    pub fn unhandled_count(&self, code: u16) -> u64 {
        self.unhandled.get(&code).map(|c| *c).unwrap_or(0)
    }

    /// Total messages rejected during field resolution.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn build_position(&self, fields: &Map<String, Value>) -> Option<CanonicalEvent> {
        let account = resolve_str(fields, ACCOUNT_ALIASES)?;
        let symbol = resolve_str(fields, SYMBOL_ALIASES)?;
        let quantity = resolve_f64(fields, QUANTITY_ALIASES)?;
        Some(CanonicalEvent::PositionUpdate(PositionEvent {
            account,
            symbol,
            quantity,
            avg_price: resolve_f64(fields, AVG_PRICE_ALIASES),
            market_price: resolve_f64(fields, MARKET_PRICE_ALIASES),
            target: resolve_f64(fields, TARGET_ALIASES),
            stop: resolve_f64(fields, STOP_ALIASES),
            timestamp: resolve_timestamp(fields),
        }))
    }

    fn build_balance(&self, fields: &Map<String, Value>) -> Option<CanonicalEvent> {
        let account = resolve_str(fields, ACCOUNT_ALIASES)?;
        // Exhaustive alias resolution: a missing balance is a rejection,
        // never a silent zero.
        let balance = resolve_f64(fields, BALANCE_ALIASES)?;
        Some(CanonicalEvent::BalanceUpdate(BalanceEvent {
            account,
            balance,
            timestamp: resolve_timestamp(fields),
        }))
    }

    fn build_order(&self, fields: &Map<String, Value>) -> Option<CanonicalEvent> {
        let account = resolve_str(fields, ACCOUNT_ALIASES)?;
        let symbol = resolve_str(fields, SYMBOL_ALIASES)?;
        let order_id = resolve_str(fields, ORDER_ID_ALIASES)?;
        let status = resolve_str(fields, ORDER_STATUS_ALIASES)?;
        Some(CanonicalEvent::OrderUpdate(OrderEvent {
            account,
            symbol,
            order_id,
            status,
            quantity: resolve_f64(fields, QUANTITY_ALIASES).unwrap_or(0.0),
            price: resolve_f64(fields, ORDER_PRICE_ALIASES),
            timestamp: resolve_timestamp(fields),
        }))
    }

    fn build_fill(&self, fields: &Map<String, Value>) -> Option<CanonicalEvent> {
        let account = resolve_str(fields, ACCOUNT_ALIASES)?;
        let symbol = resolve_str(fields, SYMBOL_ALIASES)?;
        let quantity = resolve_f64(fields, FILL_QTY_ALIASES)?;
        let price = resolve_f64(fields, FILL_PRICE_ALIASES)?;
        Some(CanonicalEvent::Fill(FillEvent {
            account,
            symbol,
            quantity,
            price,
            timestamp: resolve_timestamp(fields),
        }))
    }

    fn build_tick(&self, fields: &Map<String, Value>) -> Option<CanonicalEvent> {
        let symbol = resolve_str(fields, SYMBOL_ALIASES)?;
        let price = resolve_f64(fields, TICK_PRICE_ALIASES)?;
        Some(CanonicalEvent::Tick(TickEvent {
            symbol,
            price,
            timestamp: resolve_timestamp(fields),
        }))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// First alias present wins. Declared order is the preference order.
fn resolve<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|key| fields.get(*key))
}

/// Resolve a string field.
fn resolve_str(fields: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    match resolve(fields, aliases)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Resolve a numeric field. Brokers send numbers both as JSON numbers and
/// as decimal strings; both forms are accepted, non-finite values are not.
fn resolve_f64(fields: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    let value = match resolve(fields, aliases)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Resolve a millisecond timestamp, falling back to arrival time.
fn resolve_timestamp(fields: &Map<String, Value>) -> i64 {
    resolve(fields, TIMESTAMP_ALIASES)
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
}
