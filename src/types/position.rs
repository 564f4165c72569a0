//! Position and trade types.
//!
//! `OpenPosition` is the in-memory working state for one account/instrument
//! round trip. Structural fields are optional: a position restored from an
//! older snapshot may carry only a subset, and absent fields stay unset until
//! live data fills them in. Live-derived fields (current price, points from
//! entry, efficiency) are never persisted.

use crate::types::AccountMode;
use serde::{Deserialize, Serialize};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Direction from a signed net quantity. Zero has no side.
    pub fn from_signed_quantity(quantity: f64) -> Option<Self> {
        if quantity > 0.0 {
            Some(PositionSide::Long)
        } else if quantity < 0.0 {
            Some(PositionSide::Short)
        } else {
            None
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Reference values captured when the position was entered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryContext {
    /// Session high at entry time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_high: Option<f64>,
    /// Session low at entry time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_low: Option<f64>,
    /// Reference price (e.g. session open) at entry time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<f64>,
}

/// One open position per (account, symbol).
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    /// Durable trade-history row id for this round trip.
    pub trade_id: String,
    pub account: String,
    pub symbol: String,
    pub side: Option<PositionSide>,
    /// Average entry price.
    pub entry_price: Option<f64>,
    /// Unsigned quantity.
    pub quantity: Option<f64>,
    /// Instrument point value used for currency conversion.
    pub point_value: f64,
    pub entered_at: Option<i64>,
    pub updated_at: Option<i64>,
    /// Lowest price observed while open. Widens monotonically.
    pub trade_min: Option<f64>,
    /// Highest price observed while open. Widens monotonically.
    pub trade_max: Option<f64>,
    pub target: Option<f64>,
    pub stop: Option<f64>,
    pub entry_context: EntryContext,

    // Live-derived. Recomputed from the next observation, never persisted.
    pub current_price: Option<f64>,
    pub points_from_entry: Option<f64>,
    pub efficiency: Option<f64>,
}

impl OpenPosition {
    /// Open a fresh position from live data.
    pub fn open(
        trade_id: String,
        account: String,
        symbol: String,
        side: PositionSide,
        entry_price: f64,
        quantity: f64,
        point_value: f64,
        entered_at: i64,
    ) -> Self {
        Self {
            trade_id,
            account,
            symbol,
            side: Some(side),
            entry_price: Some(entry_price),
            quantity: Some(quantity),
            point_value,
            entered_at: Some(entered_at),
            updated_at: Some(entered_at),
            trade_min: Some(entry_price),
            trade_max: Some(entry_price),
            target: None,
            stop: None,
            entry_context: EntryContext::default(),
            current_price: None,
            points_from_entry: None,
            efficiency: None,
        }
    }

    /// Fold a price observation into the trade extremes and refresh the
    /// live-derived fields. Extremes only ever widen.
    pub fn observe(&mut self, price: f64, timestamp: i64) {
        self.trade_min = Some(self.trade_min.map_or(price, |m| m.min(price)));
        self.trade_max = Some(self.trade_max.map_or(price, |m| m.max(price)));
        self.current_price = Some(price);
        self.updated_at = Some(timestamp);

        if let (Some(entry), Some(side)) = (self.entry_price, self.side) {
            let points = (price - entry) * side.sign();
            self.points_from_entry = Some(points);
            // Share of the best favorable move currently captured.
            self.efficiency = self.mfe().map(|mfe| {
                if mfe > 0.0 {
                    (points / mfe).clamp(-1.0, 1.0)
                } else {
                    0.0
                }
            });
        }
    }

    /// Maximum adverse excursion in price points. Non-negative.
    pub fn mae(&self) -> Option<f64> {
        let entry = self.entry_price?;
        match self.side? {
            PositionSide::Long => self.trade_min.map(|min| (entry - min).max(0.0)),
            PositionSide::Short => self.trade_max.map(|max| (max - entry).max(0.0)),
        }
    }

    /// Maximum favorable excursion in price points. Non-negative.
    pub fn mfe(&self) -> Option<f64> {
        let entry = self.entry_price?;
        match self.side? {
            PositionSide::Long => self.trade_max.map(|max| (max - entry).max(0.0)),
            PositionSide::Short => self.trade_min.map(|min| (entry - min).max(0.0)),
        }
    }

    /// Quantity with direction sign applied.
    pub fn signed_quantity(&self) -> Option<f64> {
        Some(self.quantity? * self.side?.sign())
    }
}

/// Immutable record of a completed round trip. Written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: String,
    pub account: String,
    pub symbol: String,
    pub side: PositionSide,
    /// Unsigned quantity.
    pub quantity: f64,
    pub point_value: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Realized profit/loss in currency. Always computed, never unset.
    pub realized_pnl: f64,
    /// Maximum adverse excursion in price points. Non-negative.
    pub mae: f64,
    /// Maximum favorable excursion in price points. Non-negative.
    pub mfe: f64,
    pub entered_at: i64,
    pub exited_at: i64,
    pub mode: AccountMode,
}

impl ClosedTrade {
    /// MAE converted to currency using quantity and point value.
    pub fn mae_currency(&self) -> f64 {
        self.mae * self.quantity * self.point_value
    }

    /// MFE converted to currency using quantity and point value.
    pub fn mfe_currency(&self) -> f64 {
        self.mfe * self.quantity * self.point_value
    }
}

/// Durable structural subset of an `OpenPosition`.
///
/// Every field is optional and defaulted so snapshots written by older
/// formats (down to a bare pair of timer fields) restore without error.
/// Live-derived fields are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(default)]
    pub side: Option<PositionSide>,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub point_value: Option<f64>,
    #[serde(default)]
    pub entered_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub trade_min: Option<f64>,
    #[serde(default)]
    pub trade_max: Option<f64>,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub stop: Option<f64>,
    #[serde(default)]
    pub entry_context: Option<EntryContext>,
}

impl PositionSnapshot {
    /// Capture the structural subset of an open position.
    pub fn capture(position: &OpenPosition) -> Self {
        Self {
            version: Some(SNAPSHOT_VERSION),
            trade_id: Some(position.trade_id.clone()),
            side: position.side,
            entry_price: position.entry_price,
            quantity: position.quantity,
            point_value: Some(position.point_value),
            entered_at: position.entered_at,
            updated_at: position.updated_at,
            trade_min: position.trade_min,
            trade_max: position.trade_max,
            target: position.target,
            stop: position.stop,
            entry_context: Some(position.entry_context.clone()),
        }
    }

    /// Rebuild an open position for a key. Absent fields stay unset;
    /// live-derived fields always start unset.
    pub fn restore(self, account: String, symbol: String) -> OpenPosition {
        OpenPosition {
            trade_id: self
                .trade_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            account,
            symbol,
            side: self.side,
            entry_price: self.entry_price,
            quantity: self.quantity,
            point_value: self.point_value.unwrap_or(1.0),
            entered_at: self.entered_at,
            updated_at: self.updated_at,
            trade_min: self.trade_min,
            trade_max: self.trade_max,
            target: self.target,
            stop: self.stop,
            entry_context: self.entry_context.unwrap_or_default(),
            current_price: None,
            points_from_entry: None,
            efficiency: None,
        }
    }
}
