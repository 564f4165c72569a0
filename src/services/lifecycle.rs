//! Trade lifecycle tracker.
//!
//! Tracks at most one open position per (account, symbol) key. A position is
//! created by the first nonzero-quantity position update for a key, mutated
//! by subsequent updates and price observations, and closed only by the
//! explicit zero-quantity transition — the single authoritative close
//! trigger. Fills refresh observed prices but never close, so two message
//! paths can never both record the same round trip.

use crate::types::{
    AccountMode, ClosedTrade, FillEvent, OpenPosition, PositionEvent, PositionSide, TickEvent,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// (account, symbol) tracking key.
pub type PositionKey = (String, String);

/// What a position update did to the tracked state.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOutcome {
    /// A new position was opened.
    Opened(OpenPosition),
    /// An existing position changed.
    Updated(OpenPosition),
    /// The position went flat; the round trip record, emitted exactly once.
    Closed(ClosedTrade),
    /// A close signal arrived for an already-flat key. Counted, not recorded.
    DuplicateClose,
}

/// Per-symbol session price statistics, fed by the tick stream.
#[derive(Debug, Clone, Copy)]
struct SessionStats {
    last: f64,
    high: f64,
    low: f64,
}

/// Open-position tracker and round-trip recorder.
pub struct TradeTracker {
    positions: HashMap<PositionKey, OpenPosition>,
    /// Instrument point values; symbols not listed use 1.0.
    point_values: HashMap<String, f64>,
    /// Session stats per symbol, captured into entry context at open.
    session: HashMap<String, SessionStats>,
    duplicate_closes: u64,
}

impl TradeTracker {
    /// New tracker with per-symbol point values.
    pub fn new(point_values: HashMap<String, f64>) -> Self {
        Self {
            positions: HashMap::new(),
            point_values,
            session: HashMap::new(),
            duplicate_closes: 0,
        }
    }

    /// Apply a normalized position update for its (account, symbol) key.
    pub fn apply_position_update(
        &mut self,
        event: &PositionEvent,
        mode: AccountMode,
    ) -> LifecycleOutcome {
        let key = (event.account.clone(), event.symbol.clone());

        if event.quantity == 0.0 {
            return self.close(&key, event, mode);
        }

        match self.positions.get_mut(&key) {
            Some(position) => {
                // Quantity/price changes for an open key mutate in place.
                // A restored position missing entry fields backfills here.
                if let Some(side) = PositionSide::from_signed_quantity(event.quantity) {
                    position.side = Some(side);
                }
                position.quantity = Some(event.quantity.abs());
                if let Some(avg) = event.avg_price {
                    if avg > 0.0 {
                        position.entry_price = Some(avg);
                        if position.trade_min.is_none() {
                            position.trade_min = Some(avg);
                            position.trade_max = Some(avg);
                        }
                    }
                }
                if event.target.is_some() {
                    position.target = event.target;
                }
                if event.stop.is_some() {
                    position.stop = event.stop;
                }
                if let Some(price) = event.market_price {
                    position.observe(price, event.timestamp);
                } else {
                    position.updated_at = Some(event.timestamp);
                }
                LifecycleOutcome::Updated(position.clone())
            }
            None => {
                let side = match PositionSide::from_signed_quantity(event.quantity) {
                    Some(side) => side,
                    None => return self.close(&key, event, mode),
                };
                let entry_price = event
                    .avg_price
                    .filter(|p| *p > 0.0)
                    .or(event.market_price)
                    .unwrap_or(0.0);
                let point_value = self.point_value(&event.symbol);
                let mut position = OpenPosition::open(
                    Uuid::new_v4().to_string(),
                    event.account.clone(),
                    event.symbol.clone(),
                    side,
                    entry_price,
                    event.quantity.abs(),
                    point_value,
                    event.timestamp,
                );
                position.target = event.target;
                position.stop = event.stop;
                if let Some(stats) = self.session.get(&event.symbol) {
                    position.entry_context.session_high = Some(stats.high);
                    position.entry_context.session_low = Some(stats.low);
                    position.entry_context.reference_price = Some(stats.last);
                }
                if let Some(price) = event.market_price {
                    position.observe(price, event.timestamp);
                }
                info!(
                    "Opened {} {} x{} @ {} for {}",
                    position.symbol,
                    side,
                    event.quantity.abs(),
                    entry_price,
                    position.account
                );
                self.positions.insert(key, position.clone());
                LifecycleOutcome::Opened(position)
            }
        }
    }

    /// Fold a market tick into every open position on that symbol.
    /// Returns the keys whose state changed.
    pub fn observe_tick(&mut self, tick: &TickEvent) -> Vec<PositionKey> {
        self.session
            .entry(tick.symbol.clone())
            .and_modify(|stats| {
                stats.last = tick.price;
                stats.high = stats.high.max(tick.price);
                stats.low = stats.low.min(tick.price);
            })
            .or_insert(SessionStats {
                last: tick.price,
                high: tick.price,
                low: tick.price,
            });

        let mut touched = Vec::new();
        for (key, position) in self.positions.iter_mut() {
            if position.symbol == tick.symbol {
                position.observe(tick.price, tick.timestamp);
                touched.push(key.clone());
            }
        }
        touched
    }

    /// Fold an execution report into the open position's observed prices.
    /// Fills never close a position; the zero-quantity transition does.
    pub fn apply_fill(&mut self, fill: &FillEvent) -> Option<&OpenPosition> {
        let key = (fill.account.clone(), fill.symbol.clone());
        let position = self.positions.get_mut(&key)?;
        position.observe(fill.price, fill.timestamp);
        Some(position)
    }

    /// Install a recovered position for its key. Used only during startup.
    pub fn restore(&mut self, position: OpenPosition) {
        let key = (position.account.clone(), position.symbol.clone());
        self.positions.insert(key, position);
    }

    /// The open position for a key, if any.
    pub fn open_position(&self, account: &str, symbol: &str) -> Option<&OpenPosition> {
        self.positions
            .get(&(account.to_string(), symbol.to_string()))
    }

    /// All currently open positions.
    pub fn open_positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.values()
    }

    /// Close signals received for keys that were already flat.
    pub fn duplicate_close_count(&self) -> u64 {
        self.duplicate_closes
    }

    /// Point value for a symbol, defaulting to 1.0.
    pub fn point_value(&self, symbol: &str) -> f64 {
        self.point_values.get(symbol).copied().unwrap_or(1.0)
    }

    /// Rebuild open positions from durable storage at startup.
    ///
    /// Each snapshot restores its key; a key whose snapshot is unreadable
    /// falls back to the most recent still-open trade row; if that is also
    /// absent the key starts flat with a degraded-recovery warning. Recovery
    /// never fails: the worst case is an empty tracker.
    pub fn recover_from(&mut self, store: &crate::services::SqliteStore) -> usize {
        let mut restored = 0;
        for row in store.load_snapshots() {
            match row.snapshot {
                Some(snapshot) => {
                    let position = snapshot.restore(row.account.clone(), row.symbol.clone());
                    debug!("Restored {}/{} from snapshot", row.account, row.symbol);
                    self.restore(position);
                    restored += 1;
                }
                None => match store.load_open_trade(&row.account, &row.symbol) {
                    Some(position) => {
                        info!(
                            "Rebuilt {}/{} from open trade history (snapshot unreadable)",
                            row.account, row.symbol
                        );
                        self.restore(position);
                        restored += 1;
                    }
                    None => {
                        warn!(
                            "Degraded recovery for {}/{}: no usable snapshot or open trade, starting flat",
                            row.account, row.symbol
                        );
                    }
                },
            }
        }

        // Open trade rows whose snapshot never made it to disk.
        for (account, symbol) in store.open_trade_keys() {
            if self.open_position(&account, &symbol).is_some() {
                continue;
            }
            match store.load_open_trade(&account, &symbol) {
                Some(position) => {
                    info!("Rebuilt {}/{} from open trade history", account, symbol);
                    self.restore(position);
                    restored += 1;
                }
                None => {
                    warn!(
                        "Degraded recovery for {}/{}: open trade row unreadable, starting flat",
                        account, symbol
                    );
                }
            }
        }
        restored
    }

    /// The single close path. Emits exactly one `ClosedTrade` per round
    /// trip; a second close signal for the same key is a counted no-op.
    fn close(&mut self, key: &PositionKey, event: &PositionEvent, mode: AccountMode) -> LifecycleOutcome {
        let mut position = match self.positions.remove(key) {
            Some(position) => position,
            None => {
                self.duplicate_closes += 1;
                debug!(
                    "Duplicate close for {}/{} ignored ({} total)",
                    key.0, key.1, self.duplicate_closes
                );
                return LifecycleOutcome::DuplicateClose;
            }
        };

        let (entry_price, quantity, side) =
            match (position.entry_price, position.quantity, position.side) {
                (Some(entry), Some(qty), Some(side)) => (entry, qty, side),
                _ => {
                    // Restored position whose entry fields never backfilled.
                    // A profit/loss figure cannot be computed for it.
                    warn!(
                        "Dropping close for {}/{}: recovered position has no entry data",
                        key.0, key.1
                    );
                    return LifecycleOutcome::DuplicateClose;
                }
            };

        let exit_price = event
            .market_price
            .filter(|p| *p > 0.0)
            .or(position.current_price)
            .unwrap_or(entry_price);
        // The exit is the last price observation of the round trip; it can
        // still widen the extremes.
        position.observe(exit_price, event.timestamp);
        let signed_quantity = quantity * side.sign();
        // Explicitly computed even when exit == entry: a flat round trip
        // records zero, never an unset value.
        let realized_pnl = (exit_price - entry_price) * signed_quantity * position.point_value;

        let trade = ClosedTrade {
            id: position.trade_id.clone(),
            account: key.0.clone(),
            symbol: key.1.clone(),
            side,
            quantity,
            point_value: position.point_value,
            entry_price,
            exit_price,
            realized_pnl,
            mae: position.mae().unwrap_or(0.0),
            mfe: position.mfe().unwrap_or(0.0),
            entered_at: position.entered_at.unwrap_or(event.timestamp),
            exited_at: event.timestamp,
            mode,
        };

        info!(
            "Closed {} {} x{}: entry {} exit {} pnl {:+.2}",
            trade.symbol, trade.side, trade.quantity, trade.entry_price, trade.exit_price,
            trade.realized_pnl
        );
        LifecycleOutcome::Closed(trade)
    }
}
