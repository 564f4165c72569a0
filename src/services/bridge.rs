//! Event marshaller between the ingestion and consumption contexts.
//!
//! Ingestion tasks (the feed adapters) only normalize and enqueue; all
//! state mutation happens on the single consumer loop in [`Bridge::run`],
//! which handles one event fully before the next. That sequencing is what
//! lets the arbiter and tracker run without any internal locking — the
//! channel boundary is the only synchronization.
//!
//! Two lanes cross the boundary. Critical events (position, balance,
//! order, fill) ride an unbounded mpsc channel: enqueue never blocks and
//! nothing is dropped, and per-(account, symbol) order is enqueue order.
//! Ticks ride a bounded broadcast channel whose lag semantics discard the
//! oldest entries under sustained overload; lagged counts surface as a
//! diagnostic.

use crate::services::{BalanceArbiter, LifecycleOutcome, PositionKey, SqliteStore, TradeTracker};
use crate::types::{CanonicalEvent, OutboundEvent, TickEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Marshaller tuning knobs.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Minimum interval between snapshot flushes of dirty keys.
    pub snapshot_debounce: Duration,
    /// Tick lane capacity; the oldest ticks are dropped past this.
    pub tick_buffer: usize,
    /// Outbound broadcast capacity for display/analytics subscribers.
    pub outbound_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            snapshot_debounce: Duration::from_millis(500),
            tick_buffer: 1024,
            outbound_buffer: 1024,
        }
    }
}

/// Ingestion-side handle. Cheap to clone; dropping every clone stops the
/// consumer loop after it drains.
#[derive(Clone)]
pub struct BridgeHandle {
    critical_tx: mpsc::UnboundedSender<CanonicalEvent>,
    tick_tx: broadcast::Sender<TickEvent>,
}

impl BridgeHandle {
    /// Route a normalized event onto the right lane. Never blocks.
    pub fn send(&self, event: CanonicalEvent) {
        match event {
            CanonicalEvent::Tick(tick) => {
                // No receiver or a full ring both show up as send results we
                // deliberately ignore; ticks are droppable by contract.
                let _ = self.tick_tx.send(tick);
            }
            critical => {
                if self.critical_tx.send(critical).is_err() {
                    warn!("Bridge consumer gone; dropping critical event");
                }
            }
        }
    }
}

/// The consumption context: owns all mutable account and position state.
pub struct Bridge {
    critical_rx: mpsc::UnboundedReceiver<CanonicalEvent>,
    tick_rx: broadcast::Receiver<TickEvent>,
    arbiter: BalanceArbiter,
    tracker: TradeTracker,
    store: Arc<SqliteStore>,
    outbound_tx: broadcast::Sender<OutboundEvent>,
    config: BridgeConfig,
    /// Keys with structural changes awaiting a snapshot flush.
    dirty: HashSet<PositionKey>,
    dropped_ticks: u64,
}

impl Bridge {
    /// Build the bridge and its ingestion handle.
    pub fn new(
        config: BridgeConfig,
        arbiter: BalanceArbiter,
        tracker: TradeTracker,
        store: Arc<SqliteStore>,
    ) -> (Self, BridgeHandle) {
        let (critical_tx, critical_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = broadcast::channel(config.tick_buffer);
        let (outbound_tx, _) = broadcast::channel(config.outbound_buffer);

        let bridge = Self {
            critical_rx,
            tick_rx,
            arbiter,
            tracker,
            store,
            outbound_tx,
            config,
            dirty: HashSet::new(),
            dropped_ticks: 0,
        };
        let handle = BridgeHandle {
            critical_tx,
            tick_tx,
        };
        (bridge, handle)
    }

    /// Subscribe to outbound canonical events.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.outbound_tx.subscribe()
    }

    /// Drain and apply events until every ingestion handle is dropped, then
    /// flush a final snapshot of everything still open.
    ///
    /// Critical events are drained preferentially; a lagging tick lane only
    /// costs ticks.
    pub async fn run(mut self) {
        let mut flush_timer = tokio::time::interval(self.config.snapshot_debounce);
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                event = self.critical_rx.recv() => {
                    match event {
                        Some(event) => self.handle_critical(event),
                        None => break,
                    }
                }
                tick = self.tick_rx.recv() => {
                    match tick {
                        Ok(tick) => self.handle_tick(&tick),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            self.dropped_ticks += n;
                            debug!("Tick lane overloaded, dropped {} (total {})", n, self.dropped_ticks);
                        }
                        // Tick senders gone; critical lane decides shutdown.
                        Err(broadcast::error::RecvError::Closed) => {}
                    }
                }
                _ = flush_timer.tick() => {
                    self.flush_dirty();
                }
            }
        }

        // Ingestion has stopped. Drain whatever ticks remain, then persist.
        loop {
            match self.tick_rx.try_recv() {
                Ok(tick) => self.handle_tick(&tick),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.dropped_ticks += n,
                Err(_) => break,
            }
        }
        self.flush_all();
        info!(
            "Bridge drained and stopped ({} ticks dropped under load)",
            self.dropped_ticks
        );
    }

    /// Apply one critical event. Runs to completion before the next event.
    fn handle_critical(&mut self, event: CanonicalEvent) {
        match event {
            CanonicalEvent::PositionUpdate(position_event) => {
                let mode = self.arbiter.mode(&position_event.account);
                match self.tracker.apply_position_update(&position_event, mode) {
                    LifecycleOutcome::Opened(position) => {
                        if let Err(e) = self.store.record_trade_open(&position, mode) {
                            error!("Failed to record trade open: {}", e);
                        }
                        self.mark_dirty(&position.account, &position.symbol);
                        self.publish(OutboundEvent::PositionUpdated(position));
                    }
                    LifecycleOutcome::Updated(position) => {
                        self.mark_dirty(&position.account, &position.symbol);
                        self.publish(OutboundEvent::PositionUpdated(position));
                    }
                    LifecycleOutcome::Closed(trade) => {
                        if let Err(e) = self.store.record_trade_close(&trade) {
                            error!("Failed to record trade close: {}", e);
                        }
                        if let Err(e) = self.store.delete_snapshot(&trade.account, &trade.symbol) {
                            warn!("Failed to delete snapshot: {}", e);
                        }
                        self.dirty
                            .remove(&(trade.account.clone(), trade.symbol.clone()));
                        if let Some(change) = self.arbiter.apply_realized_pnl(
                            &trade.account,
                            trade.realized_pnl,
                            trade.exited_at,
                        ) {
                            self.publish(OutboundEvent::BalanceChanged(change));
                        }
                        self.publish(OutboundEvent::TradeClosed(trade));
                    }
                    LifecycleOutcome::DuplicateClose => {}
                }
            }
            CanonicalEvent::BalanceUpdate(balance_event) => {
                if let Some(change) = self.arbiter.apply_broker_balance(
                    &balance_event.account,
                    balance_event.balance,
                    balance_event.timestamp,
                ) {
                    self.publish(OutboundEvent::BalanceChanged(change));
                }
            }
            CanonicalEvent::OrderUpdate(order_event) => {
                self.publish(OutboundEvent::OrderUpdated(order_event));
            }
            CanonicalEvent::Fill(fill_event) => {
                if let Some(position) = self.tracker.apply_fill(&fill_event) {
                    let position = position.clone();
                    self.mark_dirty(&position.account, &position.symbol);
                    self.publish(OutboundEvent::PositionUpdated(position));
                }
            }
            CanonicalEvent::Tick(tick) => {
                // Misrouted tick; handle it rather than lose it.
                self.handle_tick(&tick);
            }
        }
    }

    /// Fold a tick into every open position on its symbol.
    fn handle_tick(&mut self, tick: &TickEvent) {
        for key in self.tracker.observe_tick(tick) {
            self.dirty.insert(key.clone());
            if let Some(position) = self.tracker.open_position(&key.0, &key.1) {
                let position = position.clone();
                self.publish(OutboundEvent::PositionUpdated(position));
            }
        }
    }

    /// Persist snapshots for keys touched since the last flush.
    fn flush_dirty(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        let keys: Vec<PositionKey> = self.dirty.drain().collect();
        for (account, symbol) in keys {
            if let Some(position) = self.tracker.open_position(&account, &symbol) {
                if let Err(e) = self.store.save_snapshot(position) {
                    error!("Snapshot write failed for {}/{}: {}", account, symbol, e);
                    // Keep the key dirty; the next flush retries it.
                    self.dirty.insert((account, symbol));
                }
            }
        }
    }

    /// Unconditional flush of every open position. Runs at shutdown, after
    /// the queue is fully drained, so persisted state reflects the last
    /// processed event.
    fn flush_all(&mut self) {
        let positions: Vec<_> = self.tracker.open_positions().cloned().collect();
        for position in positions {
            if let Err(e) = self.store.save_snapshot(&position) {
                error!(
                    "Final snapshot write failed for {}/{}: {}",
                    position.account, position.symbol, e
                );
            }
        }
        self.dirty.clear();
    }

    fn mark_dirty(&mut self, account: &str, symbol: &str) {
        self.dirty.insert((account.to_string(), symbol.to_string()));
    }

    fn publish(&self, event: OutboundEvent) {
        // No subscribers is fine; display consumers attach and detach freely.
        let _ = self.outbound_tx.send(event);
    }
}
