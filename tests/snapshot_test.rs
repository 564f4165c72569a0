//! Tests for snapshot persistence and recovery
//!
//! Tests cover:
//! - Structural round trip through SQLite
//! - Live-derived fields excluded from persistence
//! - Backward-compatible restore of older snapshot formats
//! - Fallback recovery from open trade history
//! - Trade history writes and queries

use keel::services::{SqliteStore, TradeTracker};
use keel::types::{
    AccountMode, ClosedTrade, OpenPosition, PositionSide, PositionSnapshot, SNAPSHOT_VERSION,
};
use std::collections::HashMap;

fn open_position() -> OpenPosition {
    let mut position = OpenPosition::open(
        "trade-1".to_string(),
        "Sim101".to_string(),
        "ES".to_string(),
        PositionSide::Long,
        6839.25,
        2.0,
        50.0,
        1_700_000_000_000,
    );
    position.target = Some(6850.0);
    position.stop = Some(6830.0);
    position.entry_context.session_high = Some(6846.0);
    position.entry_context.reference_price = Some(6835.5);
    position.observe(6830.0, 1_700_000_001_000);
    position.observe(6845.0, 1_700_000_002_000);
    position
}

// =============================================================================
// Snapshot Round Trip
// =============================================================================

#[test]
fn test_snapshot_round_trip_preserves_structural_fields() {
    let store = SqliteStore::new_in_memory().unwrap();
    let position = open_position();
    store.save_snapshot(&position).unwrap();

    let rows = store.load_snapshots();
    assert_eq!(rows.len(), 1);
    let restored = rows
        .into_iter()
        .next()
        .unwrap()
        .snapshot
        .unwrap()
        .restore("Sim101".to_string(), "ES".to_string());

    assert_eq!(restored.trade_id, position.trade_id);
    assert_eq!(restored.side, position.side);
    assert_eq!(restored.entry_price, position.entry_price);
    assert_eq!(restored.quantity, position.quantity);
    assert_eq!(restored.point_value, position.point_value);
    assert_eq!(restored.entered_at, position.entered_at);
    assert_eq!(restored.updated_at, position.updated_at);
    assert_eq!(restored.trade_min, Some(6830.0));
    assert_eq!(restored.trade_max, Some(6845.0));
    assert_eq!(restored.target, Some(6850.0));
    assert_eq!(restored.stop, Some(6830.0));
    assert_eq!(restored.entry_context, position.entry_context);
}

#[test]
fn test_live_derived_fields_unset_after_restore() {
    let store = SqliteStore::new_in_memory().unwrap();
    let position = open_position();
    // Live-derived fields are populated in memory before the save.
    assert!(position.current_price.is_some());
    assert!(position.points_from_entry.is_some());
    assert!(position.efficiency.is_some());
    store.save_snapshot(&position).unwrap();

    let restored = store
        .load_snapshots()
        .into_iter()
        .next()
        .unwrap()
        .snapshot
        .unwrap()
        .restore("Sim101".to_string(), "ES".to_string());

    assert_eq!(restored.current_price, None);
    assert_eq!(restored.points_from_entry, None);
    assert_eq!(restored.efficiency, None);

    // The next live observation recomputes them.
    let mut restored = restored;
    restored.observe(6841.0, 1_700_000_003_000);
    assert_eq!(restored.current_price, Some(6841.0));
    assert_eq!(restored.points_from_entry, Some(6841.0 - 6839.25));
}

#[test]
fn test_snapshot_upsert_keeps_one_row_per_key() {
    let store = SqliteStore::new_in_memory().unwrap();
    let mut position = open_position();
    store.save_snapshot(&position).unwrap();
    position.observe(6820.0, 1_700_000_004_000);
    store.save_snapshot(&position).unwrap();

    let rows = store.load_snapshots();
    assert_eq!(rows.len(), 1);
    let snapshot = rows.into_iter().next().unwrap().snapshot.unwrap();
    assert_eq!(snapshot.trade_min, Some(6820.0));
    assert_eq!(snapshot.version, Some(SNAPSHOT_VERSION));
}

// =============================================================================
// Backward Compatibility
// =============================================================================

#[test]
fn test_legacy_snapshot_with_only_timer_fields_restores() {
    let store = SqliteStore::new_in_memory().unwrap();
    // An old-format payload carrying nothing but the two timer fields.
    store
        .save_raw_snapshot(
            "Sim101",
            "ES",
            1,
            r#"{"entered_at": 1690000000000, "updated_at": 1690000500000}"#,
        )
        .unwrap();

    let rows = store.load_snapshots();
    assert_eq!(rows.len(), 1);
    let snapshot = rows.into_iter().next().unwrap().snapshot.expect("legacy payload must parse");
    assert_eq!(snapshot.entered_at, Some(1690000000000));
    assert_eq!(snapshot.updated_at, Some(1690000500000));

    let restored = snapshot.restore("Sim101".to_string(), "ES".to_string());
    // Everything else stays unset, not zeroed.
    assert_eq!(restored.side, None);
    assert_eq!(restored.entry_price, None);
    assert_eq!(restored.quantity, None);
    assert_eq!(restored.trade_min, None);
    assert_eq!(restored.trade_max, None);
    assert_eq!(restored.target, None);
    assert_eq!(restored.current_price, None);
}

#[test]
fn test_unknown_snapshot_fields_ignored() {
    let snapshot: PositionSnapshot = serde_json::from_str(
        r#"{"entry_price": 6839.25, "someFutureField": {"a": 1}, "another": true}"#,
    )
    .expect("unknown fields are tolerated");
    assert_eq!(snapshot.entry_price, Some(6839.25));
}

// =============================================================================
// Fallback Recovery
// =============================================================================

#[test]
fn test_corrupt_snapshot_falls_back_to_open_trade() {
    let store = SqliteStore::new_in_memory().unwrap();
    let position = open_position();
    store.record_trade_open(&position, AccountMode::Sim).unwrap();
    store
        .save_raw_snapshot("Sim101", "ES", SNAPSHOT_VERSION, "{not valid json")
        .unwrap();

    let mut tracker = TradeTracker::new(HashMap::new());
    assert_eq!(tracker.recover_from(&store), 1);

    let recovered = tracker.open_position("Sim101", "ES").unwrap();
    assert_eq!(recovered.trade_id, "trade-1");
    assert_eq!(recovered.entry_price, Some(6839.25));
    assert_eq!(recovered.quantity, Some(2.0));
    // Extremes were not in the trade row; they restart at entry.
    assert_eq!(recovered.trade_min, Some(6839.25));
    assert_eq!(recovered.trade_max, Some(6839.25));
}

#[test]
fn test_open_trade_without_snapshot_recovers() {
    let store = SqliteStore::new_in_memory().unwrap();
    let position = open_position();
    store.record_trade_open(&position, AccountMode::Sim).unwrap();

    let mut tracker = TradeTracker::new(HashMap::new());
    assert_eq!(tracker.recover_from(&store), 1);
    assert!(tracker.open_position("Sim101", "ES").is_some());
}

#[test]
fn test_recovery_with_nothing_on_disk_starts_flat() {
    let store = SqliteStore::new_in_memory().unwrap();
    store
        .save_raw_snapshot("Sim101", "ES", SNAPSHOT_VERSION, "garbage")
        .unwrap();

    let mut tracker = TradeTracker::new(HashMap::new());
    // Corrupt snapshot, no trade history: degraded recovery, never a panic.
    assert_eq!(tracker.recover_from(&store), 0);
    assert!(tracker.open_position("Sim101", "ES").is_none());
}

// =============================================================================
// Trade History
// =============================================================================

fn closed_trade(id: &str, exited_at: i64, pnl: f64) -> ClosedTrade {
    ClosedTrade {
        id: id.to_string(),
        account: "Sim101".to_string(),
        symbol: "ES".to_string(),
        side: PositionSide::Long,
        quantity: 1.0,
        point_value: 50.0,
        entry_price: 6839.25,
        exit_price: 6845.0,
        realized_pnl: pnl,
        mae: 9.25,
        mfe: 5.75,
        entered_at: exited_at - 60_000,
        exited_at,
        mode: AccountMode::Sim,
    }
}

#[test]
fn test_closed_trade_round_trip() {
    let store = SqliteStore::new_in_memory().unwrap();
    let position = open_position();
    store.record_trade_open(&position, AccountMode::Sim).unwrap();

    let trade = closed_trade("trade-1", 1_700_000_060_000, 287.5);
    store.record_trade_close(&trade).unwrap();

    let trades = store.closed_trades(Some("Sim101"), None, None, 10);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0], trade);
    // The open row was consumed; nothing is left to recover.
    assert!(store.load_open_trade("Sim101", "ES").is_none());
}

#[test]
fn test_close_is_recorded_once() {
    let store = SqliteStore::new_in_memory().unwrap();
    let position = open_position();
    store.record_trade_open(&position, AccountMode::Sim).unwrap();

    let trade = closed_trade("trade-1", 1_700_000_060_000, 287.5);
    store.record_trade_close(&trade).unwrap();
    // A second write for the same round trip changes nothing.
    let mut replay = trade.clone();
    replay.realized_pnl = 999.0;
    store.record_trade_close(&replay).unwrap();

    let trades = store.closed_trades(Some("Sim101"), None, None, 10);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].realized_pnl, 287.5);
}

#[test]
fn test_closed_trades_filtered_by_time_window() {
    let store = SqliteStore::new_in_memory().unwrap();
    for (id, exited_at) in [("t1", 1_000), ("t2", 2_000), ("t3", 3_000)] {
        store.record_trade_close(&closed_trade(id, exited_at, 100.0)).unwrap();
    }

    let window = store.closed_trades(None, Some(1_500), Some(2_500), 10);
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].id, "t2");

    assert_eq!(store.closed_trade_count(), 3);
}

#[test]
fn test_closed_trades_never_have_unset_pnl() {
    let store = SqliteStore::new_in_memory().unwrap();
    let position = open_position();
    store.record_trade_open(&position, AccountMode::Sim).unwrap();
    // Open rows are excluded from closed-trade history.
    assert!(store.closed_trades(None, None, None, 10).is_empty());

    // A flat round trip still records an explicit zero.
    let trade = closed_trade("trade-1", 1_700_000_060_000, 0.0);
    store.record_trade_close(&trade).unwrap();
    let trades = store.closed_trades(None, None, None, 10);
    assert_eq!(trades[0].realized_pnl, 0.0);
}
