//! Tests for trade lifecycle tracking
//!
//! Tests cover:
//! - Open / update / close transitions
//! - Trade extreme widening and MAE/MFE computation
//! - Exactly-once close semantics
//! - Realized profit/loss with point value scaling

use keel::services::TradeTracker;
use keel::types::{AccountMode, PositionEvent, PositionSide, TickEvent};
use std::collections::HashMap;

fn tracker() -> TradeTracker {
    TradeTracker::new(HashMap::from([("ES".to_string(), 50.0)]))
}

fn position_event(account: &str, symbol: &str, quantity: f64, price: f64, ts: i64) -> PositionEvent {
    PositionEvent {
        account: account.to_string(),
        symbol: symbol.to_string(),
        quantity,
        avg_price: if price > 0.0 { Some(price) } else { None },
        market_price: None,
        target: None,
        stop: None,
        timestamp: ts,
    }
}

fn tick(symbol: &str, price: f64, ts: i64) -> TickEvent {
    TickEvent {
        symbol: symbol.to_string(),
        price,
        timestamp: ts,
    }
}

fn close_event(account: &str, symbol: &str, exit_price: f64, ts: i64) -> PositionEvent {
    PositionEvent {
        account: account.to_string(),
        symbol: symbol.to_string(),
        quantity: 0.0,
        avg_price: None,
        market_price: Some(exit_price),
        target: None,
        stop: None,
        timestamp: ts,
    }
}

// =============================================================================
// Open / Update / Close
// =============================================================================

#[test]
fn test_first_nonzero_quantity_opens() {
    let mut t = tracker();
    let outcome = t.apply_position_update(&position_event("Sim101", "ES", 2.0, 6839.25, 1), AccountMode::Sim);

    assert!(matches!(outcome, keel::services::LifecycleOutcome::Opened(_)));
    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.side, Some(PositionSide::Long));
    assert_eq!(position.entry_price, Some(6839.25));
    assert_eq!(position.quantity, Some(2.0));
    assert_eq!(position.point_value, 50.0);
    assert_eq!(position.trade_min, Some(6839.25));
    assert_eq!(position.trade_max, Some(6839.25));
}

#[test]
fn test_at_most_one_position_per_key() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);
    t.apply_position_update(&position_event("Sim101", "ES", 3.0, 6840.0, 2), AccountMode::Sim);

    assert_eq!(t.open_positions().count(), 1);
    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.quantity, Some(3.0));

    // A different key tracks independently.
    t.apply_position_update(&position_event("Sim101", "NQ", 1.0, 21500.0, 3), AccountMode::Sim);
    assert_eq!(t.open_positions().count(), 2);
}

#[test]
fn test_zero_quantity_transition_closes() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);

    let outcome = t.apply_position_update(&close_event("Sim101", "ES", 6845.0, 2), AccountMode::Sim);
    match outcome {
        keel::services::LifecycleOutcome::Closed(trade) => {
            assert_eq!(trade.entry_price, 6839.25);
            assert_eq!(trade.exit_price, 6845.0);
            assert_eq!(trade.mode, AccountMode::Sim);
        }
        other => panic!("expected close, got {:?}", other),
    }
    assert!(t.open_position("Sim101", "ES").is_none());
}

#[test]
fn test_fill_updates_extremes_but_never_closes() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 2.0, 6839.25, 1), AccountMode::Sim);

    let fill = keel::types::FillEvent {
        account: "Sim101".to_string(),
        symbol: "ES".to_string(),
        quantity: -2.0,
        price: 6845.0,
        timestamp: 2,
    };
    assert!(t.apply_fill(&fill).is_some());

    // Still open: the zero-quantity transition is the only close trigger.
    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.trade_max, Some(6845.0));
    assert_eq!(position.current_price, Some(6845.0));
}

#[test]
fn test_entry_context_captured_from_session() {
    let mut t = tracker();
    t.observe_tick(&tick("ES", 6835.5, 1));
    t.observe_tick(&tick("ES", 6846.0, 2));
    t.observe_tick(&tick("ES", 6830.0, 3));

    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 4), AccountMode::Sim);
    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.entry_context.session_high, Some(6846.0));
    assert_eq!(position.entry_context.session_low, Some(6830.0));
    assert_eq!(position.entry_context.reference_price, Some(6830.0));
}

// =============================================================================
// Trade Extremes and MAE/MFE
// =============================================================================

#[test]
fn test_extremes_widen_monotonically() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);

    for (i, price) in [6835.0, 6842.0, 6830.0, 6845.0, 6838.0].iter().enumerate() {
        t.observe_tick(&tick("ES", *price, 2 + i as i64));
    }

    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.trade_min, Some(6830.0));
    assert_eq!(position.trade_max, Some(6845.0));

    // A later in-range price narrows nothing.
    t.observe_tick(&tick("ES", 6839.0, 10));
    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.trade_min, Some(6830.0));
    assert_eq!(position.trade_max, Some(6845.0));
}

#[test]
fn test_long_mae_mfe() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);
    t.observe_tick(&tick("ES", 6830.0, 2));
    t.observe_tick(&tick("ES", 6845.0, 3));

    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.mae(), Some(9.25));
    assert_eq!(position.mfe(), Some(5.75));
}

#[test]
fn test_short_mae_mfe() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", -1.0, 6843.0, 1), AccountMode::Sim);
    t.observe_tick(&tick("ES", 6835.0, 2));
    t.observe_tick(&tick("ES", 6850.0, 3));

    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.mae(), Some(7.0));
    assert_eq!(position.mfe(), Some(8.0));
}

#[test]
fn test_mae_mfe_non_negative_for_one_sided_moves() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);
    // Price only ever moves in the trade's favor.
    t.observe_tick(&tick("ES", 6850.0, 2));

    let position = t.open_position("Sim101", "ES").unwrap();
    assert_eq!(position.mae(), Some(0.0));
    assert_eq!(position.mfe(), Some(10.75));
}

#[test]
fn test_closed_trade_carries_mae_mfe() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 2.0, 6839.25, 1), AccountMode::Sim);
    t.observe_tick(&tick("ES", 6830.0, 2));
    t.observe_tick(&tick("ES", 6845.0, 3));

    match t.apply_position_update(&close_event("Sim101", "ES", 6845.0, 4), AccountMode::Sim) {
        keel::services::LifecycleOutcome::Closed(trade) => {
            assert_eq!(trade.mae, 9.25);
            assert_eq!(trade.mfe, 5.75);
            // Currency scaling: points x quantity x point value.
            assert_eq!(trade.mae_currency(), 9.25 * 2.0 * 50.0);
            assert_eq!(trade.mfe_currency(), 5.75 * 2.0 * 50.0);
        }
        other => panic!("expected close, got {:?}", other),
    }
}

// =============================================================================
// Realized Profit/Loss
// =============================================================================

#[test]
fn test_long_realized_pnl_scales_by_point_value() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 2.0, 6839.25, 1), AccountMode::Sim);

    match t.apply_position_update(&close_event("Sim101", "ES", 6845.0, 2), AccountMode::Sim) {
        keel::services::LifecycleOutcome::Closed(trade) => {
            // (6845.00 - 6839.25) x 2 x 50
            assert_eq!(trade.realized_pnl, 575.0);
        }
        other => panic!("expected close, got {:?}", other),
    }
}

#[test]
fn test_short_realized_pnl_sign() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", -1.0, 6843.0, 1), AccountMode::Sim);

    match t.apply_position_update(&close_event("Sim101", "ES", 6850.0, 2), AccountMode::Sim) {
        keel::services::LifecycleOutcome::Closed(trade) => {
            // Short losing trade: (6850 - 6843) x (-1) x 50
            assert_eq!(trade.realized_pnl, -350.0);
        }
        other => panic!("expected close, got {:?}", other),
    }
}

#[test]
fn test_flat_close_records_explicit_zero() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);

    match t.apply_position_update(&close_event("Sim101", "ES", 6839.25, 2), AccountMode::Sim) {
        keel::services::LifecycleOutcome::Closed(trade) => {
            assert_eq!(trade.realized_pnl, 0.0);
        }
        other => panic!("expected close, got {:?}", other),
    }
}

#[test]
fn test_unknown_symbol_defaults_to_unit_point_value() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "CL", 1.0, 80.0, 1), AccountMode::Sim);

    match t.apply_position_update(&close_event("Sim101", "CL", 81.0, 2), AccountMode::Sim) {
        keel::services::LifecycleOutcome::Closed(trade) => {
            assert_eq!(trade.point_value, 1.0);
            assert_eq!(trade.realized_pnl, 1.0);
        }
        other => panic!("expected close, got {:?}", other),
    }
}

// =============================================================================
// Exactly-Once Close
// =============================================================================

#[test]
fn test_duplicate_close_is_a_noop() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);

    let first = t.apply_position_update(&close_event("Sim101", "ES", 6845.0, 2), AccountMode::Sim);
    assert!(matches!(first, keel::services::LifecycleOutcome::Closed(_)));

    let second = t.apply_position_update(&close_event("Sim101", "ES", 6845.0, 3), AccountMode::Sim);
    assert!(matches!(second, keel::services::LifecycleOutcome::DuplicateClose));
    assert_eq!(t.duplicate_close_count(), 1);

    let third = t.apply_position_update(&close_event("Sim101", "ES", 6850.0, 4), AccountMode::Sim);
    assert!(matches!(third, keel::services::LifecycleOutcome::DuplicateClose));
    assert_eq!(t.duplicate_close_count(), 2);
}

#[test]
fn test_close_for_never_opened_key_is_a_noop() {
    let mut t = tracker();
    let outcome = t.apply_position_update(&close_event("Sim101", "ES", 6845.0, 1), AccountMode::Sim);
    assert!(matches!(outcome, keel::services::LifecycleOutcome::DuplicateClose));
}

#[test]
fn test_reopening_after_close_starts_a_new_round_trip() {
    let mut t = tracker();
    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6839.25, 1), AccountMode::Sim);
    let first_id = t.open_position("Sim101", "ES").unwrap().trade_id.clone();
    t.apply_position_update(&close_event("Sim101", "ES", 6845.0, 2), AccountMode::Sim);

    t.apply_position_update(&position_event("Sim101", "ES", 1.0, 6850.0, 3), AccountMode::Sim);
    let position = t.open_position("Sim101", "ES").unwrap();
    assert_ne!(position.trade_id, first_id);
    assert_eq!(position.entry_price, Some(6850.0));
    assert_eq!(position.trade_min, Some(6850.0));
}
