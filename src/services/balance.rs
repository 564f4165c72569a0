//! Balance authority arbiter.
//!
//! Owns the per-account balance-of-record and decides, per mode, which
//! source may mutate it. Live accounts mirror the broker statement; sim
//! accounts mutate only through locally realized profit/loss or a one-time
//! baseline. An account's authority is fixed the moment its mode resolves
//! and never transitions during a session.
//!
//! Runs entirely in the single consumption context, so state is a plain
//! map with no interior locking.

use crate::services::ModeRules;
use crate::types::{AccountMode, AccountState, BalanceChange, BalanceSource};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-account balance-of-record arbiter.
pub struct BalanceArbiter {
    accounts: HashMap<String, AccountState>,
    rules: ModeRules,
}

impl BalanceArbiter {
    /// New arbiter with the given classification rules.
    pub fn new(rules: ModeRules) -> Self {
        Self {
            accounts: HashMap::new(),
            rules,
        }
    }

    /// Apply a broker balance statement.
    ///
    /// Live: overwrites the stored balance unconditionally and returns the
    /// mutation. Sim: counted and discarded — an expected, by-design
    /// outcome, logged at diagnostic level only. Non-finite values are
    /// rejected outright regardless of mode, previous balance retained.
    pub fn apply_broker_balance(
        &mut self,
        account: &str,
        value: f64,
        timestamp: i64,
    ) -> Option<BalanceChange> {
        if !value.is_finite() {
            warn!("Rejected balance update for {}: unparseable value", account);
            return None;
        }

        let state = self.state_mut(account);
        match state.mode {
            AccountMode::Live => {
                let previous = state.balance;
                state.balance = Some(value);
                state.updated_at = timestamp;
                Some(BalanceChange {
                    account: state.account.clone(),
                    mode: state.mode,
                    previous,
                    new: value,
                    source: BalanceSource::Broker,
                    timestamp,
                })
            }
            AccountMode::Sim => {
                state.discarded_broker_updates += 1;
                debug!(
                    "Discarded broker balance {} for sim account {} ({} total)",
                    value, account, state.discarded_broker_updates
                );
                None
            }
        }
    }

    /// Apply realized profit/loss from a closed trade.
    ///
    /// Sim accounts fold the amount into the balance-of-record. For live
    /// accounts the local figure is informational only and never stored.
    pub fn apply_realized_pnl(
        &mut self,
        account: &str,
        pnl: f64,
        timestamp: i64,
    ) -> Option<BalanceChange> {
        if !pnl.is_finite() {
            warn!("Rejected realized pnl for {}: unparseable value", account);
            return None;
        }

        let state = self.state_mut(account);
        match state.mode {
            AccountMode::Sim => {
                let previous = state.balance;
                let new = previous.unwrap_or(0.0) + pnl;
                state.balance = Some(new);
                state.updated_at = timestamp;
                Some(BalanceChange {
                    account: state.account.clone(),
                    mode: state.mode,
                    previous,
                    new,
                    source: BalanceSource::RealizedPnl,
                    timestamp,
                })
            }
            AccountMode::Live => {
                debug!(
                    "Realized pnl {:+.2} for live account {} is informational only",
                    pnl, account
                );
                None
            }
        }
    }

    /// Set the one-time sim baseline. A second attempt for the same account
    /// is a no-op; live accounts never take a baseline.
    pub fn set_baseline(
        &mut self,
        account: &str,
        value: f64,
        timestamp: i64,
    ) -> Option<BalanceChange> {
        if !value.is_finite() {
            warn!("Rejected baseline for {}: unparseable value", account);
            return None;
        }

        let state = self.state_mut(account);
        if state.mode != AccountMode::Sim {
            debug!("Ignoring baseline for live account {}", account);
            return None;
        }
        if state.baseline_set {
            debug!("Baseline already set for {}, ignoring", account);
            return None;
        }

        let previous = state.balance;
        state.balance = Some(value);
        state.baseline_set = true;
        state.updated_at = timestamp;
        Some(BalanceChange {
            account: state.account.clone(),
            mode: state.mode,
            previous,
            new: value,
            source: BalanceSource::Baseline,
            timestamp,
        })
    }

    /// Resolved mode for an account, classifying it on first sight.
    pub fn mode(&mut self, account: &str) -> AccountMode {
        self.state_mut(account).mode
    }

    /// Current balance-of-record, if any mutation has been accepted.
    pub fn balance(&self, account: &str) -> Option<f64> {
        self.accounts.get(account).and_then(|s| s.balance)
    }

    /// Full account state, if the account has been seen.
    pub fn account(&self, account: &str) -> Option<&AccountState> {
        self.accounts.get(account)
    }

    /// Mode is resolved exactly once, the first time an account is seen.
    fn state_mut(&mut self, account: &str) -> &mut AccountState {
        let rules = &self.rules;
        self.accounts.entry(account.to_string()).or_insert_with(|| {
            let mode = rules.resolve(account);
            debug!("Account {} resolved as {}", account, mode);
            AccountState::new(account.to_string(), mode)
        })
    }
}
