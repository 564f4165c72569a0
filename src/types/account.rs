//! Account classification and balance-of-record state.

use serde::{Deserialize, Serialize};

/// Whether an account trades real capital.
///
/// Resolved once per account when it is first seen and never re-evaluated
/// for the rest of the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountMode {
    /// Simulated/paper account. Balance is computed locally.
    Sim,
    /// Live account. The broker statement is the balance of record.
    Live,
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountMode::Sim => write!(f, "sim"),
            AccountMode::Live => write!(f, "live"),
        }
    }
}

/// Which side may mutate an account's balance-of-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceAuthority {
    /// Broker statements overwrite the stored balance (live accounts).
    Broker,
    /// Only locally computed results mutate the balance (sim accounts).
    Local,
}

impl BalanceAuthority {
    /// Authority implied by an account mode. Fixed for the account lifetime.
    pub fn for_mode(mode: AccountMode) -> Self {
        match mode {
            AccountMode::Live => BalanceAuthority::Broker,
            AccountMode::Sim => BalanceAuthority::Local,
        }
    }
}

/// Origin of a single accepted balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    /// Broker balance statement (live accounts only).
    Broker,
    /// Realized profit/loss from a closed trade (sim accounts only).
    RealizedPnl,
    /// Explicit one-time baseline set at session start or restore.
    Baseline,
}

impl std::fmt::Display for BalanceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceSource::Broker => write!(f, "broker"),
            BalanceSource::RealizedPnl => write!(f, "realized_pnl"),
            BalanceSource::Baseline => write!(f, "baseline"),
        }
    }
}

/// Per-account balance-of-record state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    /// Account identifier as it appears on the wire.
    pub account: String,
    /// Resolved mode, fixed for the process lifetime.
    pub mode: AccountMode,
    /// Who may mutate the balance. Follows the mode, never transitions.
    pub authority: BalanceAuthority,
    /// Current balance-of-record. None until the first accepted mutation.
    pub balance: Option<f64>,
    /// Whether the one-time baseline has been applied.
    pub baseline_set: bool,
    /// Timestamp (ms) of the last accepted mutation.
    pub updated_at: i64,
    /// Broker balance statements received and discarded (sim accounts).
    pub discarded_broker_updates: u64,
}

impl AccountState {
    /// Fresh state for an account with its resolved mode.
    pub fn new(account: String, mode: AccountMode) -> Self {
        Self {
            account,
            mode,
            authority: BalanceAuthority::for_mode(mode),
            balance: None,
            baseline_set: false,
            updated_at: 0,
            discarded_broker_updates: 0,
        }
    }
}
