pub mod balance;
pub mod bridge;
pub mod lifecycle;
pub mod mode;
pub mod normalizer;
pub mod sqlite_store;

pub use balance::BalanceArbiter;
pub use bridge::{Bridge, BridgeConfig, BridgeHandle};
pub use lifecycle::{LifecycleOutcome, PositionKey, TradeTracker};
pub use mode::ModeRules;
pub use normalizer::{CanonicalKind, Normalizer};
pub use sqlite_store::{SnapshotRow, SqliteStore};
