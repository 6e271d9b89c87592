// Execution layer: order submission, position lifecycle, reconciliation
pub mod action_lock;
pub mod executor;
pub mod lifecycle;
pub mod sweeper;

pub use action_lock::{ActionGate, ActionPermit};
pub use executor::OrderExecutor;
pub use lifecycle::{PositionLifecycleManager, SettlementVerdict};
pub use sweeper::ReconciliationSweeper;
