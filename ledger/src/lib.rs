//! Tool crib ledger.
//!
//! The write side ([`AssignmentEngine`]) moves tool units between the depot
//! and owners, recording every movement in the append-only audit log. The
//! read side ([`Analytics`]) derives stock alerts, consumption rankings,
//! operator scorecards, and lifecycle trends from that log.

pub mod analytics;
pub mod engine;
pub mod error;

pub use analytics::{
    Analytics, ConsumptionReport, MonthlyActivity, OperatorScorecard, ToolLifecycle, ToolTally,
    TrendDirection,
};
pub use engine::{
    AssignmentEngine, Disposition, EngineConfig, IssueItem, IssueReceipt, IssueRequest,
    ReturnRequest, StockEntryRequest, TransferRequest,
};
pub use error::{LedgerError, LedgerResult};
