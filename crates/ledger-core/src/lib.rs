//! Funding ledger engine: applies transactions to funding buckets under
//! balance invariants, derives agreement-level totals, and guards entity
//! lifecycle transitions. Pure logic over in-memory records; persistence and
//! transport live in `ledger-api`.

pub mod aggregator;
pub mod ledger;
pub mod lifecycle;

pub use aggregator::{agreement_totals, AggregatorError};
pub use ledger::{
    apply_transaction, utilization_pct, CapacityEffect, LedgerError, LedgerOutcome,
    TransactionRequest,
};
pub use lifecycle::{
    ensure_agreement_editable, ensure_service_deletable, transition_agreement, transition_client,
    transition_service, TransitionError,
};
