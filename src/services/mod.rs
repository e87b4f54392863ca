// Ledger rules and orchestration
pub mod reconciliation;
pub mod status_machine;

// External capabilities consumed by the engine
pub mod catalog;
pub mod demand;

pub use reconciliation::ReconciliationEngine;
