//! Sync layer - one-way delivery of queued records to the ledger
//!
//! Handles:
//! - Ledger submission with the record id as idempotency key
//! - Drain passes over the pending queue
//! - Trigger-driven scheduling with capped exponential backoff

pub mod engine;
pub mod ledger;
pub mod scheduler;

// Re-exports
pub use engine::{DrainReport, FailedRecord, SyncEngine, SyncEngineConfig};
pub use ledger::{HttpLedgerClient, LedgerAck, LedgerClient, SubmissionRequest};
pub use scheduler::{Backoff, SchedulerHandle, SyncScheduler, SyncTrigger};
