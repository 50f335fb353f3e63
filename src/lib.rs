//! field-collect - offline-first capture and sync for field revenue collection
//!
//! Field agents record collections on devices that are often offline. Each
//! collection is written to a durable local queue first and delivered to the
//! central ledger later, exactly once in effect.
//!
//! ## Architecture
//!
//! - **location**: one fresh fix per submission, with its own timeout
//! - **store**: SQLite queue of records the ledger has not acknowledged
//! - **proof**: content-addressed attachment files, referenced from records
//! - **sync**: ledger client, drain engine, and trigger/backoff scheduler
//! - **capture**: validate → locate → enqueue → background drain
//!
//! ## Storage Layout
//!
//! ```text
//! <data_dir>/
//! ├── queue.db        # pending_records + rejected_records (WAL)
//! └── proofs/         # sha256-<hex> files, two-char fan-out
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod location;
pub mod proof;
pub mod record;
pub mod store;
pub mod sync;

// Re-exports
pub use capture::{CaptureController, SubmitReceipt};
pub use config::{Config, LocationPolicy};
pub use error::{CaptureError, LocationError, StoreError, SyncError, ValidationError};
pub use location::{LocationCapture, PositionSource};
pub use proof::{ProofRef, ProofStore};
pub use record::{CollectionForm, GeoFix, PaymentMethod, PendingCollectionRecord, RecordId};
pub use store::{PendingRecordStore, RejectedRecord};
pub use sync::{DrainReport, HttpLedgerClient, LedgerClient, SyncEngine, SyncScheduler};
