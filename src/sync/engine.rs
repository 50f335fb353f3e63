//! Sync engine - drains the pending queue against the ledger
//!
//! One `drain_once` pass attempts every queued record exactly once:
//! - accepted → removed from the queue
//! - rejected → moved to the rejection log and reported as failed
//! - transient failure → left queued for the next pass
//!
//! Records are independent. Submissions run with bounded concurrency and each
//! is capped by a timeout, so a pass always terminates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{SyncError, TransientError};
use crate::record::{PendingCollectionRecord, RecordId};
use crate::store::PendingRecordStore;
use crate::sync::ledger::{LedgerAck, LedgerClient, SubmissionRequest};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Sent with every submission
    pub device_id: String,
    /// Upper bound on a single submission attempt
    pub submit_timeout: Duration,
    /// Concurrent submissions within one pass
    pub max_in_flight: usize,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            device_id: "unregistered-device".to_string(),
            submit_timeout: Duration::from_secs(15),
            max_in_flight: 4,
        }
    }
}

impl From<&Config> for SyncEngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            device_id: config.device.id.clone(),
            submit_timeout: Duration::from_secs(config.ledger.submit_timeout_secs),
            max_in_flight: config.sync.max_in_flight.max(1),
        }
    }
}

/// A record that did not sync in this pass, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub id: RecordId,
    pub reason: String,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Accepted by the ledger and removed locally
    pub succeeded: Vec<RecordId>,
    /// Definitively rejected; removed from the queue and logged
    pub failed: Vec<FailedRecord>,
    /// Transient failure; still queued
    pub deferred: Vec<FailedRecord>,
    /// Already being submitted by an overlapping pass
    pub skipped_in_flight: Vec<RecordId>,
}

impl DrainReport {
    /// Number of records submitted in this pass
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.deferred.len()
    }

    /// No record was left behind by a transient failure
    pub fn is_clean(&self) -> bool {
        self.deferred.is_empty()
    }
}

enum Outcome {
    Succeeded(RecordId),
    Failed(FailedRecord),
    Deferred(FailedRecord),
}

/// Marks a record id as being submitted; released on drop
struct Claim {
    id: RecordId,
    in_flight: Arc<Mutex<HashSet<RecordId>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.id);
        }
    }
}

/// Drains [`PendingRecordStore`] against a [`LedgerClient`]
pub struct SyncEngine {
    store: Arc<PendingRecordStore>,
    ledger: Arc<dyn LedgerClient>,
    config: SyncEngineConfig,
    in_flight: Arc<Mutex<HashSet<RecordId>>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<PendingRecordStore>,
        ledger: Arc<dyn LedgerClient>,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<PendingRecordStore> {
        &self.store
    }

    /// Attempt every queued record once.
    ///
    /// Fails only if the queue itself cannot be read.
    pub async fn drain_once(&self) -> Result<DrainReport, SyncError> {
        let pending = self.store.list_pending().await?;
        let mut report = DrainReport::default();

        if pending.is_empty() {
            debug!("Nothing to sync");
            return Ok(report);
        }

        let claimed = self.claim(pending, &mut report);

        let outcomes: Vec<Outcome> = stream::iter(claimed)
            .map(|(record, claim)| self.attempt(record, claim))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded(id) => report.succeeded.push(id),
                Outcome::Failed(f) => report.failed.push(f),
                Outcome::Deferred(f) => report.deferred.push(f),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            skipped = report.skipped_in_flight.len(),
            "Drain pass complete"
        );
        Ok(report)
    }

    /// Run a drain pass as a detached task.
    ///
    /// The pass completes and its removals are applied even if the caller
    /// drops the handle.
    pub fn spawn_drain(self: &Arc<Self>) -> JoinHandle<Result<DrainReport, SyncError>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = engine.drain_once().await;
            if let Err(ref e) = result {
                error!(error = %e, "Background drain failed");
            }
            result
        })
    }

    fn claim(
        &self,
        pending: Vec<PendingCollectionRecord>,
        report: &mut DrainReport,
    ) -> Vec<(PendingCollectionRecord, Claim)> {
        // A poisoned set only means a panicking pass; its ids are still accurate
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut claimed = Vec::with_capacity(pending.len());
        for record in pending {
            if in_flight.insert(record.id.clone()) {
                let claim = Claim {
                    id: record.id.clone(),
                    in_flight: Arc::clone(&self.in_flight),
                };
                claimed.push((record, claim));
            } else {
                debug!(record_id = %record.id, "Already in flight, skipping");
                report.skipped_in_flight.push(record.id);
            }
        }
        claimed
    }

    async fn attempt(&self, record: PendingCollectionRecord, _claim: Claim) -> Outcome {
        let request = SubmissionRequest::from_record(&record, &self.config.device_id);
        let id = record.id;

        let result = match tokio::time::timeout(self.config.submit_timeout, self.ledger.submit(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransientError::Timeout(self.config.submit_timeout)),
        };

        match result {
            Ok(LedgerAck::Accepted) => match self.store.remove(&id).await {
                Ok(_) => {
                    info!(record_id = %id, "Record synced");
                    Outcome::Succeeded(id)
                }
                Err(e) => {
                    // Stays queued; the ledger dedupes the resubmission
                    error!(record_id = %id, error = %e, "Accepted record could not be removed");
                    Outcome::Deferred(FailedRecord {
                        id,
                        reason: format!("accepted but not removed locally: {}", e),
                    })
                }
            },
            Ok(LedgerAck::Rejected { reason }) => match self.store.reject(&id, &reason).await {
                Ok(_) => Outcome::Failed(FailedRecord { id, reason }),
                Err(e) => {
                    error!(record_id = %id, error = %e, "Rejected record could not be moved to the log");
                    Outcome::Deferred(FailedRecord {
                        id,
                        reason: format!("rejected ({}) but not removed locally: {}", reason, e),
                    })
                }
            },
            Err(e) => {
                warn!(record_id = %id, error = %e, "Submission failed, keeping record queued");
                Outcome::Deferred(FailedRecord {
                    id,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CollectionForm;
    use async_trait::async_trait;
    use chrono::Utc;

    struct AcceptAll;

    #[async_trait]
    impl LedgerClient for AcceptAll {
        async fn submit(&self, _request: &SubmissionRequest) -> Result<LedgerAck, TransientError> {
            Ok(LedgerAck::Accepted)
        }
    }

    struct Hang;

    #[async_trait]
    impl LedgerClient for Hang {
        async fn submit(&self, _request: &SubmissionRequest) -> Result<LedgerAck, TransientError> {
            futures::future::pending().await
        }
    }

    fn record(amount: i64) -> PendingCollectionRecord {
        let collection = CollectionForm {
            client_id: "client-1".into(),
            amount,
            payment_method: "cash".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        PendingCollectionRecord::assemble(collection, None, Utc::now())
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_clean_noop() {
        let store = Arc::new(PendingRecordStore::open_in_memory().await.unwrap());
        let engine = SyncEngine::new(store, Arc::new(AcceptAll), SyncEngineConfig::default());
        let report = engine.drain_once().await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_submission_timeout_defers_record() {
        let store = Arc::new(PendingRecordStore::open_in_memory().await.unwrap());
        let r = record(10);
        store.enqueue(&r).await.unwrap();

        let engine = SyncEngine::new(
            store.clone(),
            Arc::new(Hang),
            SyncEngineConfig {
                submit_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let report = engine.drain_once().await.unwrap();
        assert_eq!(report.deferred.len(), 1);
        assert_eq!(report.deferred[0].id, r.id);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claims_are_released_after_pass() {
        let store = Arc::new(PendingRecordStore::open_in_memory().await.unwrap());
        store.enqueue(&record(10)).await.unwrap();

        let engine = SyncEngine::new(
            store.clone(),
            Arc::new(Hang),
            SyncEngineConfig {
                submit_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        engine.drain_once().await.unwrap();
        let second = engine.drain_once().await.unwrap();
        assert!(second.skipped_in_flight.is_empty());
        assert_eq!(second.deferred.len(), 1);
    }
}
