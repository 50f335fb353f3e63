//! Capture controller - one user submission, end to end
//!
//! validate → locate → assemble → enqueue → background drain.
//! The user-facing "saved" confirmation is the successful enqueue; syncing is
//! best effort and happens afterwards.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LocationPolicy;
use crate::error::{CaptureError, LocationError, StoreError, SyncError};
use crate::location::LocationCapture;
use crate::record::{CollectionForm, PendingCollectionRecord};
use crate::store::PendingRecordStore;
use crate::sync::{DrainReport, SchedulerHandle, SyncEngine, SyncTrigger};

/// Result of a successful submission
#[derive(Debug)]
pub struct SubmitReceipt {
    /// The record as queued
    pub record: PendingCollectionRecord,
    /// Why the record has no geo, when lenient policy let it through without one
    pub location_failure: Option<LocationError>,
    /// Background drain started for this submission, if the controller spawned one
    pub background_sync: Option<JoinHandle<Result<DrainReport, SyncError>>>,
}

/// Orchestrates user submissions
pub struct CaptureController {
    store: Arc<PendingRecordStore>,
    engine: Arc<SyncEngine>,
    location: LocationCapture,
    policy: LocationPolicy,
    scheduler: Option<SchedulerHandle>,
}

impl CaptureController {
    pub fn new(
        store: Arc<PendingRecordStore>,
        engine: Arc<SyncEngine>,
        location: LocationCapture,
        policy: LocationPolicy,
    ) -> Self {
        Self {
            store,
            engine,
            location,
            policy,
            scheduler: None,
        }
    }

    /// Route post-enqueue drains through a running scheduler instead of spawning them
    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Validate, geotag and durably queue one collection.
    pub async fn submit(&self, form: CollectionForm) -> Result<SubmitReceipt, CaptureError> {
        let collected_at = Utc::now();
        let collection = form.validate()?;

        let (geo, location_failure) = match self.location.capture_location().await {
            Ok(fix) => (Some(fix), None),
            Err(e) => match self.policy {
                LocationPolicy::Strict => {
                    warn!(error = %e, "Submission blocked: no location fix");
                    return Err(e.into());
                }
                LocationPolicy::Lenient => {
                    warn!(error = %e, "Saving collection without location");
                    (None, Some(e))
                }
            },
        };

        let record = PendingCollectionRecord::assemble(collection, geo, collected_at);
        self.store.enqueue(&record).await?;

        info!(
            record_id = %record.id,
            client_id = %record.client_id,
            amount = record.amount,
            geotagged = record.geo.is_some(),
            "Collection saved"
        );

        let background_sync = match &self.scheduler {
            Some(handle) => {
                handle.trigger(SyncTrigger::Enqueued);
                None
            }
            None => Some(self.engine.spawn_drain()),
        };

        Ok(SubmitReceipt {
            record,
            location_failure,
            background_sync,
        })
    }

    /// Records waiting to sync
    pub async fn queue_depth(&self) -> Result<u64, StoreError> {
        self.store.count().await
    }

    /// Drain now and report.
    ///
    /// The pass runs detached from this future. Dropping it stops the wait
    /// only; submissions already in flight still complete and are applied.
    pub async fn retry_sync(&self) -> Result<DrainReport, SyncError> {
        if let Some(handle) = &self.scheduler {
            if let Some(result) = handle.retry_now().await {
                return result;
            }
            debug!("Scheduler stopped, draining directly");
        }
        self.engine.spawn_drain().await?
    }
}
