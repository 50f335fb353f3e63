//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use field_collect::error::TransientError;
use field_collect::sync::{LedgerAck, LedgerClient, SubmissionRequest};
use field_collect::{CollectionForm, PendingCollectionRecord, RecordId};

/// Build a queued-ready record with a fixed id
pub fn record(id: &str, client_id: &str, amount: i64) -> PendingCollectionRecord {
    let collection = CollectionForm {
        client_id: client_id.into(),
        amount,
        payment_method: "cash".into(),
        ..Default::default()
    }
    .validate()
    .expect("valid form");
    let mut record = PendingCollectionRecord::assemble(collection, None, Utc::now());
    record.id = RecordId::from(id);
    record
}

/// In-memory ledger that applies each id at most once, like the real one
#[derive(Default)]
pub struct FakeLedger {
    /// Ids the ledger has recorded
    recorded: Mutex<HashSet<String>>,
    /// Submission attempts per id
    calls: Mutex<HashMap<String, u32>>,
    /// Every submission fails before reaching the ledger
    offline: AtomicBool,
    /// Ids whose submission fails before reaching the ledger
    unreachable: Mutex<HashSet<String>>,
    /// Ids whose submission is recorded but whose response is lost once
    lose_response_once: Mutex<HashSet<String>>,
    /// Client references the ledger refuses
    unknown_clients: Mutex<HashSet<String>>,
}

impl FakeLedger {
    pub fn offline_for(&self, id: &str) {
        self.unreachable.lock().unwrap().insert(id.to_string());
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn back_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
        self.unreachable.lock().unwrap().clear();
    }

    pub fn lose_response_once(&self, id: &str) {
        self.lose_response_once.lock().unwrap().insert(id.to_string());
    }

    pub fn refuse_client(&self, client_id: &str) {
        self.unknown_clients.lock().unwrap().insert(client_id.to_string());
    }

    pub fn recorded_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    pub fn is_recorded(&self, id: &str) -> bool {
        self.recorded.lock().unwrap().contains(id)
    }

    pub fn calls_for(&self, id: &str) -> u32 {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn submit(&self, request: &SubmissionRequest) -> Result<LedgerAck, TransientError> {
        let id = request.id.as_str().to_string();
        *self.calls.lock().unwrap().entry(id.clone()).or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) || self.unreachable.lock().unwrap().contains(&id) {
            return Err(TransientError::Connection("network unreachable".into()));
        }

        if self.unknown_clients.lock().unwrap().contains(&request.client_id) {
            return Ok(LedgerAck::Rejected {
                reason: format!("unknown client {}", request.client_id),
            });
        }

        self.recorded.lock().unwrap().insert(id.clone());

        if self.lose_response_once.lock().unwrap().remove(&id) {
            return Err(TransientError::Timeout(std::time::Duration::from_secs(15)));
        }

        Ok(LedgerAck::Accepted)
    }
}
