//! Collection records - the unit of work in the pending queue
//!
//! A record is built once from a validated form, written to the queue, and
//! never modified afterwards. Its `id` is the idempotency key the ledger uses
//! to collapse resubmissions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::proof::ProofRef;

/// Layout version written into every stored record
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Client-generated record identifier.
///
/// UUID v4 gives 122 random bits per id, which keeps collisions out of reach
/// for any realistic number of records on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the client paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "mobile_money" | "momo" => Ok(PaymentMethod::MobileMoney),
            "bank_transfer" | "bank" => Ok(PaymentMethod::BankTransfer),
            "cheque" | "check" => Ok(PaymentMethod::Cheque),
            _ => Err(ValidationError::UnknownPaymentMethod(s.to_string())),
        }
    }
}

/// A single geotagged reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of the 68% confidence circle
    pub accuracy_meters: f64,
    pub captured_at: DateTime<Utc>,
}

impl GeoFix {
    /// Coordinates in range and a finite, non-negative accuracy
    pub fn is_plausible(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy_meters.is_finite()
            && self.accuracy_meters >= 0.0
    }
}

/// Queue status. Records only ever exist locally while pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    PendingSync,
}

/// Raw form input supplied by the capture UI
#[derive(Debug, Clone, Default)]
pub struct CollectionForm {
    pub client_id: String,
    /// Minor units of the operating currency
    pub amount: i64,
    pub description: Option<String>,
    pub payment_method: String,
    pub proof_artifact_ref: Option<ProofRef>,
}

/// Form input that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCollection {
    pub client_id: String,
    pub amount: i64,
    pub description: Option<String>,
    pub payment_method: PaymentMethod,
    pub proof_artifact_ref: Option<ProofRef>,
}

impl CollectionForm {
    /// Check the form without touching storage or location
    pub fn validate(self) -> Result<ValidatedCollection, ValidationError> {
        if self.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }

        let client_id = self.client_id.trim().to_string();
        if client_id.is_empty() {
            return Err(ValidationError::MissingClient);
        }

        let payment_method = self.payment_method.parse::<PaymentMethod>()?;

        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(ValidatedCollection {
            client_id,
            amount: self.amount,
            description,
            payment_method,
            proof_artifact_ref: self.proof_artifact_ref,
        })
    }
}

/// A collection waiting for ledger acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCollectionRecord {
    pub id: RecordId,
    pub client_id: String,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub geo: Option<GeoFix>,
    pub collected_at: DateTime<Utc>,
    pub status: RecordStatus,
    #[serde(default)]
    pub proof_artifact_ref: Option<ProofRef>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    RECORD_SCHEMA_VERSION
}

impl PendingCollectionRecord {
    /// Assemble a new record with a freshly generated id
    pub fn assemble(
        collection: ValidatedCollection,
        geo: Option<GeoFix>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            client_id: collection.client_id,
            amount: collection.amount,
            description: collection.description,
            payment_method: collection.payment_method,
            geo,
            collected_at,
            status: RecordStatus::PendingSync,
            proof_artifact_ref: collection.proof_artifact_ref,
            schema_version: RECORD_SCHEMA_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(amount: i64) -> CollectionForm {
        CollectionForm {
            client_id: "client-42".into(),
            amount,
            description: Some("  market stall fee ".into()),
            payment_method: "cash".into(),
            proof_artifact_ref: None,
        }
    }

    #[test]
    fn test_validate_accepts_positive_amount() {
        let v = form(5000).validate().unwrap();
        assert_eq!(v.amount, 5000);
        assert_eq!(v.payment_method, PaymentMethod::Cash);
        assert_eq!(v.description.as_deref(), Some("market stall fee"));
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        assert_eq!(
            form(-10).validate().unwrap_err(),
            ValidationError::NonPositiveAmount(-10)
        );
        assert_eq!(
            form(0).validate().unwrap_err(),
            ValidationError::NonPositiveAmount(0)
        );
    }

    #[test]
    fn test_validate_requires_client() {
        let mut f = form(100);
        f.client_id = "   ".into();
        assert_eq!(f.validate().unwrap_err(), ValidationError::MissingClient);
    }

    #[test]
    fn test_payment_method_aliases() {
        assert_eq!("Mobile-Money".parse::<PaymentMethod>().unwrap(), PaymentMethod::MobileMoney);
        assert_eq!("momo".parse::<PaymentMethod>().unwrap(), PaymentMethod::MobileMoney);
        assert_eq!("check".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cheque);
        assert!("barter".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_assemble_generates_distinct_ids() {
        let v = form(100).validate().unwrap();
        let a = PendingCollectionRecord::assemble(v.clone(), None, Utc::now());
        let b = PendingCollectionRecord::assemble(v, None, Utc::now());
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, RecordStatus::PendingSync);
        assert_eq!(a.schema_version, RECORD_SCHEMA_VERSION);
    }

    #[test]
    fn test_record_json_uses_camel_case() {
        let v = form(100).validate().unwrap();
        let record = PendingCollectionRecord::assemble(v, None, Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["clientId"], "client-42");
        assert_eq!(json["paymentMethod"], "cash");
        assert_eq!(json["status"], "pending_sync");
        assert!(json["geo"].is_null());
    }

    #[test]
    fn test_geo_plausibility() {
        let mut fix = GeoFix {
            latitude: 5.6037,
            longitude: -0.187,
            accuracy_meters: 8.0,
            captured_at: Utc::now(),
        };
        assert!(fix.is_plausible());
        fix.latitude = 91.0;
        assert!(!fix.is_plausible());
        fix.latitude = 5.0;
        fix.accuracy_meters = f64::NAN;
        assert!(!fix.is_plausible());
    }
}
