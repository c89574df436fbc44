//! Append-only risk and audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::random_id;
use crate::store::Store;

pub const RISK_EVENTS: &str = "risk_events";
pub const AUDIT_EVENTS: &str = "audit_events";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskType {
    DeviceMismatch,
    KeyMismatch,
    DeviceAlreadyBound,
    DeviceLimitExceeded,
    DeviceHashMismatch,
    InvalidSignature,
    NonceReplayed,
    ResultsUpdateFailed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskEvent {
    #[serde(rename = "type")]
    pub event_type: RiskType,
    pub severity: Severity,
    pub uid: String,
    pub device_hash: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Append a risk event. Fraud monitoring reads these; they never drive
/// control flow, so a failed write is logged and swallowed rather than
/// masking the conflict that triggered it.
pub async fn log(
    store: &Store,
    event_type: RiskType,
    severity: Severity,
    uid: &str,
    device_hash: &str,
    note: &str,
) {
    warn!("Risk event {event_type:?} ({severity:?}) for subject {uid}: {note}");
    let event = RiskEvent {
        event_type,
        severity,
        uid: uid.to_string(),
        device_hash: device_hash.to_string(),
        note: note.to_string(),
        created_at: Utc::now(),
    };
    let path = format!("{RISK_EVENTS}/{}", random_id());
    if let Err(err) = store.create_if_absent(&path, &event).await {
        error!("Failed to record risk event {event_type:?} for subject {uid}: {err}");
    }
}
