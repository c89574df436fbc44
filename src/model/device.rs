//! The 1 voter - 1 device - 1 key binding.
//!
//! A binding is written once and only ever revalidated afterwards; every
//! mismatch is a hard conflict with a risk event, never a silent takeover.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::model::{
    risk::{self, RiskType, Severity},
    voter::Voter,
};
use crate::store::{fields, Precondition, Store, StoreError};

pub const DEVICE_HASHES: &str = "device_hashes";

/// Devices a single voter may hold bindings for.
const MAX_DEVICES_PER_VOTER: usize = 1;

/// The device side of a binding, keyed by fingerprint hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBinding {
    /// The one subject this device is bound to.
    pub uid: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl DeviceBinding {
    pub fn path(fingerprint: &str) -> String {
        format!("{DEVICE_HASHES}/{fingerprint}")
    }
}

/// Enforce the binding rules in order and record the binding, refreshing
/// last-seen on every successful revalidation.
pub async fn bind_or_validate(
    store: &Store,
    subject_id: &str,
    fingerprint: &str,
    public_key: &str,
) -> Result<()> {
    let voter = Voter::ensure(store, subject_id).await?;

    if matches!(&voter.device_hash, Some(bound) if bound != fingerprint) {
        risk::log(
            store,
            RiskType::DeviceMismatch,
            Severity::High,
            subject_id,
            fingerprint,
            "Attempted to register a different device fingerprint",
        )
        .await;
        return Err(Error::Conflict(
            "Device does not match the registered device".to_string(),
        ));
    }
    if matches!(&voter.device_public_key, Some(bound) if bound != public_key) {
        risk::log(
            store,
            RiskType::KeyMismatch,
            Severity::High,
            subject_id,
            fingerprint,
            "Attempted to register a different device key",
        )
        .await;
        return Err(Error::Conflict("Device key mismatch".to_string()));
    }

    let device = store
        .get::<DeviceBinding>(&DeviceBinding::path(fingerprint))
        .await?;
    if let Some((binding, _)) = &device {
        if binding.uid != subject_id {
            return Err(already_bound(store, subject_id, fingerprint, &binding.uid).await);
        }
    } else {
        // No record under this fingerprint: make sure the voter is not
        // holding bindings under other fingerprints.
        let bound = store
            .run_query(
                DEVICE_HASHES,
                "uid",
                subject_id,
                (MAX_DEVICES_PER_VOTER + 1) as u32,
            )
            .await?;
        if bound.len() >= MAX_DEVICES_PER_VOTER {
            risk::log(
                store,
                RiskType::DeviceLimitExceeded,
                Severity::High,
                subject_id,
                fingerprint,
                &format!("Device limit exceeded (max {MAX_DEVICES_PER_VOTER})"),
            )
            .await;
            return Err(Error::Conflict(
                "Maximum number of devices reached for this account".to_string(),
            ));
        }
    }

    let now = Utc::now();
    store
        .conditional_update(
            &Voter::path(subject_id),
            fields(json!({
                "deviceHash": fingerprint,
                "devicePublicKey": public_key,
                "deviceLastSeenAt": now,
            })),
            Precondition::Exists,
        )
        .await?;

    match &device {
        Some(_) => {
            store
                .conditional_update(
                    &DeviceBinding::path(fingerprint),
                    fields(json!({
                        "uid": subject_id,
                        "publicKey": public_key,
                        "lastSeenAt": now,
                    })),
                    Precondition::Exists,
                )
                .await?;
        }
        None => {
            let binding = DeviceBinding {
                uid: subject_id.to_string(),
                public_key: public_key.to_string(),
                created_at: Some(now),
                last_seen_at: Some(now),
            };
            match store
                .create_if_absent(&DeviceBinding::path(fingerprint), &binding)
                .await
            {
                Ok(()) => {}
                // Lost a first-bind race; check who won.
                Err(StoreError::AlreadyExists) => {
                    let winner = store
                        .get::<DeviceBinding>(&DeviceBinding::path(fingerprint))
                        .await?
                        .map(|(binding, _)| binding)
                        .ok_or_else(|| {
                            Error::Conflict("Device binding vanished during registration".to_string())
                        })?;
                    if winner.uid != subject_id {
                        return Err(already_bound(store, subject_id, fingerprint, &winner.uid).await);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    info!("Device binding confirmed for subject {subject_id}");
    Ok(())
}

async fn already_bound(store: &Store, subject_id: &str, fingerprint: &str, winner: &str) -> Error {
    risk::log(
        store,
        RiskType::DeviceAlreadyBound,
        Severity::Critical,
        subject_id,
        fingerprint,
        &format!("Device already bound to {winner}"),
    )
    .await;
    Error::Conflict("Device already registered to another account".to_string())
}

/// Check a presented fingerprint against the voter's bound device and return
/// the bound public key. Used on the nonce-issue and vote-cast paths.
pub async fn ensure_bound_device(
    store: &Store,
    voter: &Voter,
    subject_id: &str,
    fingerprint: &str,
    context: &str,
) -> Result<String> {
    let (bound_hash, public_key) = match (&voter.device_hash, &voter.device_public_key) {
        (Some(hash), Some(key)) => (hash, key),
        _ => return Err(Error::Conflict("Device not registered".to_string())),
    };
    if bound_hash != fingerprint {
        risk::log(
            store,
            RiskType::DeviceHashMismatch,
            Severity::High,
            subject_id,
            fingerprint,
            context,
        )
        .await;
        return Err(Error::Conflict("Device mismatch".to_string()));
    }
    Ok(public_key.clone())
}
