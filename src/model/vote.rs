//! The vote record and the signed message it attests.

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const VOTES: &str = "votes";

/// A committed vote. Append-only; there is no update or delete path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub uid: String,
    pub election_id: String,
    pub candidate_id: String,
    pub device_hash: String,
    pub nonce_id: String,
    /// The base64 signature as presented, kept for re-verification.
    pub signature: String,
    pub audit_token: String,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    /// Deterministic key: its existence is the double-vote guard.
    pub fn path(election_id: &str, uid: &str) -> String {
        format!("{VOTES}/{election_id}_{uid}")
    }
}

/// The exact byte string the device signs. Fields are '|'-joined, so none
/// of them may contain '|'; identifier validation enforces that and nonce
/// tokens are hex.
pub fn vote_message(
    nonce: &str,
    uid: &str,
    election_id: &str,
    candidate_id: &str,
    device_hash: &str,
) -> String {
    format!("{nonce}|{uid}|{election_id}|{candidate_id}|{device_hash}")
}

/// Receipt token returned to the voter: unforgeable without the stored
/// vote, but revealing nothing about it on its own.
pub fn audit_token(election_id: &str, candidate_id: &str, now: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(election_id.as_bytes());
    hasher.update(b"|");
    hasher.update(candidate_id.as_bytes());
    hasher.update(b"|");
    hasher.update(now.to_rfc3339().as_bytes());
    hasher.update(rand::random::<[u8; 16]>());
    HEXLOWER.encode(&hasher.finalize())
}
