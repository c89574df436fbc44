//! Single-use anti-replay nonces.
//!
//! A nonce proves the freshness of a signed vote message. It is scoped to
//! (voter, election, device), lives for a fixed short TTL, and is consumed
//! at most once: consumption sets `usedAt` behind a revision precondition,
//! never deletes, so the audit trail survives.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::random_id;

pub const VOTE_NONCES: &str = "vote_nonces";

/// Why a presented nonce cannot be consumed. Reuse is surfaced separately
/// so the caller can record it as a replay signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NonceRejection {
    WrongScope,
    DeviceMismatch,
    Expired,
    AlreadyUsed,
}

impl NonceRejection {
    pub fn message(self) -> &'static str {
        match self {
            Self::WrongScope => "Nonce not valid for this vote",
            Self::DeviceMismatch => "Nonce device mismatch",
            Self::Expired => "Nonce expired",
            Self::AlreadyUsed => "Nonce already used",
        }
    }
}

impl From<NonceRejection> for Error {
    fn from(rejection: NonceRejection) -> Self {
        Error::Conflict(rejection.message().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nonce {
    pub uid: String,
    pub election_id: String,
    pub device_hash: String,
    /// The random token included in the signed message. Opaque here.
    pub nonce: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

impl Nonce {
    pub fn path(id: &str) -> String {
        format!("{VOTE_NONCES}/{id}")
    }

    /// A fresh nonce and its document id.
    pub fn new(uid: &str, election_id: &str, device_hash: &str, ttl: Duration) -> (String, Self) {
        let created_at = Utc::now();
        let nonce = Self {
            uid: uid.to_string(),
            election_id: election_id.to_string(),
            device_hash: device_hash.to_string(),
            nonce: random_id(),
            created_at,
            expires_at: created_at + ttl,
            used_at: None,
        };
        (random_id(), nonce)
    }

    /// All the ways a presented nonce can be unusable, each checked and
    /// reported independently. The already-used check here is advisory;
    /// the revision precondition in the vote commit is what makes single
    /// use hold under races.
    pub fn ensure_consumable(
        &self,
        uid: &str,
        election_id: &str,
        device_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), NonceRejection> {
        if self.uid != uid || self.election_id != election_id {
            return Err(NonceRejection::WrongScope);
        }
        if self.device_hash != device_hash {
            return Err(NonceRejection::DeviceMismatch);
        }
        if self.expires_at < now {
            return Err(NonceRejection::Expired);
        }
        if self.used_at.is_some() {
            return Err(NonceRejection::AlreadyUsed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> Nonce {
        Nonce::new("v1", "e1", "fp-1", Duration::minutes(3)).1
    }

    #[test]
    fn fresh_nonce_is_consumable() {
        let nonce = example();
        assert!(nonce.ensure_consumable("v1", "e1", "fp-1", Utc::now()).is_ok());
    }

    #[test]
    fn ownership_and_scope_mismatches_reject() {
        let nonce = example();
        let now = Utc::now();
        assert_eq!(
            nonce.ensure_consumable("v2", "e1", "fp-1", now),
            Err(NonceRejection::WrongScope)
        );
        assert_eq!(
            nonce.ensure_consumable("v1", "e2", "fp-1", now),
            Err(NonceRejection::WrongScope)
        );
        assert_eq!(
            nonce.ensure_consumable("v1", "e1", "fp-2", now),
            Err(NonceRejection::DeviceMismatch)
        );
    }

    #[test]
    fn expiry_rejects_even_when_otherwise_valid() {
        let nonce = example();
        let after_expiry = nonce.expires_at + Duration::seconds(1);
        assert_eq!(
            nonce.ensure_consumable("v1", "e1", "fp-1", after_expiry),
            Err(NonceRejection::Expired)
        );
    }

    #[test]
    fn used_nonce_rejects() {
        let mut nonce = example();
        nonce.used_at = Some(Utc::now());
        assert_eq!(
            nonce.ensure_consumable("v1", "e1", "fp-1", Utc::now()),
            Err(NonceRejection::AlreadyUsed)
        );
        assert!(matches!(
            Error::from(NonceRejection::AlreadyUsed),
            Error::Conflict(msg) if msg.contains("already used")
        ));
    }

    #[test]
    fn token_and_id_are_distinct_and_random() {
        let (id_a, nonce_a) = Nonce::new("v1", "e1", "fp-1", Duration::minutes(3));
        let (id_b, nonce_b) = Nonce::new("v1", "e1", "fp-1", Duration::minutes(3));
        assert_ne!(id_a, id_b);
        assert_ne!(nonce_a.nonce, nonce_b.nonce);
        assert_ne!(id_a, nonce_a.nonce);
    }
}
