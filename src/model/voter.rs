use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{Store, StoreError};

/// Collection holding one record per identity-provider subject.
pub const VOTERS: &str = "voters";

/// Platform-wide roles. Only `voter` may cast votes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Public,
    Voter,
    Observer,
    Admin,
}

/// Lifecycle states of a voter record. Records are only ever archived,
/// never deleted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoterStatus {
    Eligible,
    Voted,
    Archived,
    Suspended,
    Deceased,
    Banned,
}

/// A voter record. Fields written by other parts of the platform are left
/// untouched by the store's merge semantics and ignored here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VoterStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_voted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Voter {
    pub fn path(subject_id: &str) -> String {
        format!("{VOTERS}/{subject_id}")
    }

    /// First-contact record: a known subject that has not yet passed
    /// registration review.
    fn first_contact(now: DateTime<Utc>) -> Self {
        Self {
            role: Some(Role::Voter),
            verified: Some(false),
            status: Some(VoterStatus::Eligible),
            created_at: Some(now),
            ..Self::default()
        }
    }

    /// Fetch the voter record for a subject, creating the unverified
    /// first-contact record if this subject has never been seen before.
    pub async fn ensure(store: &Store, subject_id: &str) -> Result<Voter> {
        let path = Self::path(subject_id);
        if let Some((voter, _)) = store.get::<Voter>(&path).await? {
            return Ok(voter);
        }

        let first = Self::first_contact(Utc::now());
        match store.create_if_absent(&path, &first).await {
            Ok(()) => Ok(first),
            // Lost a create race; the record exists now.
            Err(StoreError::AlreadyExists) => store
                .get::<Voter>(&path)
                .await?
                .map(|(voter, _)| voter)
                .ok_or_else(|| {
                    Error::NotFound(format!("Voter record for subject '{subject_id}'"))
                }),
            Err(err) => Err(err.into()),
        }
    }

    /// Eligibility gate for nonce issue and vote admission. Absent fields
    /// are permissive (other platform components own them); an explicit
    /// negative signal rejects.
    pub fn ensure_can_vote(&self) -> Result<()> {
        if matches!(self.role, Some(role) if role != Role::Voter) {
            return Err(Error::Forbidden("Subject is not allowed to vote".to_string()));
        }
        if self.verified == Some(false) {
            return Err(Error::Forbidden("Voter is not verified".to_string()));
        }
        if matches!(
            self.status,
            Some(
                VoterStatus::Archived
                    | VoterStatus::Suspended
                    | VoterStatus::Deceased
                    | VoterStatus::Banned
            )
        ) {
            return Err(Error::Forbidden(
                "Voter status does not allow voting".to_string(),
            ));
        }
        if matches!(self.card_expiry, Some(expiry) if expiry < Utc::now()) {
            return Err(Error::Forbidden("Electoral card has expired".to_string()));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn eligible_voter_passes() {
        let voter = Voter::eligible_example("device", "key");
        assert!(voter.ensure_can_vote().is_ok());
    }

    #[test]
    fn voted_status_still_passes() {
        // The double-vote guard is the vote record itself, not the status.
        let mut voter = Voter::eligible_example("device", "key");
        voter.status = Some(VoterStatus::Voted);
        assert!(voter.ensure_can_vote().is_ok());
    }

    #[test]
    fn negative_signals_reject() {
        let mut voter = Voter::eligible_example("device", "key");
        voter.role = Some(Role::Observer);
        assert!(voter.ensure_can_vote().is_err());

        let mut voter = Voter::eligible_example("device", "key");
        voter.verified = Some(false);
        assert!(voter.ensure_can_vote().is_err());

        for status in [
            VoterStatus::Archived,
            VoterStatus::Suspended,
            VoterStatus::Deceased,
            VoterStatus::Banned,
        ] {
            let mut voter = Voter::eligible_example("device", "key");
            voter.status = Some(status);
            assert!(voter.ensure_can_vote().is_err());
        }

        let mut voter = Voter::eligible_example("device", "key");
        voter.card_expiry = Some(Utc::now() - Duration::days(1));
        assert!(voter.ensure_can_vote().is_err());
    }
}
