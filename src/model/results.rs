//! Live per-election tallies.
//!
//! The tally is a convenience aggregate, not the record of truth; the vote
//! documents are. Updates go through a read-modify-conditional-write loop
//! so concurrent casts never lose increments.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{to_fields, with_optimistic_retry, Precondition, Store, StoreError};

pub const RESULTS: &str = "results";

/// Write-race attempts before giving up and leaving the tally stale.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub election_id: String,
    pub total_votes: u64,
    #[serde(default)]
    pub candidate_counts: HashMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}

impl Results {
    pub fn path(election_id: &str) -> String {
        format!("{RESULTS}/{election_id}")
    }
}

/// Count one vote for a candidate, returning the new election total.
pub async fn increment(
    store: &Store,
    election_id: &str,
    candidate_id: &str,
) -> Result<u64, StoreError> {
    with_optimistic_retry("results increment", MAX_ATTEMPTS, || {
        Box::pin(try_increment(store, election_id, candidate_id))
    })
    .await
}

async fn try_increment(
    store: &Store,
    election_id: &str,
    candidate_id: &str,
) -> Result<u64, StoreError> {
    let path = Results::path(election_id);
    match store.get::<Results>(&path).await? {
        None => {
            let results = Results {
                election_id: election_id.to_string(),
                total_votes: 1,
                candidate_counts: HashMap::from([(candidate_id.to_string(), 1)]),
                updated_at: Utc::now(),
            };
            store.create_if_absent(&path, &results).await?;
            Ok(1)
        }
        Some((mut results, version)) => {
            *results
                .candidate_counts
                .entry(candidate_id.to_string())
                .or_insert(0) += 1;
            results.total_votes += 1;
            results.updated_at = Utc::now();
            store
                .conditional_update(&path, to_fields(&results)?, Precondition::Revision(version))
                .await?;
            Ok(results.total_votes)
        }
    }
}
