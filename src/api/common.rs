//! Validation helpers shared by the endpoints.

use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::election::{Candidate, Election, CANDIDATES};
use crate::store::Store;

/// Identifiers travel in document paths and in the pipe-delimited signed
/// message, so both '/' and '|' are rejected outright.
pub fn validate_id(value: &str, what: &str) -> Result<()> {
    if value.is_empty() || value.len() > 128 || value.chars().any(|c| c == '/' || c == '|') {
        return Err(Error::BadRequest(format!("Invalid {what}")));
    }
    Ok(())
}

/// Fetch an election and require it to be accepting votes right now.
pub async fn open_election_by_id(store: &Store, election_id: &str) -> Result<Election> {
    let (election, _) = store
        .get::<Election>(&Election::path(election_id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("Election '{election_id}'")))?;
    if !election.is_open(Utc::now()) {
        return Err(Error::Conflict("Election is not open".to_string()));
    }
    Ok(election)
}

/// Candidates normally live under their election; a flat top-level
/// collection is accepted as a fallback for older election records.
pub async fn ensure_candidate_exists(
    store: &Store,
    election_id: &str,
    candidate_id: &str,
) -> Result<()> {
    let scoped = Election::candidate_path(election_id, candidate_id);
    if store.get::<Candidate>(&scoped).await?.is_some() {
        return Ok(());
    }
    let flat = format!("{CANDIDATES}/{candidate_id}");
    if store.get::<Candidate>(&flat).await?.is_some() {
        return Ok(());
    }
    Err(Error::NotFound(format!("Candidate '{candidate_id}'")))
}
