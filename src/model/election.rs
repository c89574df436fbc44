//! Read-side view of elections and candidates.
//!
//! Election administration lives elsewhere on the platform; this core only
//! needs to decide whether an election is currently accepting votes and
//! whether a candidate exists in it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ELECTIONS: &str = "elections";
pub const CANDIDATES: &str = "candidates";

/// Election lifecycle states as written by the administration tools.
/// Unknown values deserialize rather than fail, and defer to the time
/// window like an absent status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionState {
    Open,
    Live,
    Active,
    Closed,
    Archived,
    Draft,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ElectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opens_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closes_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Election {
    pub fn path(election_id: &str) -> String {
        format!("{ELECTIONS}/{election_id}")
    }

    pub fn candidate_path(election_id: &str, candidate_id: &str) -> String {
        format!("{ELECTIONS}/{election_id}/{CANDIDATES}/{candidate_id}")
    }

    /// Whether the election accepts votes at `now`. A recognized status
    /// takes precedence; an absent or unrecognized one defers to the time
    /// window, and with neither signal the election is closed.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            Some(ElectionState::Open | ElectionState::Live | ElectionState::Active) => return true,
            Some(ElectionState::Closed | ElectionState::Archived | ElectionState::Draft) => {
                return false
            }
            Some(ElectionState::Unknown) | None => {}
        }
        match (self.opens_at, self.closes_at) {
            (Some(opens), Some(closes)) => opens <= now && now <= closes,
            _ => false,
        }
    }
}

/// A candidate record. Only existence matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub name: Option<String>,
}
