//! Nonce issue and vote cast endpoints.
//!
//! Vote admission runs a fixed pipeline: field validation, device binding,
//! nonce, signature, election, candidate, then the atomic commit. Every
//! rejection happens before any write; the commit is the only mutation and
//! is all-or-nothing.

use chrono::{DateTime, Utc};
use data_encoding::BASE64;
use rocket::{serde::json::Json, State};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::common::{ensure_candidate_exists, open_election_by_id, validate_id};
use crate::config::Config;
use crate::crypto::sig;
use crate::error::{Error, Result};
use crate::model::{
    auth::Subject,
    device,
    nonce::{Nonce, NonceRejection},
    random_id, results,
    risk::{self, RiskType, Severity},
    vote::{self, Vote},
    voter::{Voter, VoterStatus},
};
use crate::store::{fields, to_fields, Precondition, Store, StoreError, Write};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceRequest {
    pub election_id: String,
    pub device_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceIssued {
    pub nonce_id: String,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastBallot {
    pub election_id: String,
    pub candidate_id: String,
    pub device_hash: String,
    pub nonce_id: String,
    /// Signature over the canonical vote message, base64, raw or DER.
    pub signature: String,
    #[serde(default)]
    pub biometric_verified: bool,
    #[serde(default)]
    pub liveness_verified: bool,
}

/// Tally movement caused by this vote, reported when the best-effort tally
/// update succeeded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallySnapshot {
    pub before: u64,
    pub delta: u64,
    pub after: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastAccepted {
    pub ok: bool,
    pub audit_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tally: Option<TallySnapshot>,
}

#[post("/vote/nonce", data = "<request>", format = "json")]
pub async fn issue_nonce(
    subject: Subject,
    store: Store,
    config: &State<Config>,
    request: Json<NonceRequest>,
) -> Result<Json<NonceIssued>> {
    issue_nonce_inner(&subject, &store, config, &request)
        .await
        .map(Json)
}

async fn issue_nonce_inner(
    subject: &Subject,
    store: &Store,
    config: &Config,
    request: &NonceRequest,
) -> Result<NonceIssued> {
    validate_id(&request.election_id, "election id")?;
    validate_id(&request.device_hash, "device hash")?;

    let voter = Voter::ensure(store, &subject.id).await?;
    voter.ensure_can_vote()?;
    device::ensure_bound_device(
        store,
        &voter,
        &subject.id,
        &request.device_hash,
        "Nonce requested from an unbound device",
    )
    .await?;
    open_election_by_id(store, &request.election_id).await?;

    let (nonce_id, nonce) = Nonce::new(
        &subject.id,
        &request.election_id,
        &request.device_hash,
        config.nonce_ttl(),
    );
    store.create_if_absent(&Nonce::path(&nonce_id), &nonce).await?;

    info!(
        "Issued vote nonce for subject {} in election {}",
        subject.id, request.election_id
    );
    Ok(NonceIssued {
        nonce_id,
        nonce: nonce.nonce,
        expires_at: nonce.expires_at,
    })
}

#[post("/vote/cast", data = "<ballot>", format = "json")]
pub async fn cast_vote(
    subject: Subject,
    store: Store,
    ballot: Json<CastBallot>,
) -> Result<Json<CastAccepted>> {
    cast_vote_inner(&subject, &store, &ballot).await.map(Json)
}

async fn cast_vote_inner(
    subject: &Subject,
    store: &Store,
    ballot: &CastBallot,
) -> Result<CastAccepted> {
    validate_id(&ballot.election_id, "election id")?;
    validate_id(&ballot.candidate_id, "candidate id")?;
    validate_id(&ballot.device_hash, "device hash")?;
    validate_id(&ballot.nonce_id, "nonce id")?;
    let signature = BASE64
        .decode(ballot.signature.as_bytes())
        .map_err(|_| Error::BadRequest("Signature must be base64".to_string()))?;
    if !ballot.biometric_verified || !ballot.liveness_verified {
        return Err(Error::Forbidden(
            "Biometric and liveness verification are required".to_string(),
        ));
    }

    let voter = Voter::ensure(store, &subject.id).await?;
    voter.ensure_can_vote()?;
    let public_key = device::ensure_bound_device(
        store,
        &voter,
        &subject.id,
        &ballot.device_hash,
        "Vote cast from an unbound device",
    )
    .await?;
    let public_key = BASE64
        .decode(public_key.as_bytes())
        .map_err(|_| Error::Conflict("Registered device key is malformed".to_string()))?;

    let (nonce, nonce_version) = store
        .get::<Nonce>(&Nonce::path(&ballot.nonce_id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("Nonce '{}'", ballot.nonce_id)))?;
    if let Err(rejection) = nonce.ensure_consumable(
        &subject.id,
        &ballot.election_id,
        &ballot.device_hash,
        Utc::now(),
    ) {
        // A spent nonce presented again is a replay signal, not user error.
        if rejection == NonceRejection::AlreadyUsed {
            risk::log(
                store,
                RiskType::NonceReplayed,
                Severity::High,
                &subject.id,
                &ballot.device_hash,
                "Attempted to consume an already-used nonce",
            )
            .await;
        }
        return Err(rejection.into());
    }

    let message = vote::vote_message(
        &nonce.nonce,
        &subject.id,
        &ballot.election_id,
        &ballot.candidate_id,
        &ballot.device_hash,
    );
    if !sig::verify(&public_key, message.as_bytes(), &signature) {
        risk::log(
            store,
            RiskType::InvalidSignature,
            Severity::Critical,
            &subject.id,
            &ballot.device_hash,
            "Vote signature verification failed",
        )
        .await;
        return Err(Error::Conflict("Invalid vote signature".to_string()));
    }

    open_election_by_id(store, &ballot.election_id).await?;
    ensure_candidate_exists(store, &ballot.election_id, &ballot.candidate_id).await?;

    let now = Utc::now();
    let audit_token = vote::audit_token(&ballot.election_id, &ballot.candidate_id, now);
    let record = Vote {
        uid: subject.id.clone(),
        election_id: ballot.election_id.clone(),
        candidate_id: ballot.candidate_id.clone(),
        device_hash: ballot.device_hash.clone(),
        nonce_id: ballot.nonce_id.clone(),
        signature: ballot.signature.clone(),
        audit_token: audit_token.clone(),
        created_at: now,
    };
    // The one atomic unit: the vote record's must-not-exist precondition is
    // the double-vote guard, the nonce's revision precondition is the
    // single-use guard. Either fails the whole batch.
    let writes = vec![
        Write::Create {
            path: Vote::path(&ballot.election_id, &subject.id),
            fields: to_fields(&record).map_err(StoreError::from)?,
        },
        Write::Update {
            path: Nonce::path(&ballot.nonce_id),
            fields: fields(json!({ "usedAt": now })),
            precondition: Precondition::Revision(nonce_version),
        },
        Write::Update {
            path: Voter::path(&subject.id),
            fields: fields(json!({
                "hasVoted": true,
                "status": VoterStatus::Voted,
                "lastVoteAt": now,
            })),
            precondition: Precondition::Exists,
        },
        Write::Create {
            path: format!("{}/{}", risk::AUDIT_EVENTS, random_id()),
            fields: fields(json!({
                "type": "vote_cast",
                "uid": subject.id,
                "electionId": ballot.election_id,
                "candidateId": ballot.candidate_id,
                "createdAt": now,
            })),
        },
    ];
    match store.commit(writes).await {
        Ok(()) => {}
        Err(StoreError::AlreadyExists) => {
            return Err(Error::Conflict(
                "You already voted in this election".to_string(),
            ))
        }
        Err(StoreError::PreconditionFailed) => {
            return Err(Error::Conflict("Nonce already used".to_string()))
        }
        Err(err) => return Err(err.into()),
    }

    // The vote is durable at this point; a failed tally update leaves the
    // tally stale, never the vote uncounted.
    let tally = match results::increment(store, &ballot.election_id, &ballot.candidate_id).await {
        Ok(total) => Some(TallySnapshot {
            before: total - 1,
            delta: 1,
            after: total,
        }),
        Err(err) => {
            risk::log(
                store,
                RiskType::ResultsUpdateFailed,
                Severity::Medium,
                &subject.id,
                &ballot.device_hash,
                &format!("Tally update failed after vote commit: {err}"),
            )
            .await;
            None
        }
    };

    info!(
        "Vote committed for subject {} in election {}",
        subject.id, ballot.election_id
    );
    Ok(CastAccepted {
        ok: true,
        audit_token,
        tally,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::results::Results;
    use crate::testing::{memory_store, seed_bound_voter, seed_open_election, TestKeypair};

    fn subject(id: &str) -> Subject {
        Subject { id: id.to_string() }
    }

    fn ballot(election: &str, candidate: &str, nonce_id: &str, signature: String) -> CastBallot {
        CastBallot {
            election_id: election.to_string(),
            candidate_id: candidate.to_string(),
            device_hash: "fp-1".to_string(),
            nonce_id: nonce_id.to_string(),
            signature,
            biometric_verified: true,
            liveness_verified: true,
        }
    }

    async fn setup() -> (Store, TestKeypair) {
        let store = memory_store();
        let key = TestKeypair::generate();
        seed_open_election(&store, "e1", &["alice", "bob"]).await;
        seed_bound_voter(&store, "v1", "fp-1", &key).await;
        (store, key)
    }

    async fn issue(store: &Store, uid: &str, election: &str) -> NonceIssued {
        let request = NonceRequest {
            election_id: election.to_string(),
            device_hash: "fp-1".to_string(),
        };
        issue_nonce_inner(&subject(uid), store, &Config::example(), &request)
            .await
            .unwrap()
    }

    fn sign(key: &TestKeypair, nonce: &str, uid: &str, election: &str, candidate: &str) -> String {
        key.sign_b64(&vote::vote_message(nonce, uid, election, candidate, "fp-1"))
    }

    #[rocket::async_test]
    async fn happy_path_commits_the_vote() {
        let (store, key) = setup().await;
        let issued = issue(&store, "v1", "e1").await;

        let signature = sign(&key, &issued.nonce, "v1", "e1", "alice");
        let accepted = cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "alice", &issued.nonce_id, signature),
        )
        .await
        .unwrap();

        assert!(accepted.ok);
        assert_eq!(accepted.audit_token.len(), 64);
        let tally = accepted.tally.unwrap();
        assert_eq!((tally.before, tally.delta, tally.after), (0, 1, 1));

        let (record, _) = store
            .get::<Vote>(&Vote::path("e1", "v1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.candidate_id, "alice");
        assert_eq!(record.audit_token, accepted.audit_token);

        let (nonce, _) = store
            .get::<Nonce>(&Nonce::path(&issued.nonce_id))
            .await
            .unwrap()
            .unwrap();
        assert!(nonce.used_at.is_some());

        let (voter, _) = store.get::<Voter>(&Voter::path("v1")).await.unwrap().unwrap();
        assert_eq!(voter.has_voted, Some(true));
        assert_eq!(voter.status, Some(VoterStatus::Voted));

        let (results, _) = store
            .get::<Results>(&Results::path("e1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(results.total_votes, 1);
    }

    #[rocket::async_test]
    async fn reusing_a_consumed_nonce_is_a_conflict() {
        let (store, key) = setup().await;
        let issued = issue(&store, "v1", "e1").await;

        let signature = sign(&key, &issued.nonce, "v1", "e1", "alice");
        cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "alice", &issued.nonce_id, signature.clone()),
        )
        .await
        .unwrap();

        let err = cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "alice", &issued.nonce_id, signature),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg.contains("already used")));

        let events = store
            .run_query(risk::RISK_EVENTS, "uid", "v1", 10)
            .await
            .unwrap();
        assert_eq!(
            events[0].1.get("type").and_then(|v| v.as_str()),
            Some("NONCE_REPLAYED")
        );
    }

    #[rocket::async_test]
    async fn second_vote_with_a_fresh_nonce_is_already_voted() {
        let (store, key) = setup().await;

        let issued = issue(&store, "v1", "e1").await;
        let signature = sign(&key, &issued.nonce, "v1", "e1", "alice");
        cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "alice", &issued.nonce_id, signature),
        )
        .await
        .unwrap();

        let issued = issue(&store, "v1", "e1").await;
        let signature = sign(&key, &issued.nonce, "v1", "e1", "bob");
        let err = cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "bob", &issued.nonce_id, signature),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg.contains("already voted")));

        // The first vote is untouched.
        let (record, _) = store
            .get::<Vote>(&Vote::path("e1", "v1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.candidate_id, "alice");
    }

    #[rocket::async_test]
    async fn expired_nonce_is_a_conflict() {
        let (store, key) = setup().await;

        let (nonce_id, mut nonce) =
            Nonce::new("v1", "e1", "fp-1", chrono::Duration::minutes(3));
        nonce.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store
            .create_if_absent(&Nonce::path(&nonce_id), &nonce)
            .await
            .unwrap();

        let signature = sign(&key, &nonce.nonce, "v1", "e1", "alice");
        let err = cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "alice", &nonce_id, signature),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg.contains("expired")));
    }

    #[rocket::async_test]
    async fn invalid_signature_is_rejected_with_a_risk_event() {
        let (store, key) = setup().await;
        let issued = issue(&store, "v1", "e1").await;

        // Signed for a different candidate than the ballot names.
        let signature = sign(&key, &issued.nonce, "v1", "e1", "bob");
        let err = cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "alice", &issued.nonce_id, signature),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg.contains("signature")));

        let events = store
            .run_query(risk::RISK_EVENTS, "uid", "v1", 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].1.get("type").and_then(|v| v.as_str()),
            Some("INVALID_SIGNATURE")
        );

        // No vote was written.
        assert!(store.get::<Vote>(&Vote::path("e1", "v1")).await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn closed_election_rejects_nonce_issue_and_cast() {
        let (store, key) = setup().await;
        store
            .create_if_absent("elections/e2", &json!({ "status": "closed" }))
            .await
            .unwrap();

        let request = NonceRequest {
            election_id: "e2".to_string(),
            device_hash: "fp-1".to_string(),
        };
        let err = issue_nonce_inner(&subject("v1"), &store, &Config::example(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg.contains("not open")));

        // A directly seeded nonce cannot sidestep the election check.
        let (nonce_id, nonce) = Nonce::new("v1", "e2", "fp-1", chrono::Duration::minutes(3));
        store
            .create_if_absent(&Nonce::path(&nonce_id), &nonce)
            .await
            .unwrap();
        let signature = key.sign_b64(&vote::vote_message(&nonce.nonce, "v1", "e2", "alice", "fp-1"));
        let err = cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e2", "alice", &nonce_id, signature),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg.contains("not open")));
    }

    #[rocket::async_test]
    async fn unknown_election_and_candidate_are_not_found() {
        let (store, key) = setup().await;

        let request = NonceRequest {
            election_id: "missing".to_string(),
            device_hash: "fp-1".to_string(),
        };
        let err = issue_nonce_inner(&subject("v1"), &store, &Config::example(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let issued = issue(&store, "v1", "e1").await;
        let signature = sign(&key, &issued.nonce, "v1", "e1", "nobody");
        let err = cast_vote_inner(
            &subject("v1"),
            &store,
            &ballot("e1", "nobody", &issued.nonce_id, signature),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[rocket::async_test]
    async fn unverified_voter_cannot_get_a_nonce() {
        let store = memory_store();
        seed_open_election(&store, "e1", &["alice"]).await;

        // First contact creates an unverified record.
        let request = NonceRequest {
            election_id: "e1".to_string(),
            device_hash: "fp-1".to_string(),
        };
        let err = issue_nonce_inner(&subject("fresh"), &store, &Config::example(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(store.get::<Voter>(&Voter::path("fresh")).await.unwrap().is_some());
    }

    #[rocket::async_test]
    async fn missing_liveness_flags_are_forbidden() {
        let (store, _) = setup().await;
        let mut attempt = ballot("e1", "alice", "n1", BASE64.encode(b"sig"));
        attempt.liveness_verified = false;
        let err = cast_vote_inner(&subject("v1"), &store, &attempt).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn concurrent_casts_with_the_same_nonce_consume_it_once() {
        let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (store, key) = setup().await;
            let issued = issue(&store, "v1", "e1").await;
            let signature = sign(&key, &issued.nonce, "v1", "e1", "alice");

            let mut tasks = Vec::new();
            for _ in 0..2 {
                let store = store.clone();
                let attempt = ballot("e1", "alice", &issued.nonce_id, signature.clone());
                tasks.push(rocket::tokio::spawn(async move {
                    cast_vote_inner(&subject("v1"), &store, &attempt).await
                }));
            }

            let mut accepted = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => accepted += 1,
                    Err(Error::Conflict(_)) => {}
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            assert_eq!(accepted, 1);

            let (nonce, _) = store
                .get::<Nonce>(&Nonce::path(&issued.nonce_id))
                .await
                .unwrap()
                .unwrap();
            assert!(nonce.used_at.is_some());
            let (results, _) = store
                .get::<Results>(&Results::path("e1"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(results.total_votes, 1);
        });
    }

    #[test]
    fn concurrent_casts_commit_exactly_one_vote() {
        let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (store, key) = setup().await;
            let key = Arc::new(key);

            let mut tasks = Vec::new();
            for candidate in ["alice", "bob"] {
                let issued = issue(&store, "v1", "e1").await;
                let store = store.clone();
                let signature = sign(&key, &issued.nonce, "v1", "e1", candidate);
                let attempt = ballot("e1", candidate, &issued.nonce_id, signature);
                tasks.push(rocket::tokio::spawn(async move {
                    cast_vote_inner(&subject("v1"), &store, &attempt).await
                }));
            }

            let mut accepted = 0;
            let mut conflicts = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => accepted += 1,
                    Err(Error::Conflict(_)) => conflicts += 1,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            assert_eq!((accepted, conflicts), (1, 1));

            let (results, _) = store
                .get::<Results>(&Results::path("e1"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(results.total_votes, 1);
        });
    }
}
