//! Shared fixtures for the test suite.

use std::sync::Arc;

use data_encoding::BASE64;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde_json::json;

use crate::model::{device::DeviceBinding, election::Election, voter::Voter};
use crate::store::{MemoryStore, Store};

pub fn memory_store() -> Store {
    Store::new(Arc::new(MemoryStore::new()))
}

/// A device keypair as the client app would hold it.
pub struct TestKeypair {
    signing: SigningKey,
    /// SEC1 uncompressed point, base64, as sent to `/device/register`.
    pub public_key_b64: String,
}

impl TestKeypair {
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut rand::rngs::OsRng);
        let public_key_b64 = BASE64.encode(
            signing
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes(),
        );
        Self {
            signing,
            public_key_b64,
        }
    }

    /// Sign a message the way the device does: raw `r ‖ s`, base64.
    pub fn sign_b64(&self, message: &str) -> String {
        let signature: Signature = self.signing.sign(message.as_bytes());
        BASE64.encode(&signature.to_bytes())
    }
}

/// An election in the explicit `open` state, with its candidates.
pub async fn seed_open_election(store: &Store, election_id: &str, candidates: &[&str]) {
    store
        .create_if_absent(
            &Election::path(election_id),
            &json!({ "status": "open", "name": format!("Election {election_id}") }),
        )
        .await
        .expect("seeding an election");
    for candidate in candidates {
        store
            .create_if_absent(
                &Election::candidate_path(election_id, candidate),
                &json!({ "name": candidate }),
            )
            .await
            .expect("seeding a candidate");
    }
}

/// A verified voter with both sides of the device binding in place.
pub async fn seed_bound_voter(store: &Store, uid: &str, fingerprint: &str, key: &TestKeypair) {
    store
        .create_if_absent(
            &Voter::path(uid),
            &Voter::eligible_example(fingerprint, &key.public_key_b64),
        )
        .await
        .expect("seeding a voter");
    store
        .create_if_absent(
            &DeviceBinding::path(fingerprint),
            &json!({ "uid": uid, "publicKey": key.public_key_b64 }),
        )
        .await
        .expect("seeding a device binding");
}
