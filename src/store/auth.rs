//! Access-token handling for the remote store.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rocket::tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use super::StoreError;

const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Service-account credentials, in the JSON layout the store's console
/// issues them in.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCredentials {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Cache for the store's OAuth access token. One instance lives inside each
/// [`FirestoreStore`](super::FirestoreStore); it is deliberately not
/// process-global, so tests and multiple stores stay independent.
pub struct AccessTokenCache {
    credentials: ServiceCredentials,
    signing_key: EncodingKey,
    cached: RwLock<Option<(String, DateTime<Utc>)>>,
}

impl AccessTokenCache {
    pub fn new(credentials: ServiceCredentials) -> Result<Self, jsonwebtoken::errors::Error> {
        let signing_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())?;
        Ok(Self {
            credentials,
            signing_key,
            cached: RwLock::new(None),
        })
    }

    /// The current access token, refreshed through the token endpoint when
    /// missing or stale.
    pub async fn token(&self, http: &reqwest::Client) -> Result<String, StoreError> {
        if let Some((token, fresh_until)) = self.cached.read().await.as_ref() {
            if *fresh_until > Utc::now() {
                return Ok(token.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some((token, fresh_until)) = slot.as_ref() {
            if *fresh_until > Utc::now() {
                return Ok(token.clone());
            }
        }

        let now = Utc::now();
        let claims = AssertionClaims {
            iss: &self.credentials.client_email,
            scope: TOKEN_SCOPE,
            aud: &self.credentials.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|err| StoreError::Auth(format!("failed to sign token assertion: {err}")))?;

        let response = http
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        let token: TokenResponse = response.json().await?;

        let fresh_until = now + Duration::seconds(token.expires_in - EXPIRY_MARGIN_SECS);
        debug!("Refreshed store access token, fresh until {fresh_until}");
        *slot = Some((token.access_token.clone(), fresh_until));
        Ok(token.access_token)
    }
}
