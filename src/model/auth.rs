//! The identity-provider boundary.
//!
//! Token issuance and account lookup live in an external identity provider;
//! all this core consumes is the verification of a bearer token into a
//! stable subject id.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
    State,
};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::Error};

/// The authenticated subject of a request, as attested by the identity
/// provider's bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
}

/// Claims we require from the identity provider's tokens.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

impl Subject {
    /// Verify a bearer token and extract the subject id.
    pub fn from_bearer(token: &str, config: &Config) -> Result<Self, Error> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(Self {
            id: data.claims.sub,
        })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Subject {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let header = match req.headers().get_one("Authorization") {
            Some(header) => header,
            None => {
                return request::Outcome::Failure((
                    Status::Unauthorized,
                    Error::Unauthorized("Missing bearer token".to_string()),
                ))
            }
        };
        let token = match header.strip_prefix("Bearer ") {
            Some(token) => token,
            None => {
                return request::Outcome::Failure((
                    Status::Unauthorized,
                    Error::Unauthorized("Malformed Authorization header".to_string()),
                ))
            }
        };

        match Subject::from_bearer(token, config) {
            Ok(subject) => request::Outcome::Success(subject),
            Err(err) => request::Outcome::Failure((Status::Unauthorized, err)),
        }
    }
}

#[cfg(test)]
impl Subject {
    /// A bearer token that [`Subject::from_bearer`] will accept.
    pub fn bearer_for(id: &str, config: &Config) -> String {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = Claims {
            sub: id.to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as u64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings")
    }
}
