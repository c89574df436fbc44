use std::sync::Arc;

use chrono::Duration;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::store::{FirestoreStore, ServiceCredentials, Store};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    nonce_ttl: u32,
    // secrets
    jwt_secret: String,
}

impl Config {
    /// Valid lifetime of a vote nonce in seconds.
    pub fn nonce_ttl(&self) -> Duration {
        Duration::seconds(self.nonce_ttl.into())
    }

    /// Secret key used to verify the identity provider's bearer tokens.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

#[cfg(test)]
impl Config {
    pub fn example() -> Self {
        Self {
            nonce_ttl: 180,
            jwt_secret: "test-secret".to_string(),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the document store.
#[derive(Deserialize)]
struct StoreConfig {
    // secrets
    store_credentials: String,
}

/// A fairing that loads the store config, builds the Firestore-backed
/// document store, and places a [`Store`] handle into managed state.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Document store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let raw = match std::fs::read_to_string(&config.store_credentials) {
            Ok(raw) => raw,
            Err(e) => {
                error!(
                    "Failed to read store credentials from {}: {e}",
                    config.store_credentials
                );
                return Err(rocket);
            }
        };
        let credentials: ServiceCredentials = match serde_json::from_str(&raw) {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Failed to parse store credentials: {e}");
                return Err(rocket);
            }
        };

        let store = match FirestoreStore::new(credentials) {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to load store signing key: {e}");
                return Err(rocket);
            }
        };
        info!("Document store configured");

        rocket = rocket.manage(Store::new(Arc::new(store)));
        Ok(rocket)
    }
}
