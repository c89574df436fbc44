//! Vote-casting core of the election platform: device binding, single-use
//! vote nonces, device-signature verification and the atomic vote commit.
//! Identity, election administration and the public results feed live in
//! other services; this crate owns the trust boundary a ballot crosses.

#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;

use config::{ConfigFairing, StoreFairing};
use logging::LoggerFairing;
use store::Store;

/// The production server: config from `Rocket.toml`/`ROCKET_*`, the
/// Firestore-backed document store from the configured credentials.
pub fn build() -> Rocket<Build> {
    rocket_base(rocket::build()).attach(StoreFairing)
}

/// A server over an already-constructed store handle. The test suite uses
/// this with the in-memory store.
pub fn rocket_with_store(rocket: Rocket<Build>, store: Store) -> Rocket<Build> {
    rocket_base(rocket).manage(store)
}

fn rocket_base(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/v1", api::routes())
        .attach(ConfigFairing)
        .attach(LoggerFairing)
}
