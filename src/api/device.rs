//! Device registration endpoint.

use data_encoding::BASE64;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::api::common::validate_id;
use crate::error::{Error, Result};
use crate::model::{auth::Subject, device};
use crate::store::Store;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub device_hash: String,
    /// SEC1 uncompressed P-256 point, base64.
    pub public_key: String,
}

#[derive(Debug, Serialize)]
pub struct DeviceRegistered {
    pub ok: bool,
}

#[post("/device/register", data = "<registration>", format = "json")]
pub async fn register_device(
    subject: Subject,
    store: Store,
    registration: Json<DeviceRegistration>,
) -> Result<Json<DeviceRegistered>> {
    register_device_inner(&subject, &store, &registration)
        .await
        .map(Json)
}

async fn register_device_inner(
    subject: &Subject,
    store: &Store,
    registration: &DeviceRegistration,
) -> Result<DeviceRegistered> {
    validate_id(&registration.device_hash, "device hash")?;
    if BASE64.decode(registration.public_key.as_bytes()).is_err() {
        return Err(Error::BadRequest(
            "Public key must be base64".to_string(),
        ));
    }

    device::bind_or_validate(
        store,
        &subject.id,
        &registration.device_hash,
        &registration.public_key,
    )
    .await?;
    Ok(DeviceRegistered { ok: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_store;

    fn subject() -> Subject {
        Subject {
            id: "subject-1".to_string(),
        }
    }

    #[rocket::async_test]
    async fn registers_a_device() {
        let store = memory_store();
        let registration = DeviceRegistration {
            device_hash: "fp-1".to_string(),
            public_key: BASE64.encode(b"a key"),
        };
        let response = register_device_inner(&subject(), &store, &registration)
            .await
            .unwrap();
        assert!(response.ok);
    }

    #[rocket::async_test]
    async fn rejects_malformed_input() {
        let store = memory_store();

        let registration = DeviceRegistration {
            device_hash: "fp/1".to_string(),
            public_key: BASE64.encode(b"a key"),
        };
        assert!(matches!(
            register_device_inner(&subject(), &store, &registration).await,
            Err(Error::BadRequest(_))
        ));

        let registration = DeviceRegistration {
            device_hash: "fp-1".to_string(),
            public_key: "not base64 !!!".to_string(),
        };
        assert!(matches!(
            register_device_inner(&subject(), &store, &registration).await,
            Err(Error::BadRequest(_))
        ));
    }
}
