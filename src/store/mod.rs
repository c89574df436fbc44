//! The narrow interface to the remote document store.
//!
//! Everything the vote core needs from storage is single-document reads and
//! conditionally-applied writes; `commit` is the one batch operation and is
//! all-or-nothing. All cross-request coordination happens through these
//! primitives, never through in-process state.

use std::ops::Deref;
use std::sync::Arc;

use rocket::{
    request::{self, FromRequest, Request},
    State,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

mod auth;
mod firestore;
mod memory;
mod retry;

pub use auth::{AccessTokenCache, ServiceCredentials};
pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use retry::with_optimistic_retry;

/// The field map of a document, as plain JSON.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Opaque revision token issued by the store for a document. Conditional
/// writes compare it, nothing else inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A `create_if_absent` target already exists.
    #[error("Document already exists")]
    AlreadyExists,
    /// A conditional write observed a different revision than expected.
    #[error("Write precondition failed")]
    PreconditionFailed,
    #[error("Malformed document: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Store authentication failed: {0}")]
    Auth(String),
    #[error("Store rejected request with status {0}: {1}")]
    Api(u16, String),
}

/// Precondition attached to an update write.
#[derive(Debug, Clone)]
pub enum Precondition {
    /// The document must exist, at any revision.
    Exists,
    /// The document must still be at the given revision.
    Revision(Version),
}

/// A single write within an atomic batch.
#[derive(Debug, Clone)]
pub enum Write {
    /// Create the document; fails if it already exists.
    Create { path: String, fields: Fields },
    /// Merge the fields into an existing document, subject to the
    /// precondition.
    Update {
        path: String,
        fields: Fields,
        precondition: Precondition,
    },
}

/// A document store. Each operation is independently atomic; no
/// multi-operation transactions are assumed beyond the `commit` batch.
#[rocket::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document and its current revision.
    async fn get(&self, path: &str) -> Result<Option<(Fields, Version)>, StoreError>;

    /// Create a document that must not exist yet.
    async fn create_if_absent(&self, path: &str, fields: Fields) -> Result<(), StoreError>;

    /// Merge fields into an existing document, subject to the precondition.
    async fn conditional_update(
        &self,
        path: &str,
        fields: Fields,
        precondition: Precondition,
    ) -> Result<(), StoreError>;

    /// Apply a batch of writes all-or-nothing. Any violated precondition
    /// fails the whole batch with no partial effects.
    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError>;

    /// Equality lookup over a collection. Used for lookups only, never on
    /// the commit path.
    async fn run_query(
        &self,
        collection: &str,
        field: &str,
        equals: &str,
        limit: u32,
    ) -> Result<Vec<(String, Fields)>, StoreError>;
}

/// Handle on the document store with typed serde helpers. Available to
/// endpoints as a request guard, like a database collection.
#[derive(Clone)]
pub struct Store(Arc<dyn DocumentStore>);

impl Store {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self(inner)
    }

    /// Fetch and deserialize a document.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<(T, Version)>, StoreError> {
        match self.0.get(path).await? {
            Some((fields, version)) => {
                let doc = serde_json::from_value(serde_json::Value::Object(fields))?;
                Ok(Some((doc, version)))
            }
            None => Ok(None),
        }
    }

    /// Serialize and create a document that must not exist yet.
    pub async fn create_if_absent<T: Serialize>(
        &self,
        path: &str,
        doc: &T,
    ) -> Result<(), StoreError> {
        self.0.create_if_absent(path, to_fields(doc)?).await
    }

    pub async fn conditional_update(
        &self,
        path: &str,
        fields: Fields,
        precondition: Precondition,
    ) -> Result<(), StoreError> {
        self.0.conditional_update(path, fields, precondition).await
    }

    pub async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        self.0.commit(writes).await
    }

    pub async fn run_query(
        &self,
        collection: &str,
        field: &str,
        equals: &str,
        limit: u32,
    ) -> Result<Vec<(String, Fields)>, StoreError> {
        self.0.run_query(collection, field, equals, limit).await
    }
}

impl Deref for Store {
    type Target = dyn DocumentStore;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Store {
    type Error = ();

    /// Get the store handle from the managed state.
    ///
    /// Panics iff the [`Store`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let store = req.guard::<&State<Store>>().await.unwrap();
        request::Outcome::Success(store.inner().clone())
    }
}

/// Serialize a document into its field map.
pub fn to_fields<T: Serialize>(doc: &T) -> Result<Fields, serde_json::Error> {
    use serde::ser::Error as _;
    match serde_json::to_value(doc)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(serde_json::Error::custom(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Build a field map from a `serde_json::json!` object literal.
pub fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("callers pass object literals"),
    }
}
