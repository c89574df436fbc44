//! In-memory document store with the same conditional-write semantics as the
//! remote one. The test suite runs against this, the way the production code
//! runs against Firestore.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{DocumentStore, Fields, Precondition, StoreError, Version, Write};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Document path -> (fields, revision).
    documents: BTreeMap<String, (Fields, u64)>,
    /// Monotonic revision counter standing in for the store's update time.
    revision: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    /// Validate a write's precondition without applying it.
    fn check(&self, write: &Write) -> Result<(), StoreError> {
        match write {
            Write::Create { path, .. } => {
                if self.documents.contains_key(path) {
                    return Err(StoreError::AlreadyExists);
                }
            }
            Write::Update {
                path, precondition, ..
            } => {
                let (_, revision) = self
                    .documents
                    .get(path)
                    .ok_or(StoreError::PreconditionFailed)?;
                if let Precondition::Revision(expected) = precondition {
                    if expected.as_str() != revision.to_string() {
                        return Err(StoreError::PreconditionFailed);
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a write whose precondition has been checked.
    fn apply(&mut self, write: Write) {
        self.revision += 1;
        match write {
            Write::Create { path, fields } => {
                self.documents.insert(path, (fields, self.revision));
            }
            Write::Update { path, fields, .. } => {
                let (existing, revision) = self
                    .documents
                    .get_mut(&path)
                    .expect("write was checked before applying");
                for (key, value) in fields {
                    existing.insert(key, value);
                }
                *revision = self.revision;
            }
        }
    }
}

#[rocket::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<(Fields, Version)>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .documents
            .get(path)
            .map(|(fields, revision)| (fields.clone(), Version::new(revision.to_string()))))
    }

    async fn create_if_absent(&self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.commit(vec![Write::Create {
            path: path.to_string(),
            fields,
        }])
        .await
    }

    async fn conditional_update(
        &self,
        path: &str,
        fields: Fields,
        precondition: Precondition,
    ) -> Result<(), StoreError> {
        self.commit(vec![Write::Update {
            path: path.to_string(),
            fields,
            precondition,
        }])
        .await
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        // Check everything before touching anything: a failed batch must
        // leave no partial writes behind.
        for write in &writes {
            inner.check(write)?;
        }
        for write in writes {
            inner.apply(write);
        }
        Ok(())
    }

    async fn run_query(
        &self,
        collection: &str,
        field: &str,
        equals: &str,
        limit: u32,
    ) -> Result<Vec<(String, Fields)>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let prefix = format!("{collection}/");
        let matches = inner
            .documents
            .iter()
            .filter_map(|(path, (fields, _))| {
                let id = path.strip_prefix(&prefix)?;
                // Direct children only; nested collections have their own ids.
                if id.contains('/') {
                    return None;
                }
                (fields.get(field)?.as_str()? == equals).then(|| (id.to_string(), fields.clone()))
            })
            .take(limit as usize)
            .collect();
        Ok(matches)
    }
}
