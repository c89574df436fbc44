//! Document store backed by the Firestore REST API.
//!
//! Documents are plain JSON on our side; this module translates to and from
//! Firestore's typed value representation and maps its error statuses onto
//! [`StoreError`]. The document `updateTime` doubles as the revision token.

use serde_json::{json, Value};

use super::{
    auth::{AccessTokenCache, ServiceCredentials},
    DocumentStore, Fields, Precondition, StoreError, Version, Write,
};

const API_BASE: &str = "https://firestore.googleapis.com/v1";

pub struct FirestoreStore {
    http: reqwest::Client,
    auth: AccessTokenCache,
    project_id: String,
}

impl FirestoreStore {
    pub fn new(credentials: ServiceCredentials) -> Result<Self, jsonwebtoken::errors::Error> {
        let project_id = credentials.project_id.clone();
        Ok(Self {
            http: reqwest::Client::new(),
            auth: AccessTokenCache::new(credentials)?,
            project_id,
        })
    }

    /// Fully-qualified document name, as used inside commit writes.
    fn document_name(&self, path: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/{path}",
            self.project_id
        )
    }

    fn document_url(&self, path: &str) -> String {
        format!("{API_BASE}/{}", self.document_name(path))
    }

    fn root_url(&self) -> String {
        format!(
            "{API_BASE}/projects/{}/databases/(default)/documents",
            self.project_id
        )
    }

    async fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, StoreError> {
        let token = self.auth.token(&self.http).await?;
        Ok(builder.bearer_auth(token))
    }

    fn encode_write(&self, write: &Write) -> Value {
        match write {
            Write::Create { path, fields } => json!({
                "update": {
                    "name": self.document_name(path),
                    "fields": encode_fields(fields),
                },
                "currentDocument": { "exists": false },
            }),
            Write::Update {
                path,
                fields,
                precondition,
            } => json!({
                "update": {
                    "name": self.document_name(path),
                    "fields": encode_fields(fields),
                },
                "updateMask": { "fieldPaths": fields.keys().collect::<Vec<_>>() },
                "currentDocument": match precondition {
                    Precondition::Exists => json!({ "exists": true }),
                    Precondition::Revision(version) => json!({ "updateTime": version.as_str() }),
                },
            }),
        }
    }
}

#[rocket::async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, path: &str) -> Result<Option<(Fields, Version)>, StoreError> {
        let request = self.http.get(self.document_url(path));
        let response = self.authorized(request).await?.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc = check_response(response).await?;

        let fields = doc
            .get("fields")
            .map(decode_fields)
            .unwrap_or_default();
        let version = doc
            .get("updateTime")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(Some((fields, Version::new(version))))
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
        let body = json!({
            "writes": writes.iter().map(|write| self.encode_write(write)).collect::<Vec<_>>(),
        });
        let request = self
            .http
            .post(format!("{}:commit", self.root_url()))
            .json(&body);
        let response = self.authorized(request).await?.send().await?;
        check_response(response).await?;
        Ok(())
    }

    async fn run_query(
        &self,
        collection: &str,
        field: &str,
        equals: &str,
        limit: u32,
    ) -> Result<Vec<(String, Fields)>, StoreError> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": { "stringValue": equals },
                    },
                },
                "limit": limit,
            },
        });
        let request = self
            .http
            .post(format!("{}:runQuery", self.root_url()))
            .json(&body);
        let response = self.authorized(request).await?.send().await?;
        let results = check_response(response).await?;

        let mut documents = Vec::new();
        for entry in results.as_array().into_iter().flatten() {
            let Some(doc) = entry.get("document") else {
                // Trailing entries carry query metadata only.
                continue;
            };
            let id = doc
                .get("name")
                .and_then(Value::as_str)
                .and_then(|name| name.rsplit('/').next())
                .unwrap_or_default()
                .to_string();
            let fields = doc.get("fields").map(decode_fields).unwrap_or_default();
            documents.push((id, fields));
        }
        Ok(documents)
    }
}

/// Map an API response onto our error taxonomy, distinguishing the two
/// precondition outcomes (correctness signals) from transport failures.
async fn check_response(response: reqwest::Response) -> Result<Value, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    let code = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| {
            // Batch responses nest the error one level down.
            let error = value
                .pointer("/error/status")
                .or_else(|| value.pointer("/0/error/status"))?;
            error.as_str().map(str::to_owned)
        })
        .unwrap_or_default();
    match code.as_str() {
        "ALREADY_EXISTS" => Err(StoreError::AlreadyExists),
        "FAILED_PRECONDITION" | "ABORTED" | "NOT_FOUND" => Err(StoreError::PreconditionFailed),
        _ => Err(StoreError::Api(status.as_u16(), body)),
    }
}

fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(key, value)| (key.clone(), encode_value(value)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        // Firestore transports integers as decimal strings.
        Value::Number(number) => match number.as_i64() {
            Some(int) => json!({ "integerValue": int.to_string() }),
            None => json!({ "doubleValue": number.as_f64() }),
        },
        Value::String(string) => json!({ "stringValue": string }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() },
        }),
        Value::Object(map) => json!({
            "mapValue": {
                "fields": Value::Object(
                    map.iter().map(|(key, value)| (key.clone(), encode_value(value))).collect(),
                ),
            },
        }),
    }
}

fn decode_fields(fields: &Value) -> Fields {
    fields
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, value)| (key.clone(), decode_value(value)))
                .collect()
        })
        .unwrap_or_default()
}

fn decode_value(value: &Value) -> Value {
    let Some(map) = value.as_object() else {
        return Value::Null;
    };
    if let Some(string) = map.get("stringValue").or_else(|| map.get("timestampValue")) {
        return string.clone();
    }
    if let Some(flag) = map.get("booleanValue") {
        return flag.clone();
    }
    if let Some(int) = map.get("integerValue") {
        if let Some(int) = int.as_str().and_then(|raw| raw.parse::<i64>().ok()) {
            return json!(int);
        }
        return int.clone();
    }
    if let Some(double) = map.get("doubleValue") {
        return double.clone();
    }
    if let Some(array) = map.get("arrayValue") {
        let values = array
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(nested) = map.get("mapValue") {
        return Value::Object(
            nested
                .get("fields")
                .map(decode_fields)
                .unwrap_or_default(),
        );
    }
    Value::Null
}
