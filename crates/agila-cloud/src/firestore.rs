//! Account lookups and face-registration flags in Firestore.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::TokenSource;
use crate::error::CloudError;

/// An account document found by email.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Full resource name: `projects/{p}/databases/(default)/documents/...`.
    pub document: String,
    /// The `role` field, trimmed; `None` when absent, null or blank.
    pub role: Option<String>,
}

/// The document store holding user accounts.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// First account (in any `accounts` collection) whose `email` equals `email`.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, CloudError>;

    /// Set `faceRegistered = true` and `faceImageURLs = image_urls`, leaving
    /// other fields untouched.
    async fn mark_face_registered(
        &self,
        account: &Account,
        image_urls: &[String],
    ) -> Result<(), CloudError>;
}

/// Firestore REST client scoped to one project and collection id.
pub struct Firestore {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    collection: String,
    tokens: Arc<TokenSource>,
}

#[derive(Deserialize)]
struct RunQueryItem {
    document: Option<Document>,
}

#[derive(Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

impl Firestore {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        collection: impl Into<String>,
        tokens: Arc<TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            collection: collection.into(),
            tokens,
        }
    }

    fn run_query_endpoint(&self) -> String {
        format!(
            "{}/v1/projects/{}/databases/(default)/documents:runQuery",
            self.base_url, self.project_id
        )
    }
}

#[async_trait]
impl AccountDirectory for Firestore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, CloudError> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .post(self.run_query_endpoint())
            .bearer_auth(token)
            .json(&email_query(&self.collection, email))
            .send()
            .await?;
        let items: Vec<RunQueryItem> = CloudError::check("firestore", response).await?.json().await?;

        let account = items.into_iter().find_map(|item| item.document).map(|doc| Account {
            role: doc.fields.get("role").and_then(field_as_string),
            document: doc.name,
        });
        tracing::debug!(email, found = account.is_some(), "account lookup");
        Ok(account)
    }

    async fn mark_face_registered(
        &self,
        account: &Account,
        image_urls: &[String],
    ) -> Result<(), CloudError> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .patch(format!("{}/v1/{}", self.base_url, account.document))
            .query(&[
                ("updateMask.fieldPaths", "faceRegistered"),
                ("updateMask.fieldPaths", "faceImageURLs"),
                ("currentDocument.exists", "true"),
            ])
            .bearer_auth(token)
            .json(&face_registration_fields(image_urls))
            .send()
            .await?;
        CloudError::check("firestore", response).await?;

        tracing::debug!(document = %account.document, urls = image_urls.len(), "marked face registered");
        Ok(())
    }
}

/// Collection-group query: `email == <email>` over every `collection`, limit 1.
fn email_query(collection: &str, email: &str) -> Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection, "allDescendants": true }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": "email" },
                    "op": "EQUAL",
                    "value": { "stringValue": email }
                }
            },
            "limit": 1
        }
    })
}

fn face_registration_fields(image_urls: &[String]) -> Value {
    let values: Vec<Value> = image_urls.iter().map(|u| json!({ "stringValue": u })).collect();
    json!({
        "fields": {
            "faceRegistered": { "booleanValue": true },
            "faceImageURLs": { "arrayValue": { "values": values } }
        }
    })
}

/// Render a Firestore typed value as a trimmed string; blank and null are `None`.
fn field_as_string(value: &Value) -> Option<String> {
    let (kind, inner) = value.as_object()?.iter().next()?;
    let text = match (kind.as_str(), inner) {
        ("nullValue", _) => return None,
        (_, Value::String(s)) => s.clone(),
        (_, other) => other.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_query_shape() {
        let q = email_query("accounts", "ana@school.edu");
        let sq = &q["structuredQuery"];
        assert_eq!(sq["from"][0]["collectionId"], "accounts");
        assert_eq!(sq["from"][0]["allDescendants"], true);
        assert_eq!(sq["where"]["fieldFilter"]["op"], "EQUAL");
        assert_eq!(sq["where"]["fieldFilter"]["value"]["stringValue"], "ana@school.edu");
        assert_eq!(sq["limit"], 1);
    }

    #[test]
    fn test_face_registration_fields() {
        let body = face_registration_fields(&["https://a/1.jpg".into(), "https://a/2.jpg".into()]);
        assert_eq!(body["fields"]["faceRegistered"]["booleanValue"], true);
        let values = body["fields"]["faceImageURLs"]["arrayValue"]["values"]
            .as_array()
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["stringValue"], "https://a/2.jpg");
    }

    #[test]
    fn test_field_as_string() {
        assert_eq!(field_as_string(&json!({"stringValue": " Student "})), Some("Student".into()));
        assert_eq!(field_as_string(&json!({"stringValue": "  "})), None);
        assert_eq!(field_as_string(&json!({"nullValue": null})), None);
        assert_eq!(field_as_string(&json!({"integerValue": "3"})), Some("3".into()));
        assert_eq!(field_as_string(&json!({"booleanValue": true})), Some("true".into()));
        assert_eq!(field_as_string(&json!("bare")), None);
    }

    #[test]
    fn test_run_query_response_without_document() {
        let items: Vec<RunQueryItem> =
            serde_json::from_str(r#"[{"readTime":"2025-01-01T00:00:00Z"}]"#).unwrap();
        assert!(items.into_iter().find_map(|i| i.document).is_none());
    }

    #[test]
    fn test_run_query_endpoint() {
        let fs = Firestore::new(
            reqwest::Client::new(),
            "https://firestore.googleapis.com/",
            "agila-c10a4",
            "accounts",
            Arc::new(TokenSource::fixed("t")),
        );
        assert_eq!(
            fs.run_query_endpoint(),
            "https://firestore.googleapis.com/v1/projects/agila-c10a4/databases/(default)/documents:runQuery"
        );
    }
}
