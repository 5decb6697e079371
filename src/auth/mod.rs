//! Examinee authentication against a remote document store.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// True only when a record for `full_name` exists and its password
    /// matches exactly. Every failure reads as `false`.
    async fn authenticate(&self, full_name: &str, password: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    fields: HashMap<String, serde_json::Value>,
}

/// Looks up `{collection}/{full name}` through the Firestore REST API.
pub struct FirestoreAuthenticator {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    api_key: Option<String>,
    collection: String,
    password_field: String,
}

impl FirestoreAuthenticator {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        info!(
            "Initialized document store auth: {} (project {}, collection {})",
            config.endpoint, config.project_id, config.collection
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            project_id: config.project_id.clone(),
            api_key: config.resolved_api_key(),
            collection: config.collection.clone(),
            password_field: config.password_field.clone(),
        })
    }

    fn document_url(&self, full_name: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid auth endpoint: {}", self.endpoint))?;

        url.path_segments_mut()
            .map_err(|_| anyhow!("Auth endpoint cannot be a base URL: {}", self.endpoint))?
            .pop_if_empty()
            .extend([
                "projects",
                self.project_id.as_str(),
                "databases",
                "(default)",
                "documents",
                self.collection.as_str(),
                full_name,
            ]);

        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }

        Ok(url)
    }

    /// The stored password, or `None` when no record exists.
    async fn stored_password(&self, full_name: &str) -> Result<Option<String>> {
        let url = self.document_url(full_name)?;
        debug!("Fetching examinee record {}", full_name);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach document store")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Document store request failed with status {}: {}",
                status,
                body
            ));
        }

        let document: Document = response
            .json()
            .await
            .context("Failed to parse examinee record")?;

        Ok(document
            .fields
            .get(&self.password_field)
            .and_then(|value| value.get("stringValue"))
            .and_then(|value| value.as_str())
            .map(str::to_string))
    }
}

#[async_trait]
impl Authenticator for FirestoreAuthenticator {
    async fn authenticate(&self, full_name: &str, password: &str) -> bool {
        match self.stored_password(full_name).await {
            Ok(Some(stored)) if stored == password => true,
            Ok(Some(_)) => {
                warn!("Authentication failed for '{}': password mismatch", full_name);
                false
            }
            Ok(None) => {
                warn!("Authentication failed for '{}': no record", full_name);
                false
            }
            Err(e) => {
                warn!("Authentication failed for '{}': {:#}", full_name, e);
                false
            }
        }
    }
}
