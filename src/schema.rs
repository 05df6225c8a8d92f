#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use apache_avro::Schema;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Version marker meaning "latest registered version".
pub const LATEST_VERSION: i32 = 0;

/// Confluent-compatible schema registry client. One instance is constructed at
/// bootstrap and shared (`Arc`) by every component that resolves schemas.
/// Resolution results are cached indefinitely per `(subject, version)` pair;
/// registered schemas are immutable.
pub struct SchemaRegistry {
    endpoint: String,
    client: Client,
    cache: Mutex<HashMap<(String, i32), Arc<ResolvedSchema>>>,
}

/// A parsed schema plus the registry coordinates it was fetched under.
#[derive(Debug)]
pub struct ResolvedSchema {
    pub subject: String,
    pub id: i32,
    pub version: i32,
    pub schema: Schema,
}

#[derive(Debug, Deserialize)]
struct RegistryVersionResponse {
    id: i32,
    version: i32,
    schema: String,
}

impl SchemaRegistry {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder().build().map_err(|err| {
            Error::Config(format!("failed to build schema registry client: {err}"))
        })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a subject to a parsed schema. Version `0` selects the latest
    /// registered version.
    pub async fn resolve(&self, subject: &str, version: i32) -> Result<Arc<ResolvedSchema>> {
        let requested = version;
        let version = if version == LATEST_VERSION {
            self.latest_version(subject).await?
        } else {
            version
        };

        {
            let cache = self.cache.lock().expect("schema cache lock");
            if let Some(resolved) = cache.get(&(subject.to_string(), version)) {
                return Ok(Arc::clone(resolved));
            }
        }

        info!(
            subject = subject,
            version = version,
            "fetching schema from registry"
        );

        let url = format!(
            "{endpoint}/subjects/{subject}/versions/{version}",
            endpoint = self.endpoint,
            subject = urlencoding::encode(subject),
        );
        let response: RegistryVersionResponse = self
            .get_json(subject, &url)
            .await?
            .json()
            .await
            .map_err(|err| lookup_error(subject, format!("invalid registry response: {err}")))?;

        let schema = Schema::parse_str(&response.schema).map_err(|err| {
            lookup_error(
                subject,
                format!("registry returned an unparseable Avro schema: {err}"),
            )
        })?;

        let resolved = Arc::new(ResolvedSchema {
            subject: subject.to_string(),
            id: response.id,
            version: response.version,
            schema,
        });

        let mut cache = self.cache.lock().expect("schema cache lock");
        cache.insert((subject.to_string(), version), Arc::clone(&resolved));
        if requested == LATEST_VERSION {
            cache.insert((subject.to_string(), LATEST_VERSION), Arc::clone(&resolved));
        }

        Ok(resolved)
    }

    /// Whether a subject is registered at all.
    pub async fn exists(&self, subject: &str) -> Result<bool> {
        let url = format!("{}/subjects", self.endpoint);
        let subjects: Vec<String> = self
            .get_json(subject, &url)
            .await?
            .json()
            .await
            .map_err(|err| lookup_error(subject, format!("invalid subject list: {err}")))?;

        Ok(subjects.iter().any(|name| name == subject))
    }

    /// Highest registered version for a subject.
    pub async fn latest_version(&self, subject: &str) -> Result<i32> {
        let url = format!(
            "{endpoint}/subjects/{subject}/versions",
            endpoint = self.endpoint,
            subject = urlencoding::encode(subject),
        );
        let versions: Vec<i32> = self
            .get_json(subject, &url)
            .await?
            .json()
            .await
            .map_err(|err| lookup_error(subject, format!("invalid version list: {err}")))?;

        versions
            .into_iter()
            .max()
            .ok_or_else(|| lookup_error(subject, "subject has no registered versions".to_string()))
    }

    async fn get_json(&self, subject: &str, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await.map_err(|err| {
            let reason = if err.is_connect() {
                format!("unable to reach schema registry at `{url}`: {err}")
            } else if err.is_timeout() {
                format!("schema registry request to `{url}` timed out: {err}")
            } else {
                format!("schema registry request to `{url}` failed: {err}")
            };
            lookup_error(subject, reason)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(lookup_error(
                subject,
                format!("registry at `{url}` responded with status {status}: {body}"),
            ));
        }

        Ok(response)
    }
}

fn lookup_error(subject: &str, reason: String) -> Error {
    Error::SchemaLookup {
        subject: subject.to_string(),
        reason,
    }
}
