//! Publishing rendered diagrams to object storage.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use metrics::histogram;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::domain::{render::RenderedArtifact, storage_key::StorageKey};

pub const METRIC_UPLOAD_MS: &str = "plantuml_gateway_upload_ms";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to upload `{key}`: {message}")]
    Put { key: String, message: String },
}

impl StorageError {
    pub fn put(key: &StorageKey, message: impl Into<String>) -> Self {
        Self::Put {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Object store holding publicly readable diagram artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `artifact` under `key` in one request with a public-read ACL.
    async fn put_public(
        &self,
        key: &StorageKey,
        artifact: &RenderedArtifact,
    ) -> Result<(), StorageError>;

    /// Public URL of `key`. Derived locally; the object is not read back.
    fn public_url(&self, key: &StorageKey) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub key: StorageKey,
    pub url: String,
}

/// Mints a key per upload and hands the artifact to the store.
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Arc<dyn ArtifactStore>,
    folder: String,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ArtifactStore>, folder: impl Into<String>) -> Self {
        Self {
            store,
            folder: folder.into(),
        }
    }

    /// Upload once; failures are returned, never retried.
    pub async fn publish(
        &self,
        artifact: RenderedArtifact,
    ) -> Result<PublishedArtifact, StorageError> {
        let started_at = Instant::now();
        let key = StorageKey::generate(&self.folder, OffsetDateTime::now_utc());

        if let Err(err) = self.store.put_public(&key, &artifact).await {
            warn!(
                target = "application::storage",
                op = "storage::publish",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                key = %key,
                error = %err,
                "Artifact upload failed"
            );
            return Err(err);
        }

        histogram!(METRIC_UPLOAD_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        let url = self.store.public_url(&key);
        info!(
            target = "application::storage",
            op = "storage::publish",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            key = %key,
            png_bytes = artifact.len(),
            "Artifact uploaded"
        );

        Ok(PublishedArtifact { key, url })
    }
}
