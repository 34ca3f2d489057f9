//! S3-compatible object storage (DigitalOcean Spaces by default).

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::ObjectCannedAcl,
};

use crate::{
    application::storage::{ArtifactStore, StorageError},
    config::StorageSettings,
    domain::{render::RenderedArtifact, storage_key::StorageKey},
};

use super::error::InfraError;

const CREDENTIALS_PROVIDER: &str = "plantuml-gateway";

#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3ArtifactStore {
    /// Build a client from resolved settings. Bucket and both keys are required.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, InfraError> {
        let bucket = require(settings.bucket.as_deref(), "storage.bucket")?;
        let access_key = require(settings.access_key.as_deref(), "storage.access_key")?;
        let secret_key = require(settings.secret_key.as_deref(), "storage.secret_key")?;
        let public_base_url = settings
            .resolved_public_base_url()
            .ok_or_else(|| InfraError::configuration("storage.public_base_url is not set"))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, CREDENTIALS_PROVIDER);
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint.clone())
            .credentials_provider(credentials)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            bucket: bucket.to_string(),
            public_base_url,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put_public(
        &self,
        key: &StorageKey,
        artifact: &RenderedArtifact,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(ByteStream::from(artifact.bytes().clone()))
            .content_type(artifact.content_type())
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|err| StorageError::put(key, DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }

    fn public_url(&self, key: &StorageKey) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

fn require<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str, InfraError> {
    value.ok_or_else(|| InfraError::configuration(format!("{key} is required to serve requests")))
}
