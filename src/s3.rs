use async_trait::async_trait;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration, Tag, Tagging},
    Client,
};
use aws_types::SdkConfig;
use chrono::{DateTime, Utc};

use crate::error::{EtlError, Result};
use crate::reddit::Post;

const OBJECT_NAME: &str = "posts.json";
const STATUS_TAG: &str = "status";

/// Load-tracking tag kept on every uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    NotLoaded,
    Loaded,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::NotLoaded => "not-loaded",
            LoadStatus::Loaded => "loaded",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "not-loaded" => Some(LoadStatus::NotLoaded),
            "loaded" => Some(LoadStatus::Loaded),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;
    async fn create_bucket(&self, bucket: &str) -> Result<()>;
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        status: LoadStatus,
    ) -> Result<()>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn set_status(&self, bucket: &str, key: &str, status: LoadStatus) -> Result<()>;
    /// Keys under `prefix` still tagged `not-loaded`, in key order.
    async fn pending_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Builds the S3 client. Custom endpoints (LocalStack) only resolve path-style URLs.
pub fn load_client(config: &SdkConfig) -> Client {
    let s3_config = aws_sdk_s3::config::Builder::from(config)
        .force_path_style(config.endpoint_url().is_some())
        .build();
    Client::from_conf(s3_config)
}

pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn location_constraint(&self) -> Option<CreateBucketConfiguration> {
        let region = self.client.config().region()?.as_ref().to_owned();
        // us-east-1 rejects an explicit constraint
        if region == "us-east-1" {
            return None;
        }

        Some(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region.as_str()))
                .build(),
        )
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(EtlError::from_sdk(err, EtlError::Storage)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let result = self
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(self.location_constraint())
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(err) => Err(EtlError::from_sdk(err, EtlError::Storage)),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        status: LoadStatus,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/x-ndjson")
            .tagging(format!("{STATUS_TAG}={}", status.as_str()))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Storage))?;

        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Storage))?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| EtlError::Network(e.to_string()))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    async fn set_status(&self, bucket: &str, key: &str, status: LoadStatus) -> Result<()> {
        let tag = Tag::builder()
            .key(STATUS_TAG)
            .value(status.as_str())
            .build()
            .map_err(|e| EtlError::Storage(e.to_string()))?;
        let tagging = Tagging::builder()
            .tag_set(tag)
            .build()
            .map_err(|e| EtlError::Storage(e.to_string()))?;

        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Storage))?;

        Ok(())
    }

    async fn pending_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let objects: Vec<_> = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(list_prefix(prefix))
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| EtlError::from_sdk(e, EtlError::Storage))?;

        let mut pending = Vec::new();
        for key in objects.iter().filter_map(|o| o.key()) {
            let tagging = self
                .client
                .get_object_tagging()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| EtlError::from_sdk(e, EtlError::Storage))?;

            let status = tagging
                .tag_set()
                .iter()
                .find(|tag| tag.key() == STATUS_TAG)
                .and_then(|tag| LoadStatus::parse(tag.value()));
            if status == Some(LoadStatus::NotLoaded) {
                pending.push(key.to_owned());
            }
        }
        pending.sort();

        Ok(pending)
    }
}

/// Listing prefix for the objects written under `prefix`.
pub fn list_prefix(prefix: &str) -> String {
    match prefix.trim_matches('/') {
        "" => String::new(),
        prefix => format!("{prefix}/"),
    }
}

pub fn object_key(prefix: &str, date: DateTime<Utc>) -> String {
    let day = date.format("%y/%m/%d");
    match prefix.trim_matches('/') {
        "" => format!("{day}/{OBJECT_NAME}"),
        prefix => format!("{prefix}/{day}/{OBJECT_NAME}"),
    }
}

pub fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

/// One JSON object per line, the layout `COPY ... FORMAT AS JSON 'auto'` reads.
pub fn encode_posts(posts: &[Post]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for post in posts {
        serde_json::to_writer(&mut body, post)
            .map_err(|e| EtlError::Storage(format!("could not encode post {}: {e}", post.id)))?;
        body.push(b'\n');
    }

    Ok(body)
}

#[cfg(test)]
pub fn decode_posts(body: &[u8]) -> Result<Vec<Post>> {
    serde_json::Deserializer::from_slice(body)
        .into_iter::<Post>()
        .map(|post| {
            post.map_err(|e| EtlError::Storage(format!("malformed posts object: {e}")))
        })
        .collect()
}

/// Writes the batch to `key`. An empty batch has nothing to COPY, so it is tagged `loaded`
/// straight away.
pub async fn upload_posts(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    posts: &[Post],
) -> Result<()> {
    let body = encode_posts(posts)?;
    let size = body.len();
    let status = if posts.is_empty() {
        LoadStatus::Loaded
    } else {
        LoadStatus::NotLoaded
    };
    store.put_object(bucket, key, body, status).await?;
    tracing::info!(
        "uploaded {} posts ({size} bytes) to {}",
        posts.len(),
        s3_uri(bucket, key)
    );

    Ok(())
}
