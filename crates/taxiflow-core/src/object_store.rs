//! Bucket access for pipeline artifacts: a local directory for development
//! and tests, or any S3-compatible endpoint (GCS interoperability included).

use std::fmt;
use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::blocks::BucketBlock;
use crate::error::{PipelineError, Result};

#[cfg(feature = "runtime")]
use aws_config::BehaviorVersion;
#[cfg(feature = "runtime")]
use aws_credential_types::provider::SharedCredentialsProvider;
#[cfg(feature = "runtime")]
use aws_credential_types::Credentials;
#[cfg(feature = "runtime")]
use aws_sdk_s3::config::Region;
#[cfg(feature = "runtime")]
use aws_sdk_s3::error::SdkError;
#[cfg(feature = "runtime")]
use aws_sdk_s3::primitives::ByteStream;
#[cfg(feature = "runtime")]
use aws_sdk_s3::Client;

#[derive(Clone)]
pub struct ObjectStore {
    inner: ObjectStoreKind,
}

#[derive(Clone)]
enum ObjectStoreKind {
    Local(PathBuf),
    #[cfg(feature = "runtime")]
    S3 { client: Client, bucket: String },
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ObjectStoreKind::Local(root) => f.debug_tuple("Local").field(root).finish(),
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3 { bucket, .. } => f.debug_struct("S3").field("bucket", bucket).finish(),
        }
    }
}

fn sdk_error(err: impl fmt::Display) -> PipelineError {
    PipelineError::ObjectStore(err.to_string())
}

/// Rejects absolute keys and keys that climb out of the bucket root.
fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if key.is_empty() || escapes {
        return Err(PipelineError::ObjectStore(format!("invalid object key '{key}'")));
    }
    Ok(())
}

fn collect_local_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_local_keys(root, &path, keys)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let key = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

impl ObjectStore {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        ObjectStore {
            inner: ObjectStoreKind::Local(root.into()),
        }
    }

    #[cfg(feature = "runtime")]
    pub async fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        access_key_id: Option<&str>,
        secret_access_key: Option<&str>,
        force_path_style: bool,
    ) -> Result<Self> {
        if bucket.is_empty() {
            return Err(PipelineError::Config("bucket name cannot be empty".into()));
        }

        let region = region.unwrap_or("us-east-1").to_string();
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

        if let (Some(access_key), Some(secret_key)) = (access_key_id, secret_access_key) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "blocks");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(ObjectStore {
            inner: ObjectStoreKind::S3 {
                client: Client::from_conf(builder.build()),
                bucket: bucket.to_string(),
            },
        })
    }

    /// Builds the store a bucket block describes.
    pub async fn from_block(block: &BucketBlock) -> Result<Self> {
        match block {
            BucketBlock::Local { root } => Ok(Self::local(root.clone())),
            #[cfg(feature = "runtime")]
            BucketBlock::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                force_path_style,
            } => {
                Self::s3(
                    bucket,
                    region.as_deref(),
                    endpoint.as_deref(),
                    access_key_id.as_deref(),
                    secret_access_key.as_deref(),
                    *force_path_style,
                )
                .await
            }
            #[cfg(not(feature = "runtime"))]
            BucketBlock::S3 { bucket, .. } => Err(PipelineError::Config(format!(
                "bucket '{bucket}' needs the S3 backend; build with the `runtime` feature"
            ))),
        }
    }

    pub async fn upload_from_path(&self, from: &Path, to_key: &str) -> Result<()> {
        validate_key(to_key)?;
        match &self.inner {
            ObjectStoreKind::Local(root) => {
                let dest = root.join(to_key);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(from, &dest).await?;
            }
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3 { client, bucket } => {
                let body = ByteStream::from_path(from).await.map_err(sdk_error)?;
                client
                    .put_object()
                    .bucket(bucket)
                    .key(to_key)
                    .body(body)
                    .send()
                    .await
                    .map_err(sdk_error)?;
            }
        }
        info!(from = %from.display(), key = to_key, "Uploaded file to bucket");
        Ok(())
    }

    pub async fn download_object_to_path(&self, key: &str, to: &Path) -> Result<PathBuf> {
        validate_key(key)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match &self.inner {
            ObjectStoreKind::Local(root) => {
                let source = root.join(key);
                if !source.exists() {
                    return Err(PipelineError::ObjectStore(format!("object not found: {key}")));
                }
                tokio::fs::copy(&source, to).await?;
            }
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3 { client, bucket } => {
                let output = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|err| match err {
                        SdkError::ServiceError(service_err) if service_err.err().is_no_such_key() => {
                            PipelineError::ObjectStore(format!("object not found: {key}"))
                        }
                        other => sdk_error(other),
                    })?;
                let data = output.body.collect().await.map_err(sdk_error)?;
                tokio::fs::write(to, data.into_bytes()).await?;
            }
        }
        info!(key, to = %to.display(), "Downloaded object from bucket");
        Ok(to.to_path_buf())
    }

    /// Keys under `prefix`, sorted.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        match &self.inner {
            ObjectStoreKind::Local(root) => {
                if root.exists() {
                    collect_local_keys(root, root, &mut keys)?;
                }
                keys.retain(|key| key.starts_with(prefix));
            }
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3 { client, bucket } => {
                let mut continuation: Option<String> = None;
                loop {
                    let output = client
                        .list_objects_v2()
                        .bucket(bucket)
                        .prefix(prefix)
                        .set_continuation_token(continuation.take())
                        .send()
                        .await
                        .map_err(sdk_error)?;
                    keys.extend(output.contents().iter().filter_map(|object| object.key().map(str::to_string)));
                    match output.next_continuation_token() {
                        Some(token) => continuation = Some(token.to_string()),
                        None => break,
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match &self.inner {
            ObjectStoreKind::Local(root) => {
                let path = root.join(key);
                if path.exists() {
                    tokio::fs::remove_file(path).await?;
                }
            }
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3 { client, bucket } => {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(sdk_error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_must_stay_inside_the_bucket() {
        assert!(validate_key("yellow/yellow_tripdata_2021-01.parquet").is_ok());
        assert!(validate_key("../secrets").is_err());
        assert!(validate_key("yellow/../../x").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("").is_err());
    }
}
