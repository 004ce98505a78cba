//! Target object-store emitters.
//!
//! The index store hands a completed version to an [`ObjectStore`]: one
//! staged file becomes a single PUT, several become a multipart upload with
//! one part per block, and a delete marker becomes a delete against the
//! versioning-enabled bucket. The AWS emitter talks to real S3; the
//! directory emitter concatenates to local files and records the emission
//! order, standing in when S3 output is disabled.

use crate::error::{RestoreError, Result};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketVersioningStatus, CompletedMultipartUpload, CompletedPart, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

pub trait ObjectStore: Send + Sync {
    /// Upload a single-block object.
    fn put(&self, bucket: &str, key: &str, block_file: &Path) -> Result<()>;

    /// Upload a multi-block object, one part per staged block file, parts in
    /// the order given.
    fn put_multipart(&self, bucket: &str, key: &str, block_files: &[PathBuf]) -> Result<()>;

    /// Record the logical deletion of a key.
    fn delete_marker(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Emitter backed by the AWS SDK.
pub struct S3Emitter {
    client: Client,
    handle: Handle,
    versioning: bool,
    known_buckets: Mutex<HashSet<String>>,
}

impl S3Emitter {
    /// Build a client against `region` (or a compatible endpoint resolved
    /// from the ambient AWS configuration). Must be called on the runtime.
    pub async fn connect(region: &str, versioning: bool) -> Result<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Ok(Self {
            client: Client::new(&config),
            handle: Handle::current(),
            versioning,
            known_buckets: Mutex::new(HashSet::new()),
        })
    }

    /// Create the bucket on first use and enable versioning on it. Versions
    /// must land in a versioning-enabled bucket or they would overwrite one
    /// another.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        {
            let known = self.known_buckets.lock().unwrap();
            if known.contains(bucket) {
                return Ok(());
            }
        }

        let exists = self.client.head_bucket().bucket(bucket).send().await.is_ok();
        if !exists {
            info!("creating bucket {}", bucket);
            self.client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| {
                    RestoreError::emitter(format!(
                        "create bucket {}: {}",
                        bucket,
                        DisplayErrorContext(&e)
                    ))
                })?;
        }

        if self.versioning {
            self.client
                .put_bucket_versioning()
                .bucket(bucket)
                .versioning_configuration(
                    VersioningConfiguration::builder()
                        .status(BucketVersioningStatus::Enabled)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| {
                    RestoreError::emitter(format!(
                        "enable versioning on {}: {}",
                        bucket,
                        DisplayErrorContext(&e)
                    ))
                })?;
        }

        self.known_buckets.lock().unwrap().insert(bucket.to_string());
        Ok(())
    }

    async fn put_async(&self, bucket: &str, key: &str, block_file: &Path) -> Result<()> {
        self.ensure_bucket(bucket).await?;
        let data = fs::read(block_file)?;
        debug!("PUT {}/{} ({} bytes)", bucket, key, data.len());
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                RestoreError::emitter(format!(
                    "put {}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn put_multipart_async(
        &self,
        bucket: &str,
        key: &str,
        block_files: &[PathBuf],
    ) -> Result<()> {
        self.ensure_bucket(bucket).await?;

        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                RestoreError::emitter(format!(
                    "create multipart upload {}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| RestoreError::emitter("multipart upload came back without an id"))?
            .to_string();

        match self
            .upload_parts(bucket, key, &upload_id, block_files)
            .await
        {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| {
                        RestoreError::emitter(format!(
                            "complete multipart upload {}/{}: {}",
                            bucket,
                            key,
                            DisplayErrorContext(&e)
                        ))
                    })?;
                Ok(())
            }
            Err(e) => {
                // leave no orphaned parts behind before failing the run
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        block_files: &[PathBuf],
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::with_capacity(block_files.len());
        for (index, file) in block_files.iter().enumerate() {
            let part_number = (index + 1) as i32;
            let data = fs::read(file)?;
            debug!(
                "upload part {} of {}/{} ({} bytes)",
                part_number,
                bucket,
                key,
                data.len()
            );
            let uploaded = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| {
                    RestoreError::emitter(format!(
                        "upload part {} of {}/{}: {}",
                        part_number,
                        bucket,
                        key,
                        DisplayErrorContext(&e)
                    ))
                })?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
        }
        Ok(parts)
    }

    async fn delete_marker_async(&self, bucket: &str, key: &str) -> Result<()> {
        self.ensure_bucket(bucket).await?;
        info!("delete marker for {}/{}", bucket, key);
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                RestoreError::emitter(format!(
                    "delete {}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        // give the store time to order the marker before the next version
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(())
    }
}

impl ObjectStore for S3Emitter {
    fn put(&self, bucket: &str, key: &str, block_file: &Path) -> Result<()> {
        self.handle.block_on(self.put_async(bucket, key, block_file))
    }

    fn put_multipart(&self, bucket: &str, key: &str, block_files: &[PathBuf]) -> Result<()> {
        self.handle
            .block_on(self.put_multipart_async(bucket, key, block_files))
    }

    fn delete_marker(&self, bucket: &str, key: &str) -> Result<()> {
        self.handle.block_on(self.delete_marker_async(bucket, key))
    }
}

/// What a [`DirEmitter`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Put { bucket: String, key: String },
    DeleteMarker { bucket: String, key: String },
}

/// Emitter that materializes objects under a local directory. Each PUT
/// overwrites `<root>/<bucket>/<key>`, so the directory ends up holding the
/// newest emitted version of every key, and the recorded order carries the
/// version history.
pub struct DirEmitter {
    root: PathBuf,
    emissions: Mutex<Vec<Emission>>,
}

impl DirEmitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            emissions: Mutex::new(Vec::new()),
        }
    }

    fn write_concatenated(&self, bucket: &str, key: &str, block_files: &[PathBuf]) -> Result<()> {
        let path = self.root.join(bucket).join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut data = Vec::new();
        for file in block_files {
            data.extend_from_slice(&fs::read(file)?);
        }
        debug!("local PUT {}/{} ({} bytes)", bucket, key, data.len());
        fs::write(&path, data)?;
        Ok(())
    }

    /// Everything emitted so far, oldest first.
    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions.lock().unwrap().clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for DirEmitter {
    fn put(&self, bucket: &str, key: &str, block_file: &Path) -> Result<()> {
        self.write_concatenated(bucket, key, &[block_file.to_path_buf()])?;
        self.emissions.lock().unwrap().push(Emission::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    fn put_multipart(&self, bucket: &str, key: &str, block_files: &[PathBuf]) -> Result<()> {
        self.write_concatenated(bucket, key, block_files)?;
        self.emissions.lock().unwrap().push(Emission::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    fn delete_marker(&self, bucket: &str, key: &str) -> Result<()> {
        debug!("local delete marker {}/{}", bucket, key);
        self.emissions.lock().unwrap().push(Emission::DeleteMarker {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }
}
