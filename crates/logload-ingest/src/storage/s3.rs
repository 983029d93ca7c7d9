use super::{ObjectReader, ObjectStore, ObjectWriter};
use crate::config::ClientConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    config::{Credentials, RequestChecksumCalculation, ResponseChecksumValidation},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::{Bytes, BytesMut};
use logload_common::types::SourceReference;
use tracing::{debug, info, instrument, warn};

/// Size of each multipart upload part. Objects smaller than one part are
/// written with a single `PutObject`.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Object store speaking the S3-compatible XML API.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        debug!(
            endpoint = %config.storage_endpoint,
            region = %config.storage_region,
            hmac = config.storage_access_key.is_some(),
            "Initializing object storage client"
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.storage_region.clone()))
            .endpoint_url(&config.storage_endpoint);

        if let (Some(access_key), Some(secret_key)) =
            (&config.storage_access_key, &config.storage_secret_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "logload-storage",
            ));
        }

        let shared = loader.load().await;
        // Interop endpoints reject the newer default checksum headers.
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.storage_path_style)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        Ok(Self::from_client(Client::from_conf(s3_config)))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, object), fields(object = %object))]
    async fn open_read(&self, object: &SourceReference) -> Result<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.path)
            .send()
            .await
            .with_context(|| format!("GetObject {}", object))?;

        let size = output.content_length().and_then(|len| u64::try_from(len).ok());
        debug!(?size, "Opened source object");

        Ok(ObjectReader {
            size,
            body: Box::pin(output.body.into_async_read()),
        })
    }

    async fn open_write(&self, object: &SourceReference) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(S3Writer {
            client: self.client.clone(),
            object: object.clone(),
            buffer: BytesMut::with_capacity(PART_SIZE),
            upload_id: None,
            parts: Vec::new(),
        }))
    }
}

struct S3Writer {
    client: Client,
    object: SourceReference,
    buffer: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl S3Writer {
    async fn upload_id(&mut self) -> Result<String> {
        if let Some(ref id) = self.upload_id {
            return Ok(id.clone());
        }

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.object.bucket)
            .key(&self.object.path)
            .send()
            .await
            .with_context(|| format!("CreateMultipartUpload {}", self.object))?;
        let id = output
            .upload_id()
            .map(str::to_string)
            .with_context(|| format!("CreateMultipartUpload {} returned no upload id", self.object))?;

        debug!(object = %self.object, upload_id = %id, "Started multipart upload");
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, body: Bytes) -> Result<()> {
        let upload_id = self.upload_id().await?;
        let part_number = i32::try_from(self.parts.len() + 1).context("too many parts")?;

        let output = self
            .client
            .upload_part()
            .bucket(&self.object.bucket)
            .key(&self.object.path)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("UploadPart {} of {}", part_number, self.object))?;

        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(output.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }

    /// Upload the buffered tail and complete the multipart upload.
    async fn complete(&mut self, upload_id: String) -> Result<()> {
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer).freeze();
            self.upload_part(tail).await?;
        }

        let parts = std::mem::take(&mut self.parts);
        let part_count = parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(&self.object.bucket)
            .key(&self.object.path)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("CompleteMultipartUpload {}", self.object))?;

        info!(object = %self.object, parts = part_count, "Completed multipart upload");
        Ok(())
    }
}

#[async_trait]
impl ObjectWriter for S3Writer {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= PART_SIZE {
            let part = self.buffer.split_to(PART_SIZE).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        let Some(upload_id) = self.upload_id.clone() else {
            let body = std::mem::take(&mut self.buffer).freeze();
            let size = body.len();
            self.client
                .put_object()
                .bucket(&self.object.bucket)
                .key(&self.object.path)
                .body(ByteStream::from(body))
                .send()
                .await
                .with_context(|| format!("PutObject {}", self.object))?;
            info!(object = %self.object, size, "Uploaded object");
            return Ok(());
        };

        if let Err(err) = self.complete(upload_id).await {
            if let Err(abort) = self.abort().await {
                warn!(error = %format!("{:#}", abort), "Failed to abort multipart upload");
            }
            return Err(err);
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let Some(upload_id) = self.upload_id else {
            return Ok(());
        };

        warn!(object = %self.object, upload_id = %upload_id, "Aborting multipart upload");
        self.client
            .abort_multipart_upload()
            .bucket(&self.object.bucket)
            .key(&self.object.path)
            .upload_id(upload_id)
            .send()
            .await
            .with_context(|| format!("AbortMultipartUpload {}", self.object))?;
        Ok(())
    }
}
