//! AWS S3 storage client.
//!
//! Speaks the native S3 multipart protocol through `aws-sdk-s3`.  Works
//! against AWS itself or any S3-compatible endpoint (MinIO, LocalStack,
//! Ceph RGW) via `endpoint_url` + `use_path_style`.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.
//!
//! SDK errors are classified into transient (timeouts, connection
//! failures, 5xx, throttling) and permanent (everything else) so the part
//! uploader knows which failures are worth another attempt.

use aws_config::retry::RetryConfig;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info};

use super::client::{
    CompletedObject, InitiatedUpload, PartReceipt, ServiceFuture, StorageServiceClient,
    UploadedPart,
};
use crate::config::AwsStorageConfig;
use crate::errors::{ErrorKind, ServiceError};

/// S3 error codes that are worth retrying regardless of HTTP status.
const TRANSIENT_CODES: &[&str] = &[
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "InternalError",
    "ServiceUnavailable",
];

/// Storage client backed by the AWS S3 SDK.
pub struct AwsStorageClient {
    client: Client,
}

impl AwsStorageClient {
    /// Create a new client from the `storage.aws` config section.
    ///
    /// SDK-internal retries are capped at `sdk_max_attempts` (1 by default)
    /// so that the per-part retry budget is the one that counts.
    pub async fn new(config: &AwsStorageConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.sdk_max_attempts));

        if !config.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&config.endpoint_url);
        }

        // If explicit credentials are provided, inject them as static credentials.
        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "partwise-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "AWS S3 client initialized: region={} endpoint='{}' path_style={}",
            config.region, config.endpoint_url, config.use_path_style
        );

        Ok(Self { client })
    }

    /// Wrap an existing SDK client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Whether an HTTP status / S3 error code pair describes a condition that
/// may clear up on its own.
pub fn is_transient_response(status: u16, code: Option<&str>) -> bool {
    if status >= 500 || status == 429 {
        return true;
    }
    code.is_some_and(|c| TRANSIENT_CODES.contains(&c))
}

/// Map an SDK error to a classified [`ServiceError`].
fn classify_sdk_error<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ErrorKind::Transient
        }
        SdkError::ServiceError(service) => {
            if is_transient_response(service.raw().status().as_u16(), err.code()) {
                ErrorKind::Transient
            } else {
                ErrorKind::Permanent
            }
        }
        _ => ErrorKind::Permanent,
    };
    ServiceError::new(operation, kind, DisplayErrorContext(&err).to_string())
}

fn aws_part_number(operation: &'static str, part_number: u32) -> Result<i32, ServiceError> {
    i32::try_from(part_number).map_err(|_| {
        ServiceError::permanent(operation, format!("part number {part_number} out of range"))
    })
}

impl StorageServiceClient for AwsStorageClient {
    fn initiate(&self, bucket: &str, key: &str) -> ServiceFuture<'_, InitiatedUpload> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!("AWS create_multipart_upload: bucket={} key={}", bucket, key);
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| classify_sdk_error("initiate", e))?;

            let upload_id = resp
                .upload_id()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ServiceError::permanent("initiate", "response carried no UploadId"))?
                .to_string();

            Ok(InitiatedUpload {
                upload_id,
                bucket,
                key,
            })
        })
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> ServiceFuture<'_, UploadedPart> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let number = aws_part_number("upload_part", part_number)?;
            let length = body.len() as i64;
            debug!(
                "AWS upload_part: bucket={} key={} upload_id={} part={} bytes={}",
                bucket, key, upload_id, part_number, length
            );

            let resp = self
                .client
                .upload_part()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .part_number(number)
                .content_length(length)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| classify_sdk_error("upload_part", e))?;

            let e_tag = resp
                .e_tag()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    ServiceError::permanent(
                        "upload_part",
                        format!("response for part {part_number} carried no ETag"),
                    )
                })?
                .to_string();

            Ok(UploadedPart { e_tag })
        })
    }

    fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> ServiceFuture<'_, CompletedObject> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move {
            let mut completed_parts = Vec::with_capacity(parts.len());
            for part in &parts {
                completed_parts.push(
                    CompletedPart::builder()
                        .e_tag(&part.e_tag)
                        .part_number(aws_part_number("complete", part.part_number)?)
                        .build(),
                );
            }
            let completed_upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build();

            debug!(
                "AWS complete_multipart_upload: bucket={} key={} upload_id={} parts={}",
                bucket,
                key,
                upload_id,
                parts.len()
            );
            let resp = self
                .client
                .complete_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .multipart_upload(completed_upload)
                .send()
                .await
                .map_err(|e| classify_sdk_error("complete", e))?;

            Ok(CompletedObject {
                bucket: resp.bucket().map(str::to_string).unwrap_or(bucket),
                key: resp.key().map(str::to_string).unwrap_or(key),
                location: resp.location().map(str::to_string),
                e_tag: resp.e_tag().map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
            })
        })
    }

    fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> ServiceFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            debug!(
                "AWS abort_multipart_upload: bucket={} key={} upload_id={}",
                bucket, key, upload_id
            );
            self.client
                .abort_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await
                .map_err(|e| classify_sdk_error("abort", e))?;
            Ok(())
        })
    }

    fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ServiceFuture<'_, CompletedObject> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "AWS put_object: bucket={} key={} bytes={}",
                bucket,
                key,
                body.len()
            );
            let resp = self
                .client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .content_length(body.len() as i64)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| classify_sdk_error("put_object", e))?;

            Ok(CompletedObject {
                bucket,
                key,
                location: None,
                e_tag: resp.e_tag().map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
            })
        })
    }
}
