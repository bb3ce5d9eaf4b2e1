//! Remote S3-compatible storage backend.
//!
//! Configuration goes through sanitization (scheme, prefix, Hetzner
//! endpoint cross-check) before anything touches the network. Validation
//! probes the bucket with `HeadBucket` across a fixed order of candidate
//! client shapes, falling back on addressing style and signer region, and
//! reports every failed attempt in one diagnostic string.

use bytes::Bytes;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, SharedCredentialsProvider};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::operation::{RequestId, RequestIdExt};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::error::{AppError, AppResult};
use crate::models::S3Config;

const HETZNER_SUFFIX: &str = ".your-objectstorage.com";

/// Fallback signer region tried when the configured one is refused.
const FALLBACK_SIGNER_REGION: &str = "us-east-1";

/// One concrete way of talking to the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientShape {
    pub endpoint: String,
    pub force_path_style: bool,
    pub signer_region: String,
}

impl ClientShape {
    fn addressing(&self) -> &'static str {
        if self.force_path_style {
            "path-style"
        } else {
            "virtual-host"
        }
    }
}

// ============================================================================
// Sanitization
// ============================================================================

/// Normalize and cross-check a remote storage configuration.
///
/// Rejects empty fields, forces https unless http was explicit, trims the
/// prefix to `None` when empty, and parses the well-known Hetzner endpoint
/// form `https://<bucket>.<region>.your-objectstorage.com` to cross-check
/// or derive `(bucket, region)`.
pub fn sanitize_config(config: &S3Config) -> Result<S3Config, String> {
    let endpoint = config.endpoint.trim();
    if endpoint.is_empty() {
        return Err("Endpoint must not be empty".into());
    }
    let endpoint = if endpoint.starts_with("http://") {
        endpoint.to_string()
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("https://{rest}")
    } else {
        format!("https://{endpoint}")
    };
    let endpoint = endpoint.trim_end_matches('/').to_string();

    let access_key_id = config.access_key_id.trim().to_string();
    let secret_access_key = config.secret_access_key.trim().to_string();
    if access_key_id.is_empty() || secret_access_key.is_empty() {
        return Err("Access key id and secret must not be empty".into());
    }

    let prefix = config.prefix.as_deref().map(|p| p.trim().trim_matches('/').to_string());
    let prefix = prefix.filter(|p| !p.is_empty());

    let mut bucket = config.bucket.trim().to_string();
    let mut region = config.region.trim().to_string();

    if let Some((host_bucket, host_region)) = parse_hetzner_host(&endpoint) {
        if let Some(host_bucket) = host_bucket {
            if bucket.is_empty() {
                bucket = host_bucket.clone();
            } else if bucket != host_bucket {
                return Err(format!(
                    "Bucket '{bucket}' does not match endpoint bucket '{host_bucket}'"
                ));
            }
        }
        if region.is_empty() {
            region = host_region.clone();
        } else if region != host_region {
            return Err(format!(
                "Region '{region}' does not match endpoint region '{host_region}'"
            ));
        }
    }

    if bucket.is_empty() {
        return Err("Bucket must not be empty".into());
    }
    if region.is_empty() {
        return Err("Region must not be empty".into());
    }

    Ok(S3Config {
        endpoint,
        region,
        bucket,
        access_key_id,
        secret_access_key,
        prefix,
    })
}

/// `(bucket?, region)` parsed from a Hetzner object storage endpoint.
/// Returns `None` for any other host.
fn parse_hetzner_host(endpoint: &str) -> Option<(Option<String>, String)> {
    let host = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    let host = host.split(['/', ':']).next()?;
    let rest = host.strip_suffix(HETZNER_SUFFIX)?;

    match rest.rsplit_once('.') {
        Some((bucket, region)) if !bucket.is_empty() && !region.is_empty() => {
            Some((Some(bucket.to_string()), region.to_string()))
        }
        None if !rest.is_empty() => Some((None, rest.to_string())),
        _ => None,
    }
}

fn is_hetzner(config: &S3Config) -> bool {
    parse_hetzner_host(&config.endpoint).is_some()
}

/// Candidate client shapes in probe order.
///
/// Hetzner only accepts its two documented forms; other providers get the
/// base endpoint in both addressing styles plus a direct-bucket endpoint.
pub fn candidate_shapes(config: &S3Config) -> Vec<ClientShape> {
    let region = config.region.clone();

    if let Some((_, host_region)) = parse_hetzner_host(&config.endpoint) {
        let direct = format!(
            "https://{}.{}{}",
            config.bucket, host_region, HETZNER_SUFFIX
        );
        let base = format!("https://{}{}", host_region, HETZNER_SUFFIX);
        return vec![
            ClientShape {
                endpoint: direct,
                force_path_style: false,
                signer_region: region.clone(),
            },
            ClientShape {
                endpoint: base,
                force_path_style: true,
                signer_region: region,
            },
        ];
    }

    let (scheme, host) = match config.endpoint.split_once("://") {
        Some((scheme, host)) => (scheme, host),
        None => ("https", config.endpoint.as_str()),
    };
    let direct = format!("{scheme}://{}.{host}", config.bucket);

    vec![
        ClientShape {
            endpoint: config.endpoint.clone(),
            force_path_style: true,
            signer_region: region.clone(),
        },
        ClientShape {
            endpoint: config.endpoint.clone(),
            force_path_style: false,
            signer_region: region.clone(),
        },
        ClientShape {
            endpoint: direct,
            force_path_style: false,
            signer_region: region,
        },
    ]
}

// ============================================================================
// Validation probe
// ============================================================================

fn build_client(config: &S3Config, shape: &ClientShape) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "server-storage-settings",
    );

    let conf = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(shape.signer_region.clone()))
        .endpoint_url(shape.endpoint.clone())
        .credentials_provider(SharedCredentialsProvider::new(credentials))
        .force_path_style(shape.force_path_style)
        .build();

    Client::from_conf(conf)
}

fn describe_head_bucket_error(
    err: &aws_sdk_s3::error::SdkError<HeadBucketError>,
) -> String {
    match err {
        aws_sdk_s3::error::SdkError::ServiceError(ctx) => {
            let e = ctx.err();
            format!(
                "code={} message={} requestId={} hostId={}",
                e.code().unwrap_or("unknown"),
                e.message().unwrap_or("no message"),
                e.request_id().unwrap_or("-"),
                e.extended_request_id().unwrap_or("-"),
            )
        }
        other => format!("transport error: {other}"),
    }
}

/// Probe the bucket across candidate shapes, stopping at the first success.
///
/// Each shape is tried with the configured signer region first, then with
/// the `us-east-1` fallback. On success the winning shape is returned; on
/// failure the diagnostic concatenates every attempt.
pub async fn validate(config: &S3Config) -> Result<ClientShape, String> {
    let mut attempts: Vec<String> = Vec::new();

    for base_shape in candidate_shapes(config) {
        let mut regions = vec![base_shape.signer_region.clone()];
        if base_shape.signer_region != FALLBACK_SIGNER_REGION {
            regions.push(FALLBACK_SIGNER_REGION.to_string());
        }

        for signer_region in regions {
            let shape = ClientShape {
                signer_region,
                ..base_shape.clone()
            };
            let client = build_client(config, &shape);
            match client.head_bucket().bucket(&config.bucket).send().await {
                Ok(_) => return Ok(shape),
                Err(e) => {
                    attempts.push(format!(
                        "[host={} addressing={} signerRegion={}: {}]",
                        shape.endpoint,
                        shape.addressing(),
                        shape.signer_region,
                        describe_head_bucket_error(&e),
                    ));
                }
            }
        }
    }

    Err(format!(
        "Bucket validation failed after {} attempt(s): {}",
        attempts.len(),
        attempts.join(" ")
    ))
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client for serving traffic without probing the bucket.
    ///
    /// Uses the first candidate shape, which is the normalized
    /// direct-bucket endpoint for Hetzner and the path-style base endpoint
    /// elsewhere. Reconfiguration goes through [`validate`] first.
    pub async fn connect(config: &S3Config) -> AppResult<S3Storage> {
        let shape = candidate_shapes(config)
            .into_iter()
            .next()
            .ok_or(AppError::Internal)?;

        Ok(S3Storage {
            client: build_client(config, &shape),
            bucket: config.bucket.clone(),
        })
    }

    pub async fn put(&self, key: &str, bytes: &[u8], mime: Option<&str>) -> AppResult<()> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()));
        if let Some(mime) = mime {
            req = req.content_type(mime);
        }

        req.send().await.map_err(|e| {
            tracing::error!(key = %key, error = ?e, "Failed to upload object");
            AppError::Internal
        })?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> AppResult<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()) == Some(true) {
                    AppError::NotFound("File not found".into())
                } else {
                    tracing::error!(key = %key, error = ?e, "Failed to fetch object");
                    AppError::Internal
                }
            })?;

        let data = resp.body.collect().await.map_err(|e| {
            tracing::error!(key = %key, error = ?e, "Failed to read object body");
            AppError::Internal
        })?;
        Ok(data.into_bytes())
    }

    pub async fn delete(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(key = %key, error = ?e, "Failed to delete object");
                AppError::Internal
            })?;
        Ok(())
    }

    pub async fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }

            let resp = req.send().await.map_err(|e| {
                tracing::error!(prefix = %prefix, error = ?e, "Failed to list objects");
                AppError::Internal
            })?;

            for object in resp.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match resp.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> S3Config {
        S3Config {
            endpoint: "https://s3.example.com".into(),
            region: "eu-central".into(),
            bucket: "hub-files".into(),
            access_key_id: "AKIA123".into(),
            secret_access_key: "secret".into(),
            prefix: None,
        }
    }

    #[test]
    fn sanitize_forces_https_and_trims() {
        let mut config = base_config();
        config.endpoint = "s3.example.com/".into();
        config.prefix = Some("/hub/files/".into());

        let clean = sanitize_config(&config).unwrap();
        assert_eq!(clean.endpoint, "https://s3.example.com");
        assert_eq!(clean.prefix.as_deref(), Some("hub/files"));
    }

    #[test]
    fn sanitize_keeps_explicit_http() {
        let mut config = base_config();
        config.endpoint = "http://minio.local:9000".into();
        let clean = sanitize_config(&config).unwrap();
        assert_eq!(clean.endpoint, "http://minio.local:9000");
    }

    #[test]
    fn sanitize_rejects_empty_fields() {
        let mut config = base_config();
        config.bucket = "  ".into();
        assert!(sanitize_config(&config).is_err());

        let mut config = base_config();
        config.secret_access_key = String::new();
        assert!(sanitize_config(&config).is_err());
    }

    #[test]
    fn empty_prefix_collapses_to_none() {
        for empty in ["", "  ", "//", " / "] {
            let mut config = base_config();
            config.prefix = Some(empty.into());
            assert_eq!(
                sanitize_config(&config).unwrap().prefix,
                None,
                "prefix {empty:?} should collapse to None"
            );
        }
    }

    #[test]
    fn hetzner_endpoint_derives_bucket_and_region() {
        let mut config = base_config();
        config.endpoint = "https://hub-files.fsn1.your-objectstorage.com".into();
        config.bucket = String::new();
        config.region = String::new();

        let clean = sanitize_config(&config).unwrap();
        assert_eq!(clean.bucket, "hub-files");
        assert_eq!(clean.region, "fsn1");
    }

    #[test]
    fn hetzner_endpoint_cross_check_rejects_mismatch() {
        let mut config = base_config();
        config.endpoint = "https://other-bucket.fsn1.your-objectstorage.com".into();
        config.bucket = "hub-files".into();
        assert!(sanitize_config(&config).is_err());
    }

    #[test]
    fn hetzner_candidates_are_direct_then_path_style() {
        let mut config = base_config();
        config.endpoint = "https://hub-files.fsn1.your-objectstorage.com".into();
        config.region = "fsn1".into();
        let config = sanitize_config(&config).unwrap();

        let shapes = candidate_shapes(&config);
        assert_eq!(shapes.len(), 2);
        assert_eq!(
            shapes[0].endpoint,
            "https://hub-files.fsn1.your-objectstorage.com"
        );
        assert!(!shapes[0].force_path_style);
        assert_eq!(shapes[1].endpoint, "https://fsn1.your-objectstorage.com");
        assert!(shapes[1].force_path_style);
    }

    #[test]
    fn generic_candidates_follow_fallback_order() {
        let shapes = candidate_shapes(&base_config());
        assert_eq!(shapes.len(), 3);
        // path-style on the base endpoint first,
        assert_eq!(shapes[0].endpoint, "https://s3.example.com");
        assert!(shapes[0].force_path_style);
        // then virtual-host on the base endpoint,
        assert_eq!(shapes[1].endpoint, "https://s3.example.com");
        assert!(!shapes[1].force_path_style);
        // then virtual-host on the direct bucket endpoint.
        assert_eq!(shapes[2].endpoint, "https://hub-files.s3.example.com");
        assert!(!shapes[2].force_path_style);
    }
}
