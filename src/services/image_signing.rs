//! Resolves stored image object keys into display URLs.
//!
//! Failures here never fail a cart read; callers drop the URL and log.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum ImageSigningError {
    #[error("image signing is not configured")]
    NotConfigured,
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("signing backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ImageSigner: Send + Sync {
    /// Turns an object key into a URL the client can fetch.
    async fn sign(&self, object_key: &str) -> Result<String, ImageSigningError>;
}

fn validate_key(object_key: &str) -> Result<&str, ImageSigningError> {
    let key = object_key.trim_start_matches('/');
    let bad = key.is_empty()
        || key.split('/').any(|segment| segment == "..")
        || key
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '?' | '#' | '&' | '%'));
    if bad {
        Err(ImageSigningError::InvalidKey(object_key.to_string()))
    } else {
        Ok(key)
    }
}

/// Time-limited URLs: `{base}/{key}?expires={unix}&signature={hex hmac}`.
/// The CDN recomputes the HMAC over `"{key}:{expires}"` with the same secret.
pub struct HmacUrlSigner {
    base_url: String,
    secret: Vec<u8>,
    ttl: Duration,
}

impl HmacUrlSigner {
    pub fn new(base_url: impl Into<String>, secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    fn signature(&self, key: &str, expires: i64) -> Result<String, ImageSigningError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ImageSigningError::Backend(e.to_string()))?;
        mac.update(format!("{}:{}", key, expires).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ImageSigner for HmacUrlSigner {
    async fn sign(&self, object_key: &str) -> Result<String, ImageSigningError> {
        let key = validate_key(object_key)?;
        let ttl = i64::try_from(self.ttl.as_secs())
            .map_err(|_| ImageSigningError::Backend("ttl out of range".to_string()))?;
        let expires = Utc::now().timestamp() + ttl;
        let signature = self.signature(key, expires)?;
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.base_url, key, expires, signature
        ))
    }
}

/// Public bucket: the URL is just base + key.
pub struct PublicUrlSigner {
    base_url: String,
}

impl PublicUrlSigner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageSigner for PublicUrlSigner {
    async fn sign(&self, object_key: &str) -> Result<String, ImageSigningError> {
        let key = validate_key(object_key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }
}

/// Used when no image host is configured; every item renders without a URL.
pub struct DisabledImageSigner;

#[async_trait]
impl ImageSigner for DisabledImageSigner {
    async fn sign(&self, _object_key: &str) -> Result<String, ImageSigningError> {
        Err(ImageSigningError::NotConfigured)
    }
}

/// Picks the signer matching the configured image settings.
pub fn from_config(config: &AppConfig) -> Arc<dyn ImageSigner> {
    match (&config.image_base_url, &config.image_signing_secret) {
        (Some(base), Some(secret)) => Arc::new(HmacUrlSigner::new(
            base.clone(),
            secret,
            Duration::from_secs(config.image_url_ttl_secs),
        )),
        (Some(base), None) => Arc::new(PublicUrlSigner::new(base.clone())),
        _ => Arc::new(DisabledImageSigner),
    }
}
