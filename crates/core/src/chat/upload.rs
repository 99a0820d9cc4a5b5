//! Image upload to a hosted asset service.

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Extensions accepted for upload.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic"];

/// A hosted image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Public URL of the full image.
    pub url: String,
    /// Service-side identifier.
    pub public_id: String,
    /// Thumbnail URL, or the full URL when the service has none.
    pub thumbnail_url: String,
}

/// Turns a local image file into a public URL.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<UploadedImage>;
}

/// Check that `path` is an existing file with an image extension.
pub fn validate_image_path(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::Validation(format!(
            "not an image file: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(Error::NotFound(path.display().to_string()));
    }
    Ok(())
}

/// Upload with the same bounded linear backoff used for message sends.
pub async fn upload_with_retry(
    uploader: &dyn ImageUploader,
    path: &Path,
    policy: &RetryPolicy,
) -> Result<UploadedImage> {
    validate_image_path(path)?;

    let image = policy
        .run("image upload", |_| uploader.upload(path))
        .await
        .map_err(|failure| failure.error)?;

    info!("Uploaded {} as {}", path.display(), image.public_id);
    Ok(image)
}

/// Insert a resize transformation into a hosted image URL.
///
/// URLs without an `/upload/` segment are returned unchanged.
pub fn transformed_url(url: &str, width: u32, height: u32) -> String {
    match url.split_once("/upload/") {
        Some((base, rest)) => format!(
            "{}/upload/w_{},h_{},c_fill,q_auto/{}",
            base, width, height, rest
        ),
        None => url.to_string(),
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    #[serde(default)]
    public_id: String,
    thumbnail_url: Option<String>,
}

/// Unsigned multipart upload to `<endpoint>/<cloud name>/image/upload`.
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    upload_preset: String,
}

impl HttpUploader {
    /// Build the client. A missing cloud name is a configuration error.
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let cloud_name = config
            .cloud_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::Config("upload cloud name is missing".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/{}/image/upload",
                config.endpoint.trim_end_matches('/'),
                cloud_name
            ),
            upload_preset: config.upload_preset.clone(),
        })
    }

    fn parse_response(body: &str) -> Result<UploadedImage> {
        let response: UploadResponse = serde_json::from_str(body)?;
        let url = response
            .secure_url
            .ok_or_else(|| Error::Upload("no URL returned".to_string()))?;

        Ok(UploadedImage {
            thumbnail_url: response.thumbnail_url.unwrap_or_else(|| url.clone()),
            public_id: response.public_id,
            url,
        })
    }
}

#[async_trait]
impl ImageUploader for HttpUploader {
    async fn upload(&self, path: &Path) -> Result<UploadedImage> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("upload_preset", self.upload_preset.clone());

        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Self::parse_response(&body);
        }
        if status.as_u16() == 400 {
            // Rejected request (usually an unknown preset); retrying will not help.
            return Err(Error::Config(format!(
                "upload preset \"{}\" rejected: {}",
                self.upload_preset, body
            )));
        }
        Err(Error::Upload(format!("upload failed ({}): {}", status, body)))
    }
}
