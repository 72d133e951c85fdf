//! Image hosting for message attachments and profile pictures.
//!
//! Clients send images inline as data URLs (`data:image/png;base64,...`).
//! The host stores them somewhere reachable and hands back a public URL,
//! which is what gets persisted.

use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// 10 MB limit on a decoded image
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Invalid image data")]
    InvalidDataUrl,

    #[error("Unsupported file type: {0}")]
    NotAnImage(String),

    #[error("Image is larger than {} bytes", MAX_IMAGE_SIZE)]
    TooLarge,

    #[error("Failed to store image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image upload failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image host rejected upload: {0}")]
    Rejected(String),
}

/// Raster formats only. Anything scriptable (svg) would be served same-origin from `/uploads`.
fn image_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    /// Parse a base64 `data:image/...` URL in one of the accepted raster formats.
    pub fn parse(raw: &str) -> Result<Self, ImageError> {
        let rest = raw.strip_prefix("data:").ok_or(ImageError::InvalidDataUrl)?;
        let (meta, payload) = rest.split_once(',').ok_or(ImageError::InvalidDataUrl)?;
        let mime = meta.strip_suffix(";base64").ok_or(ImageError::InvalidDataUrl)?;

        if image_extension(mime).is_none() {
            return Err(ImageError::NotAnImage(mime.to_string()));
        }
        // base64 of MAX_IMAGE_SIZE bytes, rounded up
        if payload.len() > MAX_IMAGE_SIZE / 3 * 4 + 4 {
            return Err(ImageError::TooLarge);
        }

        let bytes = B64.decode(payload.trim()).map_err(|_| ImageError::InvalidDataUrl)?;
        if bytes.is_empty() {
            return Err(ImageError::InvalidDataUrl);
        }
        if bytes.len() > MAX_IMAGE_SIZE {
            return Err(ImageError::TooLarge);
        }

        Ok(Self { mime: mime.to_string(), bytes })
    }

    /// File extension for the stored copy.
    pub fn extension(&self) -> &'static str {
        image_extension(&self.mime).unwrap_or("bin")
    }
}

/// Where uploaded images end up.
pub enum ImageHost {
    Local(LocalStore),
    Cloudinary(Cloudinary),
}

impl ImageHost {
    /// Store the image and return its public URL.
    pub async fn upload(&self, data_url: &str) -> Result<String, ImageError> {
        match self {
            Self::Local(store) => store.upload(data_url).await,
            Self::Cloudinary(cloud) => cloud.upload(data_url).await,
        }
    }
}

/// Writes images to a directory the server exposes under `/uploads`.
pub struct LocalStore {
    dir: PathBuf,
    public_url: String,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn upload(&self, data_url: &str) -> Result<String, ImageError> {
        let image = DataUrl::parse(data_url)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!("{}.{}", Uuid::new_v4(), image.extension());
        tokio::fs::write(self.dir.join(&name), &image.bytes).await?;

        debug!("Stored {} byte image as {}", image.bytes.len(), name);
        Ok(format!("{}/uploads/{}", self.public_url, name))
    }
}

/// Signed uploads to the Cloudinary image API.
pub struct Cloudinary {
    cloud_name: String,
    api_key: String,
    api_secret: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CloudinaryReply {
    secure_url: Option<String>,
    error: Option<CloudinaryErrorBody>,
}

#[derive(Deserialize)]
struct CloudinaryErrorBody {
    message: String,
}

impl Cloudinary {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Self {
        info!("Uploading images to Cloudinary cloud '{}'", cloud_name);
        Self {
            cloud_name,
            api_key,
            api_secret,
            client: reqwest::Client::new(),
        }
    }

    /// SHA-1 over the sorted signed parameters followed by the API secret.
    fn sign(&self, timestamp: i64) -> String {
        let digest = Sha1::digest(format!("timestamp={}{}", timestamp, self.api_secret));
        hex::encode(digest)
    }

    async fn upload(&self, data_url: &str) -> Result<String, ImageError> {
        // Reject garbage before spending a round trip on it.
        DataUrl::parse(data_url)?;

        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.sign(timestamp);
        let endpoint = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.cloud_name
        );

        let reply: CloudinaryReply = self
            .client
            .post(endpoint)
            .form(&[
                ("file", data_url),
                ("api_key", self.api_key.as_str()),
                ("timestamp", timestamp.to_string().as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        match reply {
            CloudinaryReply { secure_url: Some(url), .. } => Ok(url),
            CloudinaryReply { error: Some(err), .. } => Err(ImageError::Rejected(err.message)),
            _ => Err(ImageError::Rejected("no URL in response".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn parses_png_data_url() {
        let image = DataUrl::parse(PIXEL).unwrap();
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.extension(), "png");
        assert_eq!(&image.bytes[1..4], b"PNG");
    }

    #[test]
    fn rejects_non_images_and_plain_urls() {
        assert!(matches!(
            DataUrl::parse("data:text/plain;base64,aGk="),
            Err(ImageError::NotAnImage(_))
        ));
        assert!(matches!(
            DataUrl::parse("https://example.com/cat.png"),
            Err(ImageError::InvalidDataUrl)
        ));
        assert!(matches!(
            DataUrl::parse("data:image/png;base64,@@@"),
            Err(ImageError::InvalidDataUrl)
        ));
    }

    #[test]
    fn svg_and_other_scriptable_types_are_refused() {
        let svg = format!(
            "data:image/svg+xml;base64,{}",
            B64.encode(r#"<svg xmlns="http://www.w3.org/2000/svg" onload="alert(1)"/>"#)
        );
        assert!(matches!(DataUrl::parse(&svg), Err(ImageError::NotAnImage(m)) if m == "image/svg+xml"));
        assert!(matches!(
            DataUrl::parse("data:image/x-icon;base64,AAAB"),
            Err(ImageError::NotAnImage(_))
        ));
        assert!(DataUrl::parse(&PIXEL.replace("image/png", "image/webp")).is_ok());
    }

    #[tokio::test]
    async fn local_store_never_writes_an_svg() {
        let dir = std::env::temp_dir().join(format!("duet-images-{}", Uuid::new_v4()));
        let host = ImageHost::Local(LocalStore::new(&dir, "http://localhost:5000"));

        let svg = format!("data:image/svg+xml;base64,{}", B64.encode("<svg/>"));
        assert!(host.upload(&svg).await.is_err());
        assert!(!dir.exists());
    }

    #[test]
    fn jpeg_and_odd_subtypes_get_safe_extensions() {
        let jpeg = DataUrl { mime: "image/jpeg".into(), bytes: vec![1] };
        assert_eq!(jpeg.extension(), "jpg");
        let odd = DataUrl { mime: "image/../x".into(), bytes: vec![1] };
        assert_eq!(odd.extension(), "bin");
    }

    #[test]
    fn cloudinary_signature_is_hex_sha1() {
        let cloud = Cloudinary::new("demo".into(), "key".into(), "secret".into());
        let sig = cloud.sign(1_700_000_000);
        assert_eq!(sig.len(), 40);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(sig, cloud.sign(1_700_000_001));
    }

    #[tokio::test]
    async fn local_store_writes_file_and_returns_public_url() {
        let dir = std::env::temp_dir().join(format!("duet-images-{}", Uuid::new_v4()));
        let host = ImageHost::Local(LocalStore::new(&dir, "http://localhost:5000/"));

        let url = host.upload(PIXEL).await.unwrap();
        assert!(url.starts_with("http://localhost:5000/uploads/"));
        assert!(url.ends_with(".png"));

        let name = url.rsplit('/').next().unwrap();
        assert!(dir.join(name).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
