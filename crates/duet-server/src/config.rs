use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    /// Base URL clients use to reach this server, for locally stored images
    pub public_url: String,
    pub cloudinary: Option<CloudinaryConfig>,
}

impl Config {
    /// Read configuration from the environment (after `.env` has been loaded).
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("DUET_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DUET_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let host = var_or("DUET_HOST", "0.0.0.0");
        let port: u16 = var_or("DUET_PORT", "5000")
            .parse()
            .context("DUET_PORT must be a port number")?;
        let public_url = std::env::var("DUET_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        let cloudinary = match (
            std::env::var("CLOUDINARY_CLOUD_NAME"),
            std::env::var("CLOUDINARY_API_KEY"),
            std::env::var("CLOUDINARY_API_SECRET"),
        ) {
            (Ok(cloud_name), Ok(api_key), Ok(api_secret)) => Some(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => None,
        };

        Ok(Self {
            host,
            port,
            jwt_secret,
            db_path: var_or("DUET_DB_PATH", "duet.db").into(),
            upload_dir: var_or("DUET_UPLOAD_DIR", "./uploads").into(),
            public_url,
            cloudinary,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
