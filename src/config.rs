use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};

const MIN_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct IdentitySettings {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Clone)]
pub struct MediaSettings {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Base of the URLs handed back to clients; defaults to the endpoint.
    pub public_url: String,
}

/// Process configuration, read once at startup.
#[derive(Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub port: u16,
    pub frontend_url: String,
    pub enable_hsts: bool,
    pub identity: IdentitySettings,
    pub media: MediaSettings,
    pub database_url: Option<String>,
    pub data_dir: Option<PathBuf>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(name: &str) -> bool {
    var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut missing = Vec::new();

        match (var("JWT_PUBLIC_KEY_PEM"), var("JWT_SECRET")) {
            (Some(_), _) => {}
            (None, Some(secret)) if secret.len() < MIN_SECRET_LEN => {
                bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long")
            }
            (None, Some(_)) => {}
            (None, None) => missing.push("JWT_SECRET (or JWT_PUBLIC_KEY_PEM)"),
        }
        let api_key = var("IDENTITY_API_KEY");
        if api_key.is_none() {
            missing.push("IDENTITY_API_KEY");
        }
        let endpoint = var("S3_ENDPOINT");
        if endpoint.is_none() {
            missing.push("S3_ENDPOINT");
        }
        if !missing.is_empty() {
            bail!("missing required environment variables: {}", missing.join(", "));
        }
        let endpoint = endpoint.unwrap_or_default();

        let port = match var("PORT") {
            Some(p) => p.parse().with_context(|| format!("PORT is not a valid port: {p}"))?,
            None => 8080,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            frontend_url: var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            enable_hsts: flag("ENABLE_HSTS"),
            identity: IdentitySettings {
                api_url: var("IDENTITY_API_URL").unwrap_or_else(|| "https://api.clerk.com".into()),
                api_key: api_key.unwrap_or_default(),
            },
            media: MediaSettings {
                bucket: var("S3_BUCKET").unwrap_or_else(|| "blog-posts".into()),
                public_url: var("MEDIA_PUBLIC_URL").unwrap_or_else(|| endpoint.clone()),
                endpoint,
                region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key: var("S3_ACCESS_KEY"),
                secret_key: var("S3_SECRET_KEY"),
            },
            database_url: var("DATABASE_URL"),
            data_dir: var("QUILL_DATA_DIR").map(PathBuf::from),
        })
    }
}
