use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Settings read from the environment (and `.env` in development).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub public_base_url: String,
    pub cookie_secure: bool,
    pub jwt_secret: String,
    pub admin_login: String,
    /// bcrypt hash; admin login is disabled without it.
    pub admin_password_hash: Option<String>,
    pub github: Option<GithubConfig>,
    pub posts_prefix: String,
    pub media_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// `owner/name`
    pub repo: String,
    pub branch: String,
    /// Write credential. Without it the post store is read-only.
    pub token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = parse_or("BIND_ADDR", "0.0.0.0:8080")?;
        let cookie_secure = parse_or("COOKIE_SECURE", "true")?;

        let github = optional("GITHUB_REPO")
            .map(|repo| {
                if repo.split('/').filter(|part| !part.is_empty()).count() != 2 {
                    return Err(ConfigError::Invalid {
                        key: "GITHUB_REPO",
                        value: repo,
                    });
                }
                Ok(GithubConfig {
                    repo,
                    branch: optional("GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
                    token: optional("GITHUB_TOKEN"),
                })
            })
            .transpose()?;

        Ok(Config {
            bind_addr,
            database_url: required("DATABASE_URL")?,
            public_base_url: optional("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            cookie_secure,
            jwt_secret: required("JWT_SECRET")?,
            admin_login: optional("ADMIN_LOGIN").unwrap_or_else(|| "admin".to_string()),
            admin_password_hash: optional("ADMIN_PASSWORD_HASH"),
            github,
            posts_prefix: optional("POSTS_PREFIX").unwrap_or_else(|| "data/posts".to_string()),
            media_dir: optional("MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./media")),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parse_or<T: std::str::FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = optional(key).unwrap_or_else(|| {
        debug!("{key} not set, using default: {default}");
        default.to_string()
    });
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}
