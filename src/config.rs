//! Process configuration, read from the environment (and `.env` when present).

use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Base URL handed out in upload and file links.
    pub public_url: String,
    pub storage_dir: PathBuf,
    /// Shared secret the identity webhook must present. `None` rejects every call.
    pub webhook_secret: Option<String>,
    /// JSON file with OAuth client credentials.
    pub oauth_clients: Option<PathBuf>,
    /// Identity subjects promoted to super admin when their user is created.
    pub super_admin_subjects: Vec<String>,
    pub session_idle_minutes: i64,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://echoinwhispr.db".to_owned(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            public_url: "http://localhost:8080".to_owned(),
            storage_dir: PathBuf::from("storage"),
            webhook_secret: None,
            oauth_clients: None,
            super_admin_subjects: Vec::new(),
            session_idle_minutes: 60,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();
        let mut config = Self::default();

        if let Ok(url) = dotenv::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(addr) = dotenv::var("BIND_ADDR") {
            config.bind_addr = addr.parse().with_context(|| format!("BIND_ADDR {addr:?}"))?;
        }
        if let Ok(url) = dotenv::var("PUBLIC_URL") {
            config.public_url = url.trim_end_matches('/').to_owned();
        }
        if let Ok(dir) = dotenv::var("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        config.webhook_secret = dotenv::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());
        config.oauth_clients = dotenv::var("OAUTH_CLIENTS").ok().map(PathBuf::from);
        if let Ok(subjects) = dotenv::var("SUPER_ADMIN_SUBJECTS") {
            config.super_admin_subjects = parse_list(&subjects);
        }
        if let Ok(minutes) = dotenv::var("SESSION_IDLE_MINUTES") {
            config.session_idle_minutes = minutes.parse().context("SESSION_IDLE_MINUTES")?;
        }
        if let Ok(bytes) = dotenv::var("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = bytes.parse().context("MAX_UPLOAD_BYTES")?;
        }

        Ok(config)
    }

    pub fn is_super_admin_subject(&self, subject: &str) -> bool {
        self.super_admin_subjects.iter().any(|s| s == subject)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_list_skips_blanks() {
        assert_eq!(parse_list(" google.com|1, ,github.com|2,"), vec!["google.com|1", "github.com|2"]);
    }
}
