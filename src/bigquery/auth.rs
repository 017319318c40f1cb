// ABOUTME: OAuth access tokens for the BigQuery REST API
// ABOUTME: Uses a pre-issued token when configured, otherwise asks gcloud and caches the result

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;

/// gcloud tokens live for an hour; refresh well before that.
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

enum Strategy {
    Static(String),
    Gcloud {
        binary: PathBuf,
        credentials: Option<PathBuf>,
    },
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

pub struct TokenSource {
    strategy: Strategy,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// A fixed token, never refreshed.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::Static(token.into()),
            cache: Mutex::new(None),
        }
    }

    /// Tokens from `gcloud auth application-default print-access-token`.
    ///
    /// `credentials` is passed to gcloud as GOOGLE_APPLICATION_CREDENTIALS.
    pub fn gcloud(credentials: Option<PathBuf>) -> Result<Self> {
        let binary = which::which("gcloud").context(
            "gcloud not found on PATH. Install the Google Cloud SDK or set BQ_ACCESS_TOKEN",
        )?;
        if let Some(path) = &credentials {
            if !path.exists() {
                bail!("Credentials file {:?} does not exist", path);
            }
        }
        Ok(Self {
            strategy: Strategy::Gcloud {
                binary,
                credentials,
            },
            cache: Mutex::new(None),
        })
    }

    /// Prefer an explicit token; fall back to gcloud.
    pub fn from_config(access_token: Option<&str>, credentials: Option<PathBuf>) -> Result<Self> {
        match access_token {
            Some(token) => Ok(Self::fixed(token)),
            None => Self::gcloud(credentials),
        }
    }

    pub async fn token(&self) -> Result<String> {
        let (binary, credentials) = match &self.strategy {
            Strategy::Static(token) => return Ok(token.clone()),
            Strategy::Gcloud {
                binary,
                credentials,
            } => (binary, credentials),
        };

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(cached.value.clone());
            }
        }

        tracing::debug!("Requesting access token from gcloud");
        let mut command = Command::new(binary);
        command.args(["auth", "application-default", "print-access-token"]);
        if let Some(path) = credentials {
            command.env("GOOGLE_APPLICATION_CREDENTIALS", path);
        }
        let output = command
            .output()
            .await
            .context("Failed to run gcloud to obtain an access token")?;

        if !output.status.success() {
            bail!(
                "gcloud could not issue an access token: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let value = String::from_utf8(output.stdout)
            .context("gcloud returned a non UTF-8 token")?
            .trim()
            .to_string();
        if value.is_empty() {
            bail!("gcloud returned an empty access token");
        }

        *cache = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_token() {
        let source = TokenSource::from_config(Some("ya29.abc"), None).unwrap();
        assert_eq!(source.token().await.unwrap(), "ya29.abc");
    }
}
