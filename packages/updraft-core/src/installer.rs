use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use updraft_feed::ReleaseCandidate;
use updraft_utils::http::{fetch_with_progress, http_status_is_ok, ProgressFn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid download url {0:?}")]
    InvalidUrl(String),
    #[error("installer download failed: {0}")]
    Download(String),
    #[error("installer checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },
    #[error("installer i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not start installer: {0}")]
    Spawn(String),
}

/// Obtains and starts the opaque installer. Split into two steps because
/// the download happens before the host gives shutdown consent, while the
/// spawn happens after.
#[async_trait]
pub trait InstallerLauncher: Send + Sync {
    /// Downloads the enclosure and verifies its integrity, returning the
    /// local installer path. `progress` receives (received, total) updates.
    async fn download(
        &self,
        candidate: &ReleaseCandidate,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, LaunchError>;

    /// Starts the installer as a detached process without waiting for it.
    fn launch(&self, installer: &Path) -> Result<(), LaunchError>;
}

/// Downloads into a fresh unique temporary directory (never straight into
/// $TMP, where stray libraries could interfere with the installer) and
/// spawns the binary detached.
#[derive(Default)]
pub struct ProcessInstallerLauncher;

impl ProcessInstallerLauncher {
    pub fn new() -> Self {
        Self
    }

    fn file_name_from_url(url: &str) -> &str {
        url.rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && !name.contains('?'))
            .unwrap_or("installer.bin")
    }
}

#[async_trait]
impl InstallerLauncher for ProcessInstallerLauncher {
    async fn download(
        &self,
        candidate: &ReleaseCandidate,
        progress: &ProgressFn<'_>,
    ) -> Result<PathBuf, LaunchError> {
        let uri = candidate
            .download_url
            .parse()
            .map_err(|_| LaunchError::InvalidUrl(candidate.download_url.clone()))?;

        tracing::info!(url = %candidate.download_url, "downloading installer");
        let response = fetch_with_progress(uri, &HashMap::new(), progress)
            .await
            .map_err(|e| LaunchError::Download(e.to_string()))?;
        if !http_status_is_ok(response.status) {
            return Err(LaunchError::Download(format!(
                "download failed with status {}",
                response.status
            )));
        }
        let body = response.body.unwrap_or_default();

        if let Some(expected) = candidate.sha256.as_deref() {
            let actual = hex::encode(Sha256::digest(&body));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(LaunchError::Integrity {
                    expected: expected.to_string(),
                    actual,
                });
            }
        } else {
            tracing::warn!(
                url = %candidate.download_url,
                "enclosure carries no checksum, skipping integrity check"
            );
        }

        let dir = tempfile::Builder::new()
            .prefix("updraft-install-")
            .tempdir()?
            .keep();
        let path = dir.join(Self::file_name_from_url(&candidate.download_url));
        tokio::fs::write(&path, &body).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(path)
    }

    fn launch(&self, installer: &Path) -> Result<(), LaunchError> {
        tracing::info!(installer = %installer.display(), "launching installer");
        Command::new(installer)
            .spawn()
            .map(|_child| ())
            .map_err(|e| LaunchError::Spawn(e.to_string()))
    }
}
