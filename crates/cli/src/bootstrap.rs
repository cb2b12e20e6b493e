//! Process bootstrap: environment, data directory and store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use queuectl_infra::jobs::{LivenessMarker, SqliteJobStore, DATABASE_FILE};

/// Overrides the directory holding `jobs.db` and `worker.pid`.
pub const DATA_DIR_ENV: &str = "QUEUECTL_DATA_DIR";

/// Resolved process settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
}

impl Settings {
    /// Load `.env` (if any) and resolve settings from the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let configured = std::env::var(DATA_DIR_ENV).ok();
        Self::resolve(configured.as_deref())
    }

    /// `configured` wins when non-blank; otherwise `<exe dir>/data`.
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        let data_dir = match configured.map(str::trim).filter(|d| !d.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        Ok(Self { data_dir })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn marker(&self) -> LivenessMarker {
        LivenessMarker::in_dir(&self.data_dir)
    }

    /// Create the data directory and open the store inside it.
    pub async fn open_store(&self) -> Result<SqliteJobStore> {
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("failed to create data directory {}", self.data_dir.display())
        })?;
        let path = self.database_path();
        debug!(path = %path.display(), "opening job store");
        SqliteJobStore::open(&path)
            .await
            .with_context(|| format!("failed to open job store at {}", path.display()))
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the queuectl executable")?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join("data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_directory_wins() {
        let settings = Settings::resolve(Some("/var/lib/queuectl")).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/queuectl"));
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/var/lib/queuectl/jobs.db")
        );
        assert_eq!(
            settings.marker().path(),
            Path::new("/var/lib/queuectl/worker.pid")
        );
    }

    #[test]
    fn blank_directory_falls_back_next_to_executable() {
        let settings = Settings::resolve(Some("  ")).unwrap();
        assert!(settings.data_dir.ends_with("data"));
        assert_eq!(settings, Settings::resolve(None).unwrap());
    }

    #[tokio::test]
    async fn open_store_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let settings = Settings::resolve(nested.to_str()).unwrap();

        let store = settings.open_store().await.unwrap();
        assert!(settings.database_path().exists());
        store.close().await;
    }
}
