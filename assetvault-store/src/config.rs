use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assetvault_common::{ProviderKind, StorageProvider};

use crate::catalog::Catalog;
use crate::providers::{self, local::LocalConfig, s3::S3Config};
use crate::service::{StorageService, DEFAULT_RETENTION_DAYS};

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_active_provider")]
    pub active_provider: ProviderKind,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default)]
    pub local: Option<LocalConfig>,
    #[serde(default)]
    pub r2: Option<S3Config>,
    #[serde(default)]
    pub s3: Option<S3Config>,
}

fn default_active_provider() -> ProviderKind {
    ProviderKind::Local
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("assetvault.db")
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

impl StorageConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let mut config = Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.apply_env_fallbacks(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fill S3 credentials the file leaves out from the standard AWS variables.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for remote in [self.r2.as_mut(), self.s3.as_mut()].into_iter().flatten() {
            if remote.access_key_id.as_deref().map_or(true, str::is_empty) {
                remote.access_key_id = lookup("AWS_ACCESS_KEY_ID");
            }
            if remote.secret_access_key.as_deref().map_or(true, str::is_empty) {
                remote.secret_access_key = lookup("AWS_SECRET_ACCESS_KEY");
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.has_table(self.active_provider) {
            anyhow::bail!(
                "active_provider '{}' has no [{}] table",
                self.active_provider,
                self.active_provider
            );
        }
        if self.retention_days < 1 {
            anyhow::bail!("retention_days must be at least 1");
        }
        if self.catalog_path.as_os_str().is_empty() {
            anyhow::bail!("catalog_path must not be empty");
        }
        for (name, remote) in [("r2", &self.r2), ("s3", &self.s3)] {
            if let Some(remote) = remote {
                if remote.bucket.is_empty() {
                    anyhow::bail!("[{}] bucket must not be empty", name);
                }
            }
        }
        Ok(())
    }

    fn has_table(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Local => self.local.is_some(),
            ProviderKind::R2 => self.r2.is_some(),
            ProviderKind::S3 => self.s3.is_some(),
        }
    }

    pub fn build_providers(&self) -> anyhow::Result<Vec<Arc<dyn StorageProvider>>> {
        Ok(providers::from_config(self)?)
    }

    pub fn build_service(&self, catalog: Arc<dyn Catalog>) -> anyhow::Result<StorageService> {
        let service = StorageService::new(catalog, self.build_providers()?, self.active_provider)?
            .with_retention_days(self.retention_days);
        tracing::info!(
            active = %self.active_provider,
            providers = ?service.available_providers(),
            "Storage service configured"
        );
        Ok(service)
    }
}
