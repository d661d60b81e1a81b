pub mod local;
pub mod s3;
pub mod sigv4;

use std::sync::Arc;

use assetvault_common::{ProviderKind, StorageProvider, StorageResult};

use crate::config::StorageConfig;

use self::local::LocalProvider;
use self::s3::S3Provider;

/// Construct one provider per backend table present in the configuration.
///
/// Construction never checks credentials; a provider with incomplete settings
/// is still registered and reports `ProviderUnavailable` when called.
pub fn from_config(config: &StorageConfig) -> StorageResult<Vec<Arc<dyn StorageProvider>>> {
    let mut providers: Vec<Arc<dyn StorageProvider>> = Vec::new();

    if let Some(local) = &config.local {
        providers.push(Arc::new(LocalProvider::new(local.clone())));
    }
    if let Some(r2) = &config.r2 {
        providers.push(Arc::new(S3Provider::new(ProviderKind::R2, r2.clone())?));
    }
    if let Some(s3) = &config.s3 {
        providers.push(Arc::new(S3Provider::new(ProviderKind::S3, s3.clone())?));
    }

    Ok(providers)
}
