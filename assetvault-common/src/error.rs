/// Error taxonomy shared by providers, the catalog and the storage service.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Required backend configuration (credentials, endpoint, paths) is absent.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The record or physical object does not exist, or is soft-deleted.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The physical backend answered with an error other than "not found".
    #[error("upstream failure{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog error: {0}")]
    Catalog(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// Status code the routing layer is expected to answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidState(_) | Self::InvalidConfig(_) => 400,
            Self::ProviderUnavailable(_) | Self::Upstream { .. } => 502,
            Self::Io(_) | Self::Catalog(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(StorageError::NotFound("k".into()).http_status(), 404);
        assert_eq!(StorageError::InvalidState("k".into()).http_status(), 400);
        assert_eq!(StorageError::InvalidConfig("k".into()).http_status(), 400);
        assert_eq!(StorageError::ProviderUnavailable("r2".into()).http_status(), 502);
        assert_eq!(StorageError::upstream("boom").http_status(), 502);
        assert_eq!(StorageError::Catalog("locked".into()).http_status(), 500);
    }

    #[test]
    fn test_upstream_display() {
        let err = StorageError::Upstream {
            status: Some(503),
            message: "SlowDown".into(),
        };
        assert_eq!(err.to_string(), "upstream failure (HTTP 503): SlowDown");
        assert_eq!(
            StorageError::upstream("connection reset").to_string(),
            "upstream failure: connection reset"
        );
    }
}
