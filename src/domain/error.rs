use thiserror::Error;

/// Errors raised by the cache repository and its collaborators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Backing store unavailable: {message}")]
    BackingStoreUnavailable { message: String },

    #[error("Distributed cache unavailable: {message}")]
    DistributedCacheUnavailable { message: String },

    #[error("Write-behind flush failed: {message}")]
    WriteBehindFlushFailed { message: String },

    #[error("Write-behind queue closed: {message}")]
    WriteBehindClosed { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn backing_store(message: impl Into<String>) -> Self {
        Self::BackingStoreUnavailable {
            message: message.into(),
        }
    }

    pub fn distributed_cache(message: impl Into<String>) -> Self {
        Self::DistributedCacheUnavailable {
            message: message.into(),
        }
    }

    pub fn flush_failed(message: impl Into<String>) -> Self {
        Self::WriteBehindFlushFailed {
            message: message.into(),
        }
    }

    pub fn write_behind_closed(message: impl Into<String>) -> Self {
        Self::WriteBehindClosed {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for errors caused by an unreachable or slow distributed tier
    pub fn is_distributed_cache(&self) -> bool {
        matches!(self, Self::DistributedCacheUnavailable { .. })
    }

    /// True for errors caused by an unreachable or slow backing store
    pub fn is_backing_store(&self) -> bool {
        matches!(self, Self::BackingStoreUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_store_error() {
        let error = DomainError::backing_store("connection refused");
        assert_eq!(
            error.to_string(),
            "Backing store unavailable: connection refused"
        );
        assert!(error.is_backing_store());
        assert!(!error.is_distributed_cache());
    }

    #[test]
    fn test_distributed_cache_error() {
        let error = DomainError::distributed_cache("timed out after 50ms");
        assert_eq!(
            error.to_string(),
            "Distributed cache unavailable: timed out after 50ms"
        );
        assert!(error.is_distributed_cache());
    }

    #[test]
    fn test_configuration_error() {
        let error = DomainError::configuration("write-through and write-behind are exclusive");
        assert_eq!(
            error.to_string(),
            "Invalid configuration: write-through and write-behind are exclusive"
        );
    }
}
