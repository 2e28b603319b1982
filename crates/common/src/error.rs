//! Error types for ada-rs.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    // === Gateway Errors ===
    /// Network, timeout, rate limit or upstream 5xx. Retried on the next cycle.
    #[error("Transient gateway error: {0}")]
    TransientGateway(String),

    /// The platform refused the action for this account and community.
    #[error("Permanent action error: {0}")]
    PermanentAction(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Page too large: {0}")]
    PageTooLarge(String),

    // === Registry Errors ===
    /// The persisted registry page could not be parsed.
    #[error("Registry corruption: {0}")]
    RegistryCorruption(String),

    // === Server Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code used in logs and reports.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::TransientGateway(_) => "TRANSIENT_GATEWAY",
            Self::PermanentAction(_) => "PERMANENT_ACTION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PageTooLarge(_) => "PAGE_TOO_LARGE",
            Self::RegistryCorruption(_) => "REGISTRY_CORRUPTION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure may succeed on a later cycle without intervention.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientGateway(_) | Self::Database(_) | Self::Internal(_)
        )
    }

    /// Whether the failure must abort the whole run before any mutation.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RegistryCorruption(_) | Self::Config(_))
    }

    /// Log the error at a level matching its severity.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        if self.is_fatal() {
            tracing::error!(error = %self, code = code, "{context}");
        } else if self.is_transient() {
            tracing::warn!(error = %self, code = code, "{context}");
        } else {
            tracing::info!(error = %self, code = code, "{context}");
        }
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AppError::TransientGateway("timeout".into()).is_transient());
        assert!(!AppError::PermanentAction("suspended".into()).is_transient());
        assert!(AppError::RegistryCorruption("bad row".into()).is_fatal());
        assert!(!AppError::TransientGateway("timeout".into()).is_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::PageTooLarge("ada_config".into()).error_code(),
            "PAGE_TOO_LARGE"
        );
        assert_eq!(AppError::Cancelled.error_code(), "CANCELLED");
    }
}
