//! Registry error type.

use relay_core::StoreError;
use thiserror::Error;

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The tenant already has `limit` live (or pending) connections.
    #[error("tenant {tenant_id} reached its limit of {limit} connections")]
    TenantQuotaExceeded {
        /// Tenant that was refused.
        tenant_id: String,
        /// Configured cap.
        limit: usize,
    },

    /// The connection ID is already live or mid-registration.
    #[error("connection already registered: {0}")]
    ConnectionAlreadyRegistered(String),

    /// No live connection with this ID.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// The durable record could not be written during registration.
    #[error("failed to persist connection: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for registry results.
pub type Result<T> = std::result::Result<T, RegistryError>;
