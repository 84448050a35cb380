//! Error types for GLINT operations

use crate::ParentId;
use thiserror::Error;

/// Failures of the network collaborators.
///
/// Every variant is retryable: the engine never retries on its own, it leaves
/// existing data untouched and lets the consumer issue a new request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Metadata fetch failed for {parent}: {reason}")]
    MetadataFetch { parent: ParentId, reason: String },

    #[error("Payload fetch failed for {parent} item {index}: {reason}")]
    PayloadFetch {
        parent: ParentId,
        index: usize,
        reason: String,
    },

    #[error("Dependent action failed for {parent}: {reason}")]
    ActionFailed { parent: ParentId, reason: String },
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Deserialization failed for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Durable tier full: {reason}")]
    CapacityExceeded { reason: String },

    #[error("Failed to open durable tier: {reason}")]
    EnvOpen { reason: String },

    #[error("Durable tier error: {reason}")]
    Durable { reason: String },
}

/// Rejections of the gated dependent action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Not ready for {parent}: {loaded} of {total} items loaded")]
    NotReady {
        parent: ParentId,
        loaded: usize,
        total: usize,
    },

    #[error("Action already running for {parent}")]
    AlreadyRunning { parent: ParentId },

    #[error("Loading was aborted for {parent}")]
    Aborted { parent: ParentId },
}

/// Preloader usage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Index {index} out of range for {total} items")]
    IndexOutOfRange { index: usize, total: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or GLINT_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all GLINT errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GlintError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl GlintError {
    /// True for failures a consumer may retry by issuing the request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GlintError::Transport(_))
    }

    /// True when the gated action was rejected because loading is incomplete.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, GlintError::Gate(GateError::NotReady { .. }))
    }
}

/// Result type alias for GLINT operations.
pub type GlintResult<T> = Result<T, GlintError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn nil_parent() -> ParentId {
        ParentId::new(Uuid::nil())
    }

    #[test]
    fn test_transport_error_display_payload_fetch() {
        let err = TransportError::PayloadFetch {
            parent: nil_parent(),
            index: 7,
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("item 7"));
        assert!(msg.contains("connection reset"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_gate_error_display_not_ready() {
        let err = GateError::NotReady {
            parent: nil_parent(),
            loaded: 3,
            total: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 of 10"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "cache.ttl_secs",
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cache.ttl_secs"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_glint_error_from_variants() {
        let cache = GlintError::from(CacheError::LockPoisoned);
        assert!(matches!(cache, GlintError::Cache(_)));

        let loader = GlintError::from(LoaderError::IndexOutOfRange { index: 4, total: 2 });
        assert!(matches!(loader, GlintError::Loader(_)));

        let gate = GlintError::from(GateError::AlreadyRunning {
            parent: nil_parent(),
        });
        assert!(matches!(gate, GlintError::Gate(_)));
    }

    #[test]
    fn test_retryable_and_not_ready_classification() {
        let transport = GlintError::from(TransportError::MetadataFetch {
            parent: nil_parent(),
            reason: "timeout".to_string(),
        });
        assert!(transport.is_retryable());
        assert!(!transport.is_not_ready());

        let not_ready = GlintError::from(GateError::NotReady {
            parent: nil_parent(),
            loaded: 0,
            total: 1,
        });
        assert!(not_ready.is_not_ready());
        assert!(!not_ready.is_retryable());
    }
}
