//! GLINT Core - Shared Types
//!
//! Identifiers, the generic `Item`, the error taxonomy and configuration.
//! Every other crate in the workspace depends on this one; it contains no
//! I/O beyond reading a config file.

pub mod config;
pub mod error;
pub mod identity;
pub mod item;

pub use config::{CacheSettings, GlintConfig, LoaderSettings, CONFIG_ENV_VAR};
pub use error::{
    CacheError, ConfigError, GateError, GlintError, GlintResult, LoaderError, TransportError,
};
pub use identity::{ItemId, ParentId, Timestamp};
pub use item::{newest_of, reindex, Item, Payload};
