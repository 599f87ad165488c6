//! Error types for the fanout host.

use fanout_engine::RoutingFailure;

/// Top-level error type for loading configuration and wiring the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Configuration could not be parsed or is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A provider fixture file could not be parsed.
    #[error("fixture error: {0}")]
    Fixture(String),

    /// The engine rejected the assembled router.
    #[error(transparent)]
    Routing(#[from] RoutingFailure),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HubError>;
