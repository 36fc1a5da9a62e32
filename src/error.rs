//! Error types for the relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Cursor store error: {0}")]
    CursorStore(#[from] CursorStoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read rules file {path}: {source}")]
    RulesFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Errors from a pull-based history source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The requested start position is older than the source retains.
    /// Permanent for that position; the poller resets its cursor.
    #[error("History position {position} expired at source")]
    CursorExpired { position: u64 },

    #[error("Authentication failed for account {account}")]
    Auth { account: String },

    #[error("Request to {endpoint} failed: {reason}")]
    Request { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl SourceError {
    /// Whether this error means the cursor must be discarded.
    pub fn is_cursor_expired(&self) -> bool {
        matches!(self, Self::CursorExpired { .. })
    }
}

/// Execution gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Request(String),

    #[error("Gateway returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Cursor persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CursorStoreError {
    #[error("Cursor IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cursor serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Template parse/execute errors. Never escapes the renderer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),

    #[error("unsupported action {0:?}")]
    Unsupported(String),

    #[error("can't evaluate field {field} in type string")]
    FieldOnString { field: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
