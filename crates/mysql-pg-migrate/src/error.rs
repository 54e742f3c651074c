//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection and pool errors.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for data transfer failures.
pub const EXIT_TRANSFER_ERROR: u8 = 3;
/// Exit code for validation failures.
pub const EXIT_VALIDATION_ERROR: u8 = 4;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Schema lookup failed
    #[error("Schema extraction failed: {0}")]
    SchemaExtraction(String),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Post-migration validation failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from establishing or holding a connection.
    pub fn is_connection(&self) -> bool {
        match self {
            MigrateError::Pool { .. } => true,
            MigrateError::Source(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            MigrateError::Target(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Source(_) | MigrateError::Target(_) | MigrateError::Pool { .. } => {
                EXIT_CONNECTION_ERROR
            }
            MigrateError::SchemaExtraction(_) | MigrateError::Transfer { .. } => {
                EXIT_TRANSFER_ERROR
            }
            MigrateError::Validation(_) => EXIT_VALIDATION_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Json(_) => EXIT_CONFIG_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(
            MigrateError::transfer("orders", "boom").exit_code(),
            EXIT_TRANSFER_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_pool_error_is_connection() {
        assert!(MigrateError::pool("refused", "connecting").is_connection());
        assert!(!MigrateError::Validation("x".into()).is_connection());
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::transfer("orders", "COPY send: broken pipe");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Transfer failed for table orders"));
    }
}
