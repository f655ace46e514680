//! Error types for RelayPost

use thiserror::Error;

/// Main error type for RelayPost
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

}

/// Result type alias for RelayPost
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Storage("disk".into()).code(), "STORAGE_ERROR");
        assert_eq!(Error::Validation("bad".into()).code(), "VALIDATION_ERROR");
        assert_eq!(Error::NotFound("a.txt".into()).code(), "NOT_FOUND");
    }

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("smtp.txt".to_string());
        assert_eq!(err.to_string(), "Not found: smtp.txt");
    }
}
