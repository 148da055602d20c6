//! Global error handling for edudrop
//!
//! This module provides a centralized error type shared by the scanner, the
//! archive builder and the HTTP layer, together with its HTTP status mapping.

use std::io;

use thiserror::Error;
use warp::http::StatusCode;

/// Global error type for edudrop operations
#[derive(Error, Debug)]
pub enum EduDropError {
    /// Bad filename, malformed body, missing field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path resolves outside the directory it must stay in
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested file or presentation does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An archive was requested for a selection without files
    #[error("No files selected")]
    NoFilesSelected,

    /// Root directory missing or unreadable
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// File system errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// ZIP writer errors
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON processing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiter or analytics backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Unexpected error
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Specialized Result type for edudrop operations
pub type Result<T> = std::result::Result<T, EduDropError>;

impl EduDropError {
    /// HTTP status reported for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::NoFilesSelected | Self::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Filesystem(_)
            | Self::Io(_)
            | Self::Zip(_)
            | Self::Config(_)
            | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to a client.
    ///
    /// Server-side failures never leak paths or OS error text.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) | Self::Forbidden(msg) | Self::NotFound(msg) => msg.clone(),
            Self::NoFilesSelected => "No files selected".to_string(),
            Self::Json(e) => format!("Invalid request body: {}", e),
            Self::Backend(_) => "Service temporarily unavailable".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// Creates an EduDropError with a formatted message
#[macro_export]
macro_rules! error {
    ($error_type:ident, $($arg:tt)*) => {
        $crate::error::EduDropError::$error_type(format!($($arg)*))
    };
}

/// Returns an error result with a formatted message
#[macro_export]
macro_rules! bail {
    ($error_type:ident, $($arg:tt)*) => {
        return Err($crate::error!($error_type, $($arg)*))
    };
}

/// Ensures a condition is true, otherwise returns an error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $error_type:ident, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($error_type, $($arg)*)
        }
    };
}

/// Extension trait for adding context to errors
pub trait ResultExt<T, E> {
    /// Add additional context to an error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E: std::error::Error + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        self.map_err(|e| {
            let context = f();
            EduDropError::Filesystem(format!("{}: {}", context, e))
        })
    }
}

// Allow converting EduDropError to io::Error for the binary's main
impl From<EduDropError> for io::Error {
    fn from(err: EduDropError) -> Self {
        io::Error::new(io::ErrorKind::Other, err.to_string())
    }
}
