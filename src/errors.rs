// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture and encoding pipeline

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Top-level error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Encoder session errors
    Encoder(EncoderError),
    /// Camera or microphone errors
    Capture(CaptureError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Errors raised by an encoder session or its codec backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    /// Operation not permitted in the encoder's current state
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    /// Parameters rejected before or during configuration
    Configuration(String),
    /// No backend able to provide the requested codec
    NotAvailable(String),
    /// Runtime failure reported by the codec; fatal for the session
    Codec(String),
}

/// Errors raised by camera and microphone sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No matching capture device
    DeviceNotFound(String),
    /// Device could not be opened or started
    InitializationFailed(String),
    /// A read from the device failed (transient)
    ReadFailed(String),
    /// Device went away during operation
    Disconnected,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Encoder(e) => write!(f, "Encoder error: {}", e),
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while encoder is {}", operation, state)
            }
            EncoderError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            EncoderError::NotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            EncoderError::Codec(msg) => write!(f, "Codec failure: {}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CaptureError::InitializationFailed(msg) => {
                write!(f, "Initialization failed: {}", msg)
            }
            CaptureError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            CaptureError::Disconnected => write!(f, "Device disconnected"),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for EncoderError {}
impl std::error::Error for CaptureError {}

impl EncoderError {
    /// Whether this error ends the encoder session
    pub fn is_fatal(&self) -> bool {
        matches!(self, EncoderError::Codec(_))
    }
}

impl From<EncoderError> for AppError {
    fn from(err: EncoderError) -> Self {
        AppError::Encoder(err)
    }
}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = EncoderError::InvalidState {
            operation: "start",
            state: "Uninitialized",
        };
        assert_eq!(err.to_string(), "Cannot start while encoder is Uninitialized");
    }

    #[test]
    fn test_only_codec_errors_are_fatal() {
        assert!(EncoderError::Codec("boom".into()).is_fatal());
        assert!(!EncoderError::Configuration("bad".into()).is_fatal());
        assert!(!EncoderError::NotAvailable("none".into()).is_fatal());
    }

    #[test]
    fn test_app_error_wraps_sub_errors() {
        let err: AppError = CaptureError::Disconnected.into();
        assert_eq!(err.to_string(), "Capture error: Device disconnected");

        let err: AppError = std::io::Error::other("disk full").into();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
