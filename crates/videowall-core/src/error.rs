//! Error types: the topology taxonomy and operator-facing API errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation and lookup failures raised by the topology model.
///
/// Every variant is produced synchronously, before any network traffic is
/// attempted for the operation that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WallError {
    #[error("invalid crop region: {0}")]
    InvalidRegion(String),

    #[error("matrix shape {rows}x{cols} needs {expected} decoders, got {actual}")]
    ShapeMismatch {
        rows: u32,
        cols: u32,
        expected: usize,
        actual: usize,
    },

    #[error("decoder '{0}' not found")]
    UnknownDecoder(String),

    #[error("encoder '{0}' not found")]
    UnknownEncoder(String),

    #[error("preset '{0}' not found")]
    UnknownPreset(String),

    #[error("decoder '{0}' listed more than once")]
    DuplicateDecoder(String),

    #[error("no decoders given")]
    EmptySelection,

    #[error("decoder '{0}' has no source")]
    NoSource(String),

    #[error("decoders show different sources ('{first}' and '{second}')")]
    MixedSources { first: String, second: String },
}

/// Error codes for protocol responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    CommandFailed,
    InvalidInput,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::CommandFailed => write!(f, "COMMAND_FAILED"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// An error response with operator-facing context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn decoder_not_found(decoder_id: &str) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: format!("Decoder '{}' not found", decoder_id),
            suggestion: Some("Run 'videowall status' to see configured decoders".into()),
        }
    }

    pub fn encoder_not_found(encoder_id: &str) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: format!("Encoder '{}' not found", encoder_id),
            suggestion: Some("Run 'videowall status' to see configured encoders".into()),
        }
    }

    pub fn preset_not_found(preset_id: &str) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: format!("Preset '{}' not found", preset_id),
            suggestion: Some("Run 'videowall preset list' to see saved presets".into()),
        }
    }

    /// A device could not be driven with any known dialect.
    pub fn no_dialect_accepted(target: &str) -> Self {
        Self {
            code: ErrorCode::CommandFailed,
            message: format!("No transport or command spelling was accepted by {}", target),
            suggestion: Some(
                "Run 'videowall log' to inspect the attempts, or check the device credentials"
                    .into(),
            ),
        }
    }

    /// No default credential pair opened a session on the device.
    pub fn no_default_credentials(target: &str) -> Self {
        Self {
            code: ErrorCode::CommandFailed,
            message: format!("None of the default credentials logged in to {}", target),
            suggestion: Some(
                "Set the correct pair with 'videowall credentials set <user> <pass>'".into(),
            ),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some("Check the command syntax and try again".into()),
        }
    }

    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
            suggestion: Some("This is an internal error. Please report it if it persists.".into()),
        }
    }
}

impl From<WallError> for ApiError {
    fn from(err: WallError) -> Self {
        match err {
            WallError::UnknownDecoder(id) => ApiError::decoder_not_found(&id),
            WallError::UnknownEncoder(id) => ApiError::encoder_not_found(&id),
            WallError::UnknownPreset(id) => ApiError::preset_not_found(&id),
            WallError::InvalidRegion(_) => ApiError::invalid_input_with_suggestion(
                err.to_string(),
                "Crop rectangles must have positive size and stay inside the source frame",
            ),
            WallError::ShapeMismatch { .. } => ApiError::invalid_input_with_suggestion(
                err.to_string(),
                "Select exactly rows x cols decoders for the matrix",
            ),
            WallError::DuplicateDecoder(_) => ApiError::invalid_input_with_suggestion(
                err.to_string(),
                "List each decoder only once",
            ),
            WallError::EmptySelection => ApiError::invalid_input_with_suggestion(
                err.to_string(),
                "Name at least one decoder",
            ),
            WallError::NoSource(ref id) => ApiError::invalid_input_with_suggestion(
                err.to_string(),
                format!("Switch it first: 'videowall switch <encoder> {}'", id),
            ),
            WallError::MixedSources { .. } => ApiError::invalid_input_with_suggestion(
                err.to_string(),
                "Crop decoders showing different sources separately",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every constructor must provide a suggestion for the operator.
    fn assert_has_suggestion(err: &ApiError, context: &str) {
        assert!(
            err.suggestion.is_some(),
            "{} should have a suggestion, but got None",
            context
        );
    }

    #[test]
    fn test_decoder_not_found_has_suggestion() {
        let err = ApiError::decoder_not_found("dec_07");
        assert_has_suggestion(&err, "decoder_not_found");
        assert!(err.message.contains("dec_07"));
        assert!(err.suggestion.as_ref().unwrap().contains("status"));
    }

    #[test]
    fn test_no_dialect_accepted_points_to_log() {
        let err = ApiError::no_dialect_accepted("172.16.207.11");
        assert_has_suggestion(&err, "no_dialect_accepted");
        assert_eq!(err.code, ErrorCode::CommandFailed);
        assert!(err.suggestion.as_ref().unwrap().contains("log"));
    }

    #[test]
    fn test_wall_error_mapping() {
        let err: ApiError = WallError::UnknownEncoder("enc_99".into()).into();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(err.message.contains("enc_99"));

        let err: ApiError = WallError::ShapeMismatch {
            rows: 2,
            cols: 2,
            expected: 4,
            actual: 3,
        }
        .into();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("2x2"));
        assert_has_suggestion(&err, "shape_mismatch");

        let err: ApiError = WallError::InvalidRegion("width must be positive".into()).into();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("width must be positive"));

        let err: ApiError = WallError::NoSource("dec_04".into()).into();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.suggestion.as_ref().unwrap().contains("switch <encoder> dec_04"));
    }

    #[test]
    fn test_display_format_with_suggestion() {
        let err = ApiError::preset_not_found("preset_3");
        let display = format!("{}", err);
        assert!(display.contains("[NOT_FOUND]"));
        assert!(display.contains("preset_3"));
        assert!(display.contains("(hint:"));
    }

    #[test]
    fn test_json_round_trip_keeps_code() {
        let json = r#"{"code":"NOT_FOUND","message":"Decoder 'x' not found","suggestion":"hint"}"#;
        let err: ApiError = serde_json::from_str(json).unwrap();
        assert!(matches!(err.code, ErrorCode::NotFound));
        assert_eq!(err.suggestion, Some("hint".to_string()));
    }
}
