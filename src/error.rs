//! Error types for qflow

use thiserror::Error;

/// Result type alias for qflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// qflow error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failures raised by the graph engine or the calibration procedure.
    ///
    /// Passed through untouched so callers can downcast to the engine's own error type.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),

    /// The module handle does not carry the compiled-graph capability
    #[error("input must be a compiled-graph module, got: {found}")]
    NotCompiledGraph {
        /// Description of the handle that was supplied
        found: String,
    },

    /// The compiled graph has no callable entry point with the required name
    #[error("compiled graph does not have a `{name}` method")]
    MissingEntryPoint {
        /// Name of the missing entry point
        name: String,
    },

    /// Quantization configuration is malformed
    #[error("Invalid quantization config: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// A requested execution mode is not supported
    #[error("Unsupported mode: {message}")]
    UnsupportedMode {
        /// Error message
        message: String,
    },

    /// Static quantization was requested without a calibration procedure or dataset
    #[error("post-training static quantization requires {missing}")]
    CalibrationRequired {
        /// What was missing (`run_fn` or `run_args`)
        missing: &'static str,
    },

    /// A workflow step was requested from a state that does not allow it
    #[error("cannot move quantization workflow from {from} to {to}")]
    InvalidTransition {
        /// State the workflow was in
        from: String,
        /// State that was requested
        to: String,
    },
}

impl Error {
    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an UnsupportedMode error
    pub fn unsupported_mode(message: impl Into<String>) -> Self {
        Self::UnsupportedMode {
            message: message.into(),
        }
    }

    /// Create the UnsupportedMode error raised for in-place requests
    pub fn in_place_unsupported() -> Self {
        Self::unsupported_mode("in-place support not implemented")
    }

    /// Create a MissingEntryPoint error
    pub fn missing_entry_point(name: impl Into<String>) -> Self {
        Self::MissingEntryPoint { name: name.into() }
    }

    /// Create a NotCompiledGraph error
    pub fn not_compiled_graph(found: impl Into<String>) -> Self {
        Self::NotCompiledGraph {
            found: found.into(),
        }
    }

    /// Create an InvalidTransition error
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether this error came from the external engine or calibration procedure
    pub fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::in_place_unsupported().to_string(),
            "Unsupported mode: in-place support not implemented"
        );
        assert_eq!(
            Error::missing_entry_point("forward").to_string(),
            "compiled graph does not have a `forward` method"
        );
        assert_eq!(
            Error::CalibrationRequired { missing: "run_fn" }.to_string(),
            "post-training static quantization requires run_fn"
        );
    }

    #[test]
    fn test_engine_error_is_transparent() {
        let err: Error = anyhow::anyhow!("pass exploded").into();
        assert!(err.is_engine());
        assert_eq!(err.to_string(), "pass exploded");
    }
}
