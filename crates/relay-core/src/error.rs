//! Error types for the relay RPC engine.
//!
//! Every failure carries a wire error code, a short user message and a longer
//! detail message. The same triple travels inside Exception frames, so an
//! error raised by a remote handler is rebuilt as the same variant on the
//! caller's thread.

use std::path::PathBuf;
use thiserror::Error;

/// Numeric error codes as they appear in Exception frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Application = 0,
    Raw = 1,
    Communication = 2,
    ModuleStart = 3,
    TypeMismatch = 4,
    IncompatibleMethodSignature = 5,
    ModuleIdSyntax = 6,
    IncorrectCategorySyntax = 7,
    ServiceNotFound = 8,
    MethodTypeNotBlockType = 9,
    MethodAmbiguous = 10,
    UnsupportedType = 11,
    MethodNotFound = 12,
    SignatureSyntax = 13,
    ModuleDefinition = 14,
    ModuleNotFound = 15,
    BrokerStart = 16,
    SecurityDenied = 17,
    Disconnected = 18,
}

impl ErrorCode {
    /// Raw code used for failures nobody anticipated (panicking handlers).
    pub const UNEXPECTED: u8 = 255;

    /// Decode a raw wire code. Unknown codes fold into `Application`.
    pub fn from_u8(code: u8) -> Self {
        match code {
            1 => ErrorCode::Raw,
            2 => ErrorCode::Communication,
            3 => ErrorCode::ModuleStart,
            4 => ErrorCode::TypeMismatch,
            5 => ErrorCode::IncompatibleMethodSignature,
            6 => ErrorCode::ModuleIdSyntax,
            7 => ErrorCode::IncorrectCategorySyntax,
            8 => ErrorCode::ServiceNotFound,
            9 => ErrorCode::MethodTypeNotBlockType,
            10 => ErrorCode::MethodAmbiguous,
            11 => ErrorCode::UnsupportedType,
            12 => ErrorCode::MethodNotFound,
            13 => ErrorCode::SignatureSyntax,
            14 => ErrorCode::ModuleDefinition,
            15 => ErrorCode::ModuleNotFound,
            16 => ErrorCode::BrokerStart,
            17 => ErrorCode::SecurityDenied,
            18 => ErrorCode::Disconnected,
            _ => ErrorCode::Application,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Main error type for the relay engine.
#[derive(Debug, Error)]
pub enum RelayError {
    // Signature and overload errors
    #[error("Signature syntax error: {message}")]
    SignatureSyntax { message: String, detail: String },

    #[error("Method not found: {message}")]
    MethodNotFound { message: String, detail: String },

    #[error("Method ambiguous: {message}")]
    MethodAmbiguous { message: String, detail: String },

    #[error("Incompatible method signature: {message}")]
    IncompatibleSignature { message: String, detail: String },

    // Lookup errors
    #[error("Service not found: {message}")]
    ServiceNotFound { message: String, detail: String },

    #[error("Module not found: {message}")]
    ModuleNotFound { message: String, detail: String },

    #[error("Module failed to start: {message}")]
    ModuleStart { message: String, detail: String },

    #[error("Invalid module definition: {message}")]
    ModuleDefinition { message: String, detail: String },

    #[error("Invalid category: {message}")]
    CategorySyntax { message: String, detail: String },

    // Codec errors
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String, detail: String },

    #[error("Out of data: {message}")]
    OutOfData { message: String, detail: String },

    #[error("Unsupported type: {message}")]
    UnsupportedType { message: String, detail: String },

    // Session errors
    #[error("Security denied: {message}")]
    SecurityDenied { message: String, detail: String },

    #[error("Disconnected: {message}")]
    Disconnected { message: String, detail: String },

    #[error("Communication error: {message}")]
    Communication { message: String, detail: String },

    #[error("Broker failed to start: {message}")]
    BrokerStart { message: String, detail: String },

    /// Domain-specific failure raised by a handler.
    #[error("{message}")]
    Application {
        code: u8,
        message: String,
        detail: String,
    },

    // Local infrastructure errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RelayError {
    /// Build the typed error for a wire code.
    pub fn new(code: ErrorCode, message: impl Into<String>, detail: impl Into<String>) -> Self {
        let message = message.into();
        let detail = detail.into();
        match code {
            ErrorCode::SignatureSyntax => RelayError::SignatureSyntax { message, detail },
            ErrorCode::MethodNotFound => RelayError::MethodNotFound { message, detail },
            ErrorCode::MethodAmbiguous => RelayError::MethodAmbiguous { message, detail },
            ErrorCode::IncompatibleMethodSignature => {
                RelayError::IncompatibleSignature { message, detail }
            }
            ErrorCode::ServiceNotFound => RelayError::ServiceNotFound { message, detail },
            ErrorCode::ModuleNotFound => RelayError::ModuleNotFound { message, detail },
            ErrorCode::ModuleStart => RelayError::ModuleStart { message, detail },
            ErrorCode::ModuleDefinition => RelayError::ModuleDefinition { message, detail },
            ErrorCode::IncorrectCategorySyntax => RelayError::CategorySyntax { message, detail },
            ErrorCode::TypeMismatch => RelayError::TypeMismatch { message, detail },
            ErrorCode::UnsupportedType => RelayError::UnsupportedType { message, detail },
            ErrorCode::SecurityDenied => RelayError::SecurityDenied { message, detail },
            ErrorCode::Disconnected => RelayError::Disconnected { message, detail },
            ErrorCode::Communication => RelayError::Communication { message, detail },
            ErrorCode::BrokerStart => RelayError::BrokerStart { message, detail },
            ErrorCode::Application
            | ErrorCode::Raw
            | ErrorCode::ModuleIdSyntax
            | ErrorCode::MethodTypeNotBlockType => RelayError::Application {
                code: code.as_u8(),
                message,
                detail,
            },
        }
    }

    /// Rebuild an error received in an Exception frame.
    pub fn from_wire(code: u8, message: impl Into<String>, detail: impl Into<String>) -> Self {
        match ErrorCode::from_u8(code) {
            ErrorCode::Application => RelayError::Application {
                code,
                message: message.into(),
                detail: detail.into(),
            },
            known => RelayError::new(known, message, detail),
        }
    }

    /// Application error with the generic code.
    pub fn application(message: impl Into<String>, detail: impl Into<String>) -> Self {
        RelayError::new(ErrorCode::Application, message, detail)
    }

    /// The error used when a handler fails in a way nobody anticipated.
    pub fn unexpected(detail: impl Into<String>) -> Self {
        RelayError::Application {
            code: ErrorCode::UNEXPECTED,
            message: "unexpected error".to_string(),
            detail: detail.into(),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        RelayError::new(ErrorCode::Disconnected, message, "")
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        RelayError::new(ErrorCode::MethodNotFound, message, "")
    }

    pub fn service_not_found(message: impl Into<String>) -> Self {
        RelayError::new(ErrorCode::ServiceNotFound, message, "")
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        RelayError::new(ErrorCode::TypeMismatch, message, "")
    }

    pub fn unsupported_type(message: impl Into<String>) -> Self {
        RelayError::new(ErrorCode::UnsupportedType, message, "")
    }

    pub fn signature_syntax(message: impl Into<String>, signature: impl Into<String>) -> Self {
        RelayError::new(ErrorCode::SignatureSyntax, message, signature)
    }

    pub fn out_of_data(message: impl Into<String>) -> Self {
        RelayError::OutOfData {
            message: message.into(),
            detail: String::new(),
        }
    }

    /// Wire code carried in Exception frames.
    ///
    /// Decode failures past the end of a block travel as `TypeMismatch`; local
    /// IO, JSON and configuration failures travel as `Application`.
    pub fn code(&self) -> u8 {
        let code = match self {
            RelayError::SignatureSyntax { .. } => ErrorCode::SignatureSyntax,
            RelayError::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            RelayError::MethodAmbiguous { .. } => ErrorCode::MethodAmbiguous,
            RelayError::IncompatibleSignature { .. } => ErrorCode::IncompatibleMethodSignature,
            RelayError::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            RelayError::ModuleNotFound { .. } => ErrorCode::ModuleNotFound,
            RelayError::ModuleStart { .. } => ErrorCode::ModuleStart,
            RelayError::ModuleDefinition { .. } => ErrorCode::ModuleDefinition,
            RelayError::CategorySyntax { .. } => ErrorCode::IncorrectCategorySyntax,
            RelayError::TypeMismatch { .. } | RelayError::OutOfData { .. } => {
                ErrorCode::TypeMismatch
            }
            RelayError::UnsupportedType { .. } => ErrorCode::UnsupportedType,
            RelayError::SecurityDenied { .. } => ErrorCode::SecurityDenied,
            RelayError::Disconnected { .. } => ErrorCode::Disconnected,
            RelayError::Communication { .. } => ErrorCode::Communication,
            RelayError::BrokerStart { .. } => ErrorCode::BrokerStart,
            RelayError::Application { code, .. } => return *code,
            RelayError::Io { .. } | RelayError::Json { .. } | RelayError::Config { .. } => {
                ErrorCode::Application
            }
        };
        code.as_u8()
    }

    /// Typed view of [`code`](Self::code).
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_u8(self.code())
    }

    /// Short, user-facing message.
    pub fn user_message(&self) -> &str {
        match self {
            RelayError::SignatureSyntax { message, .. }
            | RelayError::MethodNotFound { message, .. }
            | RelayError::MethodAmbiguous { message, .. }
            | RelayError::IncompatibleSignature { message, .. }
            | RelayError::ServiceNotFound { message, .. }
            | RelayError::ModuleNotFound { message, .. }
            | RelayError::ModuleStart { message, .. }
            | RelayError::ModuleDefinition { message, .. }
            | RelayError::CategorySyntax { message, .. }
            | RelayError::TypeMismatch { message, .. }
            | RelayError::OutOfData { message, .. }
            | RelayError::UnsupportedType { message, .. }
            | RelayError::SecurityDenied { message, .. }
            | RelayError::Disconnected { message, .. }
            | RelayError::Communication { message, .. }
            | RelayError::BrokerStart { message, .. }
            | RelayError::Application { message, .. }
            | RelayError::Io { message, .. }
            | RelayError::Json { message, .. }
            | RelayError::Config { message } => message,
        }
    }

    /// Longer diagnostic message. Empty when the error has none.
    pub fn detail(&self) -> &str {
        match self {
            RelayError::SignatureSyntax { detail, .. }
            | RelayError::MethodNotFound { detail, .. }
            | RelayError::MethodAmbiguous { detail, .. }
            | RelayError::IncompatibleSignature { detail, .. }
            | RelayError::ServiceNotFound { detail, .. }
            | RelayError::ModuleNotFound { detail, .. }
            | RelayError::ModuleStart { detail, .. }
            | RelayError::ModuleDefinition { detail, .. }
            | RelayError::CategorySyntax { detail, .. }
            | RelayError::TypeMismatch { detail, .. }
            | RelayError::OutOfData { detail, .. }
            | RelayError::UnsupportedType { detail, .. }
            | RelayError::SecurityDenied { detail, .. }
            | RelayError::Disconnected { detail, .. }
            | RelayError::Communication { detail, .. }
            | RelayError::BrokerStart { detail, .. }
            | RelayError::Application { detail, .. } => detail,
            RelayError::Io { .. } | RelayError::Json { .. } | RelayError::Config { .. } => "",
        }
    }

    /// Check if this error means the peer or the session went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RelayError::Disconnected { .. })
    }
}
