use thiserror::Error;

/// Message shown to the user when a streamed or single-shot generation fails.
/// The underlying detail is logged, never shown.
pub const ERROR_MSG: &str = "Error, please retry";

/// Message committed to history when a non-streaming call fails.
pub const PROCESSING_ERROR_MSG: &str = "Error occurred during processing";

/// Error types that can occur while talking to the inference endpoint or
/// mutating a chat session.
#[derive(Error, Debug)]
pub enum DemoError {
    /// Non-success status, connection failure or stalled read.
    #[error("Transport Error: {0}")]
    Transport(String),

    /// A stream line that could not be decoded.
    #[error("Protocol Error: {message}. Raw line: '{raw_line}'")]
    Protocol { message: String, raw_line: String },

    /// The endpoint reported a failure inside the model call.
    #[error("Endpoint Error: {0}")]
    Endpoint(String),

    /// The turn was rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// A generation is already in flight for this session.
    #[error("Session Busy: {0}")]
    Busy(String),

    #[error("Config Error: {0}")]
    Config(String),

    /// Handles JSON serialization and deserialization errors.
    #[error("JSON Error")]
    Json(#[from] serde_json::Error),

    /// Handles standard I/O errors.
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
}

impl DemoError {
    /// Whether the error happened before anything was sent, so nothing in the
    /// session has been touched.
    pub fn is_rejection(&self) -> bool {
        matches!(self, DemoError::Validation(_) | DemoError::Busy(_))
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for DemoError {
    fn from(err: reqwest::Error) -> Self {
        DemoError::Transport(err.to_string())
    }
}

impl From<toml::de::Error> for DemoError {
    fn from(err: toml::de::Error) -> Self {
        DemoError::Config(err.to_string())
    }
}

impl From<url::ParseError> for DemoError {
    fn from(err: url::ParseError) -> Self {
        DemoError::Config(format!("invalid url: {}", err))
    }
}
