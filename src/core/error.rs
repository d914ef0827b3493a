use thiserror::Error;

pub type Result<T> = std::result::Result<T, ComicError>;

#[derive(Debug, Error)]
pub enum ComicError {
    /// No credential or an unusable setting (font, endpoint).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The generation service failed or answered with an unexpected shape.
    #[error("{0}")]
    Upstream(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Some panels of a concurrent batch failed; the successful ones were kept.
    #[error("panel {} failed: {first}", .failed.first().copied().unwrap_or_default())]
    PartialStageFailure {
        failed: Vec<usize>,
        first: Box<ComicError>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ComicError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<reqwest::Error> for ComicError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for ComicError {
    fn from(err: serde_json::Error) -> Self {
        Self::Upstream(format!("Failed to parse response JSON: {}", err))
    }
}
