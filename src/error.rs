use std::path::PathBuf;

use serde::Serialize;

/// Classification of why a single caption attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The local path does not exist.
    NotFound,
    /// The bytes could not be parsed as an image.
    DecodeError,
    /// The remote image could not be downloaded.
    NetworkError,
    /// Tensor preparation or generation failed.
    InferenceError,
}

impl ErrorKind {
    /// Returns the kind as a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::InferenceError => "inference_error",
        }
    }

    /// Whether the failure happened while acquiring the image.
    pub fn is_resolve_failure(&self) -> bool {
        !matches!(self, ErrorKind::InferenceError)
    }
}

/// Per-item failure returned by the resolver and the caption generator.
#[derive(thiserror::Error, Debug)]
pub enum CaptionError {
    /// The local path does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The bytes were read but are not a decodable image.
    #[error("cannot decode image from {origin}: {reason}")]
    Decode { origin: String, reason: String },

    /// The url could not be downloaded.
    #[error("cannot fetch {url}: {reason}")]
    Network { url: String, reason: String },

    /// The model failed on a decoded image.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl CaptionError {
    /// Classifies the error into the kind reported to the operator.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptionError::NotFound(_) => ErrorKind::NotFound,
            CaptionError::Decode { .. } => ErrorKind::DecodeError,
            CaptionError::Network { .. } => ErrorKind::NetworkError,
            CaptionError::Inference(_) => ErrorKind::InferenceError,
        }
    }
}

/// Fatal failure while loading the captioning model.
#[derive(thiserror::Error, Debug)]
pub enum ModelLoadError {
    #[error(transparent)]
    HubError(#[from] hf_hub::api::sync::ApiError),

    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    #[error(transparent)]
    TokenizerError(#[from] tokenizers::Error),

    #[error(transparent)]
    ImageError(#[from] kornia_image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        let err = CaptionError::NotFound(PathBuf::from("missing.jpg"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "file not found: missing.jpg");

        let err = CaptionError::Inference("boom".to_string());
        assert_eq!(err.kind(), ErrorKind::InferenceError);
        assert!(!err.kind().is_resolve_failure());
        assert!(ErrorKind::NetworkError.is_resolve_failure());
    }
}
