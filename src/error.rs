use serde::Serialize;
use thiserror::Error;

use crate::downloader::FetchError;

/// Errors that abort a clone. Per-asset failures never surface here; they are
/// recorded on the asset's registry entry instead.
#[derive(Error, Debug)]
pub enum CloneError {
    #[error("missing `url` parameter")]
    MissingUrl,
    #[error("invalid url `{0}`: must start with http:// or https://")]
    InvalidUrl(String),
    #[error("failed to fetch page {url}")]
    PageFetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to set up HTTP client")]
    Client(#[source] FetchError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("failed to build archive")]
    Package(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structured failure payload: a human-readable message plus the underlying
/// cause when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CloneError {
    /// Bad or missing input, detected before any network activity.
    pub fn is_client_error(&self) -> bool {
        matches!(self, CloneError::MissingUrl | CloneError::InvalidUrl(_))
    }

    /// HTTP-style status distinguishing client input errors from processing failures.
    pub fn status_code(&self) -> u16 {
        match self {
            CloneError::MissingUrl | CloneError::InvalidUrl(_) => 400,
            CloneError::PageFetch { .. } => 502,
            _ => 500,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let details = std::error::Error::source(self).map(|cause| cause.to_string());
        ErrorReport {
            message: self.to_string(),
            details,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloneError>;
