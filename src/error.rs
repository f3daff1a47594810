// File: ./src/error.rs
// Error taxonomy shared by the refresh pipeline.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrayerError {
    /// Location or notification permission was refused.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    /// Transport failure, non-success HTTP status or non-200 application code.
    #[error("Prayer-time source unavailable: {0}")]
    SourceUnavailable(String),

    /// The lookup answered but the payload was incomplete or malformed.
    #[error("Prayer-time source returned invalid data: {0}")]
    SourceDataInvalid(String),

    #[error("Invalid clock value: {0}")]
    Format(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Notification facility error: {0}")]
    Notification(String),

    /// A setting or registration parameter is out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PrayerError {
    /// True for failures the user has to resolve (granting a permission).
    pub fn needs_user_action(&self) -> bool {
        matches!(self, PrayerError::PermissionDenied(_))
    }
}

impl From<std::io::Error> for PrayerError {
    fn from(e: std::io::Error) -> Self {
        PrayerError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for PrayerError {
    fn from(e: serde_json::Error) -> Self {
        PrayerError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrayerError>;
