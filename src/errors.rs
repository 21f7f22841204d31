use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("campaign id `{0}` must be two tokens joined by `_` (project id and tracking id)")]
    InvalidCampaignId(String),
    #[error("a domain is required to look up rankings")]
    MissingDomain,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
    #[error("provider returned no usable data: {0}")]
    Provider(String),
}

impl AppError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AppError::InvalidCampaignId(_) | AppError::MissingDomain | AppError::Config(_)
        )
    }
}
