use thiserror::Error;

use crate::models::{Category, ItemKey, RecordKey};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not enough items in {category} to rank: found {found}, need at least 2")]
    NotEnoughItems { category: Category, found: usize },

    #[error("{0} has never been completed")]
    NotEligible(ItemKey),

    #[error("{0} already has a rewatch in progress")]
    RewatchInProgress(ItemKey),

    #[error("{0} still has completed rewatches and cannot be removed")]
    HasRewatches(RecordKey),

    #[error("Invalid choice: {0}")]
    InvalidChoice(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Metadata error: {0}")]
    Metadata(String),
}
