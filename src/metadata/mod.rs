//! Title metadata lookup, used only when a title is filed for the first time.

mod jikan;

pub use jikan::JikanClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::MediaType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitleMetadata {
    pub title: String,
    pub cover_image: String,
    pub genres: Vec<String>,
    pub summary: Option<String>,
    /// Episode count for anime, chapter count for manga.
    pub total_units: Option<u32>,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_title_metadata(
        &self,
        media_id: i64,
        media_type: MediaType,
    ) -> Result<TitleMetadata>;
}
