use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};
use url::Url;

use super::{MetadataSource, TitleMetadata};
use crate::config::MetadataConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::models::MediaType;

/// Jikan v4 (MyAnimeList) client.
pub struct JikanClient {
    http: HttpClient,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct JikanResponse {
    data: JikanEntry,
}

#[derive(Debug, Deserialize)]
struct JikanEntry {
    title: String,
    #[serde(default)]
    images: Option<JikanImages>,
    #[serde(default)]
    genres: Vec<JikanGenre>,
    synopsis: Option<String>,
    episodes: Option<u32>,
    chapters: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct JikanImages {
    jpg: Option<JikanImage>,
}

#[derive(Debug, Deserialize)]
struct JikanImage {
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JikanGenre {
    name: String,
}

impl JikanClient {
    pub fn new(http: HttpClient, config: &MetadataConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            Error::InvalidInput(format!("bad metadata base url '{}': {}", config.base_url, e))
        })?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, media_id: i64, media_type: MediaType) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .push(media_type.as_str())
            .push(&media_id.to_string());
        Ok(url)
    }

    fn to_metadata(entry: JikanEntry, media_type: MediaType) -> TitleMetadata {
        let total_units = match media_type {
            MediaType::Anime => entry.episodes,
            MediaType::Manga => entry.chapters,
        };

        TitleMetadata {
            title: entry.title,
            cover_image: entry
                .images
                .and_then(|i| i.jpg)
                .and_then(|i| i.image_url)
                .unwrap_or_default(),
            genres: entry.genres.into_iter().map(|g| g.name).collect(),
            summary: entry.synopsis,
            total_units,
        }
    }
}

#[async_trait]
impl MetadataSource for JikanClient {
    #[instrument(skip(self))]
    async fn fetch_title_metadata(
        &self,
        media_id: i64,
        media_type: MediaType,
    ) -> Result<TitleMetadata> {
        let url = self.endpoint(media_id, media_type)?;
        let response: JikanResponse = self.http.get_json(&url).await?;
        let metadata = Self::to_metadata(response.data, media_type);

        info!("Fetched metadata for {} {}: {}", media_type, media_id, metadata.title);
        Ok(metadata)
    }
}
