//! Persistence backends.
//!
//! Both backends implement [`RecordStore`] and are keyed by [`RecordKey`]:
//! - [`SqliteStore`]: the primary, structured and queryable store
//! - [`BackupStore`]: a flat JSON list rewritten on every change, used as the
//!   recovery source when the primary comes back empty
//! - [`MemoryStore`]: in-process store with switchable failures

mod backup;
mod memory;
mod sqlite;

pub use backup::{BackupRecord, BackupStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Item, MediaType, RecordKey, Status};

/// One `(media type, status, rewatch)` combination as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordFilter {
    pub media_type: MediaType,
    pub status: Status,
    pub is_rewatch: bool,
}

impl RecordFilter {
    /// Every combination `load_all` has to reconcile.
    pub fn all() -> Vec<RecordFilter> {
        let mut filters = Vec::new();
        for media_type in MediaType::ALL {
            for status in Status::ALL {
                for is_rewatch in [false, true] {
                    filters.push(RecordFilter {
                        media_type,
                        status,
                        is_rewatch,
                    });
                }
            }
        }
        filters
    }

    pub fn matches(&self, item: &Item) -> bool {
        item.media_type == self.media_type
            && item.status == self.status
            && item.is_rewatch == self.is_rewatch
    }
}

impl std::fmt::Display for RecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}{}",
            self.media_type,
            self.status,
            if self.is_rewatch { "/rewatch" } else { "" }
        )
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend name used in logs and divergence reports.
    fn name(&self) -> &'static str;

    /// Update the record with the same key, or insert it.
    async fn upsert(&self, item: &Item) -> Result<()>;

    async fn delete(&self, key: &RecordKey) -> Result<()>;

    async fn query(&self, filter: RecordFilter) -> Result<Vec<Item>>;
}
