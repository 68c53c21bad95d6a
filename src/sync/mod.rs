//! Dual-store persistence.
//!
//! Every mutation goes to the primary store first and then, whatever the
//! primary outcome, to the backup store. Failures never propagate to the
//! caller: they are logged and kept as [`Divergence`] entries until taken.
//! On load, each `(media type, status, rewatch)` combination is read from the
//! primary; an empty combination is refilled from the backup and the recovered
//! records are written back to the primary.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::models::{Item, RecordKey};
use crate::store::{RecordFilter, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Upsert,
    Delete,
    Query,
    Heal,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOp::Upsert => "upsert",
            SyncOp::Delete => "delete",
            SyncOp::Query => "query",
            SyncOp::Heal => "heal",
        };
        f.write_str(name)
    }
}

/// A backend operation that failed, leaving the two stores possibly out of step.
#[derive(Debug, Clone)]
pub struct Divergence {
    pub backend: &'static str,
    pub op: SyncOp,
    pub target: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub from_primary: usize,
    pub from_backup: usize,
    /// Combinations that came back empty from the primary and were refilled.
    pub recovered: Vec<RecordFilter>,
}

pub struct Synchronizer {
    primary: Arc<dyn RecordStore>,
    backup: Arc<dyn RecordStore>,
    divergences: Vec<Divergence>,
}

impl Synchronizer {
    pub fn new(primary: Arc<dyn RecordStore>, backup: Arc<dyn RecordStore>) -> Self {
        Self {
            primary,
            backup,
            divergences: Vec::new(),
        }
    }

    pub fn divergences(&self) -> &[Divergence] {
        &self.divergences
    }

    pub fn take_divergences(&mut self) -> Vec<Divergence> {
        std::mem::take(&mut self.divergences)
    }

    fn report(&mut self, backend: &'static str, op: SyncOp, target: String, message: String) {
        warn!("{} store {} failed for {}: {}", backend, op, target, message);
        self.divergences.push(Divergence {
            backend,
            op,
            target,
            message,
            at: Utc::now(),
        });
    }

    #[instrument(skip(self, item), fields(key = %item.record_key()))]
    pub async fn write(&mut self, item: &Item) {
        let target = item.record_key().to_string();

        if let Err(e) = self.primary.upsert(item).await {
            let backend = self.primary.name();
            self.report(backend, SyncOp::Upsert, target.clone(), e.to_string());
        }

        if let Err(e) = self.backup.upsert(item).await {
            let backend = self.backup.name();
            self.report(backend, SyncOp::Upsert, target, e.to_string());
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&mut self, key: &RecordKey) {
        let target = key.to_string();

        if let Err(e) = self.primary.delete(key).await {
            let backend = self.primary.name();
            self.report(backend, SyncOp::Delete, target.clone(), e.to_string());
        }

        if let Err(e) = self.backup.delete(key).await {
            let backend = self.backup.name();
            self.report(backend, SyncOp::Delete, target, e.to_string());
        }
    }

    /// Load every record, preferring the primary per combination.
    ///
    /// A record key is returned at most once. When the primary holds a key
    /// under one combination and the backup refilled it under another, the
    /// backup copy wins: it is the later write and has just been healed into
    /// the primary.
    pub async fn load_all(&mut self) -> (Vec<Item>, LoadReport) {
        let mut items = Vec::new();
        let mut recovered_items = Vec::new();
        let mut report = LoadReport::default();

        for filter in RecordFilter::all() {
            let from_primary = match self.primary.query(filter).await {
                Ok(records) => records,
                Err(e) => {
                    let backend = self.primary.name();
                    self.report(backend, SyncOp::Query, filter.to_string(), e.to_string());
                    Vec::new()
                }
            };

            if !from_primary.is_empty() {
                items.extend(from_primary);
                continue;
            }

            let recovered = match self.backup.query(filter).await {
                Ok(records) => records,
                Err(e) => {
                    let backend = self.backup.name();
                    self.report(backend, SyncOp::Query, filter.to_string(), e.to_string());
                    continue;
                }
            };

            if recovered.is_empty() {
                continue;
            }

            info!("Recovering {} records for {} from backup", recovered.len(), filter);
            for record in &recovered {
                if let Err(e) = self.primary.upsert(record).await {
                    let backend = self.primary.name();
                    let target = record.record_key().to_string();
                    self.report(backend, SyncOp::Heal, target, e.to_string());
                }
            }

            report.from_backup += recovered.len();
            report.recovered.push(filter);
            recovered_items.extend(recovered);
        }

        let recovered_keys: HashSet<RecordKey> =
            recovered_items.iter().map(Item::record_key).collect();
        items.retain(|item| {
            let stale = recovered_keys.contains(&item.record_key());
            if stale {
                warn!(
                    "Dropping stale primary copy of {} filed as {}",
                    item.record_key(),
                    item.status
                );
            }
            !stale
        });
        report.from_primary = items.len();
        items.extend(recovered_items);

        debug!(
            "Loaded {} records from primary, {} from backup",
            report.from_primary, report.from_backup
        );
        (items, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaType, Status};
    use crate::store::MemoryStore;

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::new("primary")),
            Arc::new(MemoryStore::new("backup")),
        )
    }

    #[tokio::test]
    async fn test_backup_written_when_primary_fails() {
        let (primary, backup) = stores();
        let mut sync = Synchronizer::new(primary.clone(), backup.clone());
        primary.set_fail_writes(true);

        let item = Item::new(1, MediaType::Anime, "Planetes", Status::Planned);
        sync.write(&item).await;

        assert!(primary.records().is_empty());
        assert_eq!(backup.records(), vec![item]);
        assert_eq!(sync.divergences().len(), 1);
        assert_eq!(sync.divergences()[0].backend, "primary");
        assert_eq!(sync.divergences()[0].op, SyncOp::Upsert);
    }

    #[tokio::test]
    async fn test_populated_sibling_category_is_not_touched() {
        let (primary, backup) = stores();
        let planned = Item::new(1, MediaType::Anime, "Planetes", Status::Planned);
        let stale_planned = Item::new(9, MediaType::Anime, "Stale", Status::Planned);
        let dropped = Item::new(2, MediaType::Anime, "Gate", Status::Dropped);

        primary.upsert(&planned).await.unwrap();
        backup.upsert(&stale_planned).await.unwrap();
        backup.upsert(&dropped).await.unwrap();

        let mut sync = Synchronizer::new(primary.clone(), backup.clone());
        let (items, report) = sync.load_all().await;

        assert_eq!(items.len(), 2);
        assert!(items.contains(&planned));
        assert!(items.contains(&dropped));
        assert!(!items.contains(&stale_planned));
        assert_eq!(report.from_primary, 1);
        assert_eq!(report.from_backup, 1);
        assert_eq!(
            report.recovered,
            vec![RecordFilter {
                media_type: MediaType::Anime,
                status: Status::Dropped,
                is_rewatch: false,
            }]
        );
        assert!(primary.records().contains(&dropped));
    }

    #[tokio::test]
    async fn test_record_key_loaded_once_when_stores_disagree_on_status() {
        let (primary, backup) = stores();
        let planned = Item::new(1, MediaType::Anime, "Planetes", Status::Planned);
        let completed = planned.with_status(Status::Completed);
        let other = Item::new(2, MediaType::Anime, "Gate", Status::Planned);
        primary.upsert(&planned).await.unwrap();
        primary.upsert(&other).await.unwrap();
        backup.upsert(&completed).await.unwrap();
        backup.upsert(&other).await.unwrap();

        let mut sync = Synchronizer::new(primary.clone(), backup.clone());
        let (items, report) = sync.load_all().await;

        assert_eq!(items.len(), 2);
        assert!(items.contains(&completed));
        assert!(items.contains(&other));
        assert_eq!(report.from_primary, 1);
        assert_eq!(report.from_backup, 1);

        let mut healed = primary.records();
        healed.sort_by_key(|r| r.media_id);
        assert_eq!(healed, vec![completed, other]);
    }

    #[tokio::test]
    async fn test_failed_primary_read_falls_back_to_backup() {
        let (primary, backup) = stores();
        let item = Item::new(3, MediaType::Manga, "Blame!", Status::Completed);
        backup.upsert(&item).await.unwrap();
        primary.set_fail_reads(true);

        let mut sync = Synchronizer::new(primary.clone(), backup.clone());
        let (items, _) = sync.load_all().await;

        assert_eq!(items, vec![item.clone()]);
        assert!(primary.records().contains(&item));
        assert!(sync.divergences().iter().all(|d| d.op == SyncOp::Query));
    }
}
