//! In-memory partition of the library into status buckets.
//!
//! `Library` is the only owner of the bucket collections. The rewatch manager
//! and the tournament engine go through its insert/remove operations so the
//! one-slot rule is enforced in a single place: adding a record evicts every
//! other record with the same [`RecordKey`] from every shelf. For primary
//! records this is what keeps a title in exactly one status bucket.

use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::models::{Category, Item, ItemKey, MediaType, RecordKey, Shelf, Status};
use crate::sync::{Divergence, LoadReport, Synchronizer};

pub struct Library {
    shelves: HashMap<(MediaType, Shelf), Vec<Item>>,
    sync: Synchronizer,
}

impl Library {
    pub fn new(sync: Synchronizer) -> Self {
        Self {
            shelves: HashMap::new(),
            sync,
        }
    }

    /// Build the library from both stores, refilling empty combinations from backup.
    pub async fn load(mut sync: Synchronizer) -> (Self, LoadReport) {
        let (items, report) = sync.load_all().await;
        let mut library = Self::new(sync);

        for item in items {
            library
                .shelves
                .entry((item.media_type, item.shelf()))
                .or_default()
                .push(item);
        }
        for bucket in library.shelves.values_mut() {
            sort_by_rank(bucket);
        }

        info!(
            "Library loaded: {} records ({} recovered from backup)",
            library.len(),
            report.from_backup
        );
        (library, report)
    }

    pub fn len(&self) -> usize {
        self.shelves.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn divergences(&self) -> &[Divergence] {
        self.sync.divergences()
    }

    pub fn take_divergences(&mut self) -> Vec<Divergence> {
        self.sync.take_divergences()
    }

    /// Items of one bucket, in list order.
    pub fn items(&self, category: Category) -> &[Item] {
        self.shelf(category.media_type, Shelf::Bucket(category.status))
    }

    fn shelf(&self, media_type: MediaType, shelf: Shelf) -> &[Item] {
        self.shelves
            .get(&(media_type, shelf))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn all_records(&self, media_type: MediaType) -> impl Iterator<Item = &Item> {
        self.shelves
            .iter()
            .filter(move |((t, _), _)| *t == media_type)
            .flat_map(|(_, items)| items.iter())
    }

    pub fn find(&self, key: &RecordKey) -> Option<&Item> {
        self.all_records(key.media_type).find(|i| i.record_key() == *key)
    }

    /// The non-rewatch record for a title, in whatever bucket it is filed.
    pub fn primary(&self, key: ItemKey) -> Option<&Item> {
        self.find(&RecordKey::primary(key))
    }

    /// The currently running rewatch, if any.
    pub fn active_rewatch(&self, key: ItemKey) -> Option<&Item> {
        self.shelf(key.media_type, Shelf::Bucket(Status::InProgress))
            .iter()
            .find(|i| i.is_rewatch && i.item_key() == key)
    }

    /// Completed rewatches of a title ordered by cycle number.
    pub fn completed_rewatches(&self, key: ItemKey) -> Vec<Item> {
        let mut rewatches: Vec<Item> = self
            .shelf(key.media_type, Shelf::CompletedRewatches)
            .iter()
            .filter(|i| i.item_key() == key)
            .cloned()
            .collect();
        rewatches.sort_by_key(|i| i.rewatch_count);
        rewatches
    }

    /// Every rewatch record of a title, on any shelf.
    pub fn rewatches(&self, key: ItemKey) -> Vec<&Item> {
        self.all_records(key.media_type)
            .filter(|i| i.is_rewatch && i.item_key() == key)
            .collect()
    }

    pub fn has_rewatches(&self, key: ItemKey) -> bool {
        !self.rewatches(key).is_empty()
    }

    /// Status shown for a title: a running rewatch wins over the primary record.
    pub fn find_current_status(&self, key: ItemKey) -> Option<Status> {
        if self.active_rewatch(key).is_some() {
            return Some(Status::InProgress);
        }
        if let Some(primary) = self.primary(key) {
            return Some(primary.status);
        }
        if !self.completed_rewatches(key).is_empty() {
            return Some(Status::Completed);
        }
        None
    }

    /// Whether the title has finished at least one full cycle.
    pub fn has_completed(&self, key: ItemKey) -> bool {
        self.primary(key).map(|p| p.status == Status::Completed).unwrap_or(false)
            || !self.completed_rewatches(key).is_empty()
    }

    /// File or move a record. Any other record holding the same record key is
    /// evicted first; a record that stays on the same shelf keeps its position.
    #[instrument(skip(self, item), fields(key = %item.record_key(), status = %item.status))]
    pub async fn add_item(&mut self, item: Item) -> Item {
        let key = item.record_key();
        let target = (item.media_type, item.shelf());

        let mut position = None;
        for (slot, items) in self.shelves.iter_mut() {
            if slot.0 != item.media_type {
                continue;
            }
            if *slot == target {
                position = items.iter().position(|i| i.record_key() == key);
            }
            items.retain(|i| i.record_key() != key);
        }

        let bucket = self.shelves.entry(target).or_default();
        match position {
            Some(index) => bucket.insert(index, item.clone()),
            None => bucket.push(item.clone()),
        }

        debug!("Filed record");
        self.sync.write(&item).await;
        item
    }

    /// Remove a record from wherever it is filed. A primary record cannot be
    /// removed while completed rewatches of the title exist.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove_item(&mut self, key: &RecordKey) -> Result<Item> {
        let shelf = self
            .find(key)
            .map(Item::shelf)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        if !key.is_rewatch && !self.completed_rewatches(key.item_key()).is_empty() {
            return Err(Error::HasRewatches(*key));
        }

        self.remove_from(shelf, key)
            .await
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Remove a record from one specific shelf. The stored record is deleted
    /// only when no other in-memory record still holds its key.
    pub async fn remove_from(&mut self, shelf: Shelf, key: &RecordKey) -> Option<Item> {
        let items = self.shelves.get_mut(&(key.media_type, shelf))?;
        let index = items.iter().position(|i| i.record_key() == *key)?;
        let removed = items.remove(index);

        if self.find(key).is_none() {
            self.sync.delete(key).await;
        }
        Some(removed)
    }

    /// Remove this exact record (all fields equal) from its shelf.
    pub(crate) async fn remove_record(&mut self, record: &Item) -> bool {
        let key = record.record_key();
        let Some(items) = self.shelves.get_mut(&(record.media_type, record.shelf())) else {
            return false;
        };
        let Some(index) = items.iter().position(|i| i == record) else {
            return false;
        };
        items.remove(index);

        if self.find(&key).is_none() {
            self.sync.delete(&key).await;
        }
        true
    }

    fn locate_mut(&mut self, key: &RecordKey) -> Option<&mut Item> {
        self.shelves
            .iter_mut()
            .filter(|((t, _), _)| *t == key.media_type)
            .flat_map(|(_, items)| items.iter_mut())
            .find(|i| i.record_key() == *key)
    }

    async fn replace_in_place(
        &mut self,
        key: &RecordKey,
        update: impl FnOnce(&Item) -> Item,
    ) -> Result<Item> {
        let slot = self
            .locate_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let updated = update(slot);
        *slot = updated.clone();

        self.sync.write(&updated).await;
        Ok(updated)
    }

    pub async fn update_progress(&mut self, key: &RecordKey, progress: u32) -> Result<Item> {
        self.replace_in_place(key, |item| item.with_progress(progress)).await
    }

    pub async fn update_rating(&mut self, key: &RecordKey, score: u32) -> Result<Item> {
        self.replace_in_place(key, |item| item.with_score(score)).await
    }

    /// Drag-reorder inside one bucket; every item gets `rank = position + 1`.
    #[instrument(skip(self), fields(category = %category))]
    pub async fn move_item(&mut self, category: Category, from: usize, to: usize) -> Result<()> {
        let bucket = self
            .shelves
            .entry((category.media_type, Shelf::Bucket(category.status)))
            .or_default();

        if from >= bucket.len() || to >= bucket.len() {
            return Err(Error::InvalidInput(format!(
                "cannot move position {} to {} in a list of {}",
                from,
                to,
                bucket.len()
            )));
        }

        let item = bucket.remove(from);
        bucket.insert(to, item);

        let mut changed = Vec::new();
        for (index, item) in bucket.iter_mut().enumerate() {
            let rank = index as u32 + 1;
            if item.rank != rank {
                item.rank = rank;
                changed.push(item.clone());
            }
        }

        for item in &changed {
            self.sync.write(item).await;
        }
        Ok(())
    }

    /// Set ranks within one bucket and reorder it by rank.
    #[instrument(skip(self, ranks), fields(category = %category, count = ranks.len()))]
    pub async fn apply_ranks(&mut self, category: Category, ranks: &[(RecordKey, u32)]) {
        let bucket = self
            .shelves
            .entry((category.media_type, Shelf::Bucket(category.status)))
            .or_default();

        let mut changed = Vec::new();
        for (key, rank) in ranks {
            if let Some(item) = bucket.iter_mut().find(|i| i.record_key() == *key) {
                if item.rank != *rank {
                    item.rank = *rank;
                    changed.push(item.clone());
                }
            }
        }
        sort_by_rank(bucket);

        for item in &changed {
            self.sync.write(item).await;
        }
        info!("Applied {} rank changes", changed.len());
    }
}

/// Ranked items first in ascending rank, unranked after; stable otherwise.
fn sort_by_rank(items: &mut [Item]) {
    items.sort_by_key(|i| (i.rank == 0, i.rank));
}
