//! Repeat cycles of titles that have already been completed once.
//!
//! Rewatch numbers are handed out first-fit, so a number freed by a deleted
//! rewatch is reused. [`RewatchManager::cleanup_and_renumber`] compacts the
//! completed rewatches of a title to `1..=K` and puts the running rewatch at
//! `K + 1`; it is run whenever a title's detail is opened.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::library::Library;
use crate::models::{Item, ItemKey, Shelf, Status};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenumberReport {
    /// `(old, new)` numbers of completed rewatches that moved.
    pub renumbered: Vec<(u32, u32)>,
    /// `(old, new)` number of the running rewatch, if it had to be corrected.
    pub active_corrected: Option<(u32, u32)>,
}

impl RenumberReport {
    pub fn is_unchanged(&self) -> bool {
        self.renumbered.is_empty() && self.active_corrected.is_none()
    }
}

pub struct RewatchManager<'a> {
    library: &'a mut Library,
}

impl<'a> RewatchManager<'a> {
    pub fn new(library: &'a mut Library) -> Self {
        Self { library }
    }

    /// Smallest positive number not used by any rewatch of the title.
    pub fn next_rewatch_number(&self, key: ItemKey) -> u32 {
        let used: HashSet<u32> = self
            .library
            .rewatches(key)
            .into_iter()
            .map(|r| r.rewatch_count)
            .collect();

        (1..).find(|n| !used.contains(n)).unwrap_or(1)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn start_rewatch(
        &mut self,
        key: ItemKey,
        started: Option<DateTime<Utc>>,
    ) -> Result<Item> {
        if !self.library.has_completed(key) {
            return Err(Error::NotEligible(key));
        }
        if self.library.active_rewatch(key).is_some() {
            return Err(Error::RewatchInProgress(key));
        }

        let base = match self.library.primary(key) {
            Some(primary) => primary.clone(),
            None => self
                .library
                .completed_rewatches(key)
                .pop()
                .ok_or(Error::NotEligible(key))?,
        };

        let number = self.next_rewatch_number(key);
        let rewatch = base.as_rewatch(number, started.unwrap_or_else(Utc::now));

        info!("Starting rewatch #{} of {}", number, base.title);
        Ok(self.library.add_item(rewatch).await)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn complete_rewatch(
        &mut self,
        key: ItemKey,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Item> {
        let active = self
            .library
            .active_rewatch(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no rewatch in progress for {}", key)))?;

        let completed = active.completed_at(end_date.unwrap_or_else(Utc::now));
        let record_key = active.record_key();

        self.library
            .remove_from(Shelf::Bucket(Status::InProgress), &record_key)
            .await;
        if self
            .library
            .remove_from(Shelf::CompletedRewatches, &record_key)
            .await
            .is_some()
        {
            warn!("Replaced an existing completed rewatch #{}", record_key.rewatch_count);
        }

        info!("Completed rewatch #{} of {}", completed.rewatch_count, completed.title);
        Ok(self.library.add_item(completed).await)
    }

    /// Compact completed rewatch numbers to `1..=K` (ordered by current number)
    /// and set the running rewatch to `K + 1`. Running it twice changes nothing.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn cleanup_and_renumber(&mut self, key: ItemKey) -> RenumberReport {
        let completed = self.library.completed_rewatches(key);

        let moves: Vec<(Item, Item)> = completed
            .iter()
            .enumerate()
            .filter(|(index, item)| item.rewatch_count != *index as u32 + 1)
            .map(|(index, item)| (item.clone(), item.with_rewatch_count(index as u32 + 1)))
            .collect();

        let expected = completed.len() as u32 + 1;
        let active_fix = self
            .library
            .active_rewatch(key)
            .filter(|active| active.rewatch_count != expected)
            .map(|active| (active.clone(), active.with_rewatch_count(expected)));

        let report = RenumberReport {
            renumbered: moves
                .iter()
                .map(|(old, new)| (old.rewatch_count, new.rewatch_count))
                .collect(),
            active_corrected: active_fix
                .as_ref()
                .map(|(old, new)| (old.rewatch_count, new.rewatch_count)),
        };

        if report.is_unchanged() {
            return report;
        }

        // Vacate every old slot before filling new ones so that colliding
        // numbers never evict a record that is about to be renumbered.
        for (old, _) in &moves {
            self.library.remove_record(old).await;
        }
        if let Some((old, _)) = &active_fix {
            self.library.remove_record(old).await;
        }

        for (_, new) in moves {
            self.library.add_item(new).await;
        }
        if let Some((_, new)) = active_fix {
            self.library.add_item(new).await;
        }

        info!(
            "Renumbered {} completed rewatches{}",
            report.renumbered.len(),
            if report.active_corrected.is_some() {
                " and corrected the running rewatch"
            } else {
                ""
            }
        );
        report
    }
}
