//! The process-wide context handed to every caller.
//!
//! `Tracker` is built once at startup and owns the library, the tournament
//! engine, the saved-session file and the metadata source.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::library::Library;
use crate::metadata::MetadataSource;
use crate::models::{Category, Item, ItemKey, MediaType, RecordKey, Status};
use crate::rewatch::{RenumberReport, RewatchManager};
use crate::store::{BackupStore, SqliteStore};
use crate::sync::{Divergence, LoadReport, Synchronizer};
use crate::tournament::{ComparisonPair, SessionFile, TournamentEngine, TournamentRun};

/// Filing request for one title.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub media_id: i64,
    pub media_type: MediaType,
    pub status: Status,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub rewatch: bool,
    pub rewatch_count: Option<u32>,
}

impl AddRequest {
    pub fn new(media_id: i64, media_type: MediaType, status: Status) -> Self {
        Self {
            media_id,
            media_type,
            status,
            start_date: None,
            end_date: None,
            rewatch: false,
            rewatch_count: None,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.media_id, self.media_type)
    }
}

/// What a title's detail shows, after its rewatch numbers have been repaired.
#[derive(Debug, Clone)]
pub struct DetailView {
    pub key: ItemKey,
    pub status: Option<Status>,
    pub primary: Option<Item>,
    pub active_rewatch: Option<Item>,
    pub completed_rewatches: Vec<Item>,
    pub renumber: RenumberReport,
}

pub struct Tracker {
    library: Library,
    metadata: Arc<dyn MetadataSource>,
    tournament: TournamentEngine,
    session: SessionFile,
    rng: StdRng,
}

impl Tracker {
    pub fn new(
        library: Library,
        metadata: Arc<dyn MetadataSource>,
        session: SessionFile,
        rng: StdRng,
    ) -> Self {
        Self {
            library,
            metadata,
            tournament: TournamentEngine::new(),
            session,
            rng,
        }
    }

    /// Open both stores from the configuration and load the library.
    pub async fn open(
        config: &Configuration,
        metadata: Arc<dyn MetadataSource>,
    ) -> Result<(Self, LoadReport)> {
        let storage = config.storage();
        let primary = SqliteStore::open(&storage.database).await?;
        let backup = BackupStore::open(&storage.backup).await?;

        let sync = Synchronizer::new(Arc::new(primary), Arc::new(backup));
        let (library, report) = Library::load(sync).await;
        let tracker = Self::new(
            library,
            metadata,
            SessionFile::new(&storage.session),
            StdRng::from_entropy(),
        );
        Ok((tracker, report))
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn items(&self, category: Category) -> &[Item] {
        self.library.items(category)
    }

    pub fn has_rewatches(&self, key: ItemKey) -> bool {
        self.library.has_rewatches(key)
    }

    pub fn completed_rewatches(&self, key: ItemKey) -> Vec<Item> {
        self.library.completed_rewatches(key)
    }

    pub fn divergences(&self) -> &[Divergence] {
        self.library.divergences()
    }

    pub fn take_divergences(&mut self) -> Vec<Divergence> {
        self.library.take_divergences()
    }

    /// Descriptive fields come from an existing record of the title when there
    /// is one; metadata is only fetched for titles not yet in the library.
    async fn base_record(&self, key: ItemKey, status: Status) -> Result<Item> {
        if let Some(primary) = self.library.primary(key) {
            return Ok(primary.clone());
        }
        if let Some(rewatch) = self.library.rewatches(key).into_iter().next() {
            let mut base = rewatch.clone();
            base.is_rewatch = false;
            base.rewatch_count = 0;
            base.progress = 0;
            base.rank = 0;
            base.score = 0;
            base.start_date = None;
            base.end_date = None;
            return Ok(base.with_status(status));
        }

        let metadata = self.metadata.fetch_title_metadata(key.media_id, key.media_type).await?;
        let mut item = Item::new(key.media_id, key.media_type, metadata.title, status);
        item.cover_image = metadata.cover_image;
        item.genres = Some(metadata.genres).filter(|g| !g.is_empty());
        item.summary = metadata.summary;
        item.total_units = metadata.total_units;
        Ok(item)
    }

    /// The single entry point for filing or moving a title.
    #[instrument(skip(self), fields(key = %request.key(), status = %request.status))]
    pub async fn add_item(&mut self, request: AddRequest) -> Result<Item> {
        if request.rewatch {
            return self.add_rewatch(request).await;
        }

        let key = request.key();
        let base = self.base_record(key, request.status).await?;
        let now = Utc::now();

        let mut item = base.with_status(request.status);
        if base.status != request.status {
            item.rank = 0;
        }
        item.start_date = request.start_date.or(base.start_date);
        item.end_date = request.end_date.or(base.end_date);

        match request.status {
            Status::InProgress => {
                item.start_date = item.start_date.or(Some(now));
            }
            Status::Completed => {
                item.end_date = item.end_date.or(Some(now));
                if let Some(total) = item.total_units {
                    item.progress = total;
                }
            }
            Status::Planned | Status::OnHold | Status::Dropped => {}
        }

        info!("Filing {} as {}", item.title, item.status);
        Ok(self.library.add_item(item).await)
    }

    async fn add_rewatch(&mut self, request: AddRequest) -> Result<Item> {
        let key = request.key();
        if request.rewatch_count == Some(0) {
            return Err(Error::InvalidInput("rewatch numbers start at 1".to_string()));
        }
        if !self.library.has_completed(key) {
            return Err(Error::NotEligible(key));
        }

        match (request.status, request.rewatch_count) {
            (Status::InProgress, None) => {
                RewatchManager::new(&mut self.library)
                    .start_rewatch(key, request.start_date)
                    .await
            }
            (Status::Completed, None) if self.library.active_rewatch(key).is_some() => {
                RewatchManager::new(&mut self.library)
                    .complete_rewatch(key, request.end_date)
                    .await
            }
            (Status::InProgress, Some(count)) => {
                if let Some(active) = self.library.active_rewatch(key) {
                    if active.rewatch_count != count {
                        return Err(Error::RewatchInProgress(key));
                    }
                }
                let finished = self.library.completed_rewatches(key);
                if finished.iter().any(|r| r.rewatch_count == count) {
                    return Err(Error::InvalidInput(format!(
                        "rewatch #{} of {} is already completed",
                        count, key
                    )));
                }
                let base = self.base_record(key, Status::Completed).await?;
                let rewatch = base.as_rewatch(count, request.start_date.unwrap_or_else(Utc::now));
                Ok(self.library.add_item(rewatch).await)
            }
            (Status::Completed, count) => {
                // A past rewatch logged after the fact.
                let count = match count {
                    Some(count) => count,
                    None => RewatchManager::new(&mut self.library).next_rewatch_number(key),
                };
                let base = self.base_record(key, Status::Completed).await?;
                let now = Utc::now();
                let rewatch = base
                    .as_rewatch(count, request.start_date.unwrap_or(now))
                    .completed_at(request.end_date.unwrap_or(now));
                Ok(self.library.add_item(rewatch).await)
            }
            (status, _) => Err(Error::InvalidInput(format!(
                "a rewatch can only be in_progress or completed, not {}",
                status
            ))),
        }
    }

    pub async fn remove_item(&mut self, key: &RecordKey) -> Result<Item> {
        self.library.remove_item(key).await
    }

    pub async fn update_progress(
        &mut self,
        media_id: i64,
        media_type: MediaType,
        is_rewatch: bool,
        rewatch_count: u32,
        progress: u32,
    ) -> Result<Item> {
        let key = record_key(media_id, media_type, is_rewatch, rewatch_count);
        self.library.update_progress(&key, progress).await
    }

    pub async fn update_rating(
        &mut self,
        media_id: i64,
        media_type: MediaType,
        is_rewatch: bool,
        rewatch_count: u32,
        rating: u32,
    ) -> Result<Item> {
        let key = record_key(media_id, media_type, is_rewatch, rewatch_count);
        self.library.update_rating(&key, rating).await
    }

    pub async fn move_item(&mut self, category: Category, from: usize, to: usize) -> Result<()> {
        self.library.move_item(category, from, to).await
    }

    pub async fn start_rewatch(
        &mut self,
        key: ItemKey,
        started: Option<DateTime<Utc>>,
    ) -> Result<Item> {
        RewatchManager::new(&mut self.library).start_rewatch(key, started).await
    }

    pub async fn complete_rewatch(
        &mut self,
        key: ItemKey,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Item> {
        RewatchManager::new(&mut self.library)
            .complete_rewatch(key, end_date)
            .await
    }

    /// Repair rewatch numbering for the title, then describe it.
    pub async fn open_detail(&mut self, key: ItemKey) -> DetailView {
        let renumber = RewatchManager::new(&mut self.library)
            .cleanup_and_renumber(key)
            .await;

        DetailView {
            key,
            status: self.library.find_current_status(key),
            primary: self.library.primary(key).cloned(),
            active_rewatch: self.library.active_rewatch(key).cloned(),
            completed_rewatches: self.library.completed_rewatches(key),
            renumber,
        }
    }

    pub fn start_tournament(&mut self, category: Category) -> Result<&TournamentRun> {
        let items = self.library.items(category).to_vec();
        self.tournament.start(category, &items, &mut self.rng)
    }

    pub fn current_pair(&self) -> Option<&ComparisonPair> {
        self.tournament.current_pair()
    }

    pub fn active_tournament(&self) -> Option<&TournamentRun> {
        self.tournament.active()
    }

    /// Returns the committed ranks once the last pair has been decided.
    pub async fn record_choice(&mut self, winner_id: i64) -> Result<Option<Vec<(RecordKey, u32)>>> {
        let session_id = self.tournament.active().map(TournamentRun::session_id);
        if self.tournament.record_win(winner_id)? {
            return self.commit(session_id).await.map(Some);
        }
        Ok(None)
    }

    pub async fn skip_current_pair(&mut self) -> Result<Option<Vec<(RecordKey, u32)>>> {
        let session_id = self.tournament.active().map(TournamentRun::session_id);
        self.tournament.skip(&mut self.rng)?;
        if self.tournament.is_completed() {
            return self.commit(session_id).await.map(Some);
        }
        Ok(None)
    }

    async fn commit(&mut self, session_id: Option<uuid::Uuid>) -> Result<Vec<(RecordKey, u32)>> {
        let ranks = self.tournament.commit(&mut self.library).await?;

        match self.session.load().await {
            Ok(Some(saved)) if Some(saved.session_id) == session_id => {
                if let Err(e) = self.session.clear().await {
                    warn!("Could not clear finished tournament session: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read tournament session: {}", e),
        }
        Ok(ranks)
    }

    /// Park the active run in the session file; the engine goes idle.
    pub async fn save_for_later(&mut self) -> Result<()> {
        let snapshot = self.tournament.save_for_later()?;
        if let Err(e) = self.session.save(&snapshot).await {
            self.tournament.resume(snapshot)?;
            return Err(e);
        }
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<&TournamentRun> {
        let snapshot = self
            .session
            .load()
            .await?
            .ok_or_else(|| Error::NotFound("no saved tournament".to_string()))?;
        self.tournament.resume(snapshot)
    }
}

fn record_key(
    media_id: i64,
    media_type: MediaType,
    is_rewatch: bool,
    rewatch_count: u32,
) -> RecordKey {
    RecordKey {
        media_id,
        media_type,
        is_rewatch,
        rewatch_count: if is_rewatch { rewatch_count } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TitleMetadata;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingMetadata {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for CountingMetadata {
        async fn fetch_title_metadata(
            &self,
            media_id: i64,
            _media_type: MediaType,
        ) -> Result<TitleMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TitleMetadata {
                title: format!("Title {}", media_id),
                cover_image: format!("https://cdn.example/{}.jpg", media_id),
                genres: vec!["Drama".to_string()],
                summary: None,
                total_units: Some(24),
            })
        }
    }

    fn tracker(dir: &TempDir) -> (Tracker, Arc<CountingMetadata>) {
        let sync = Synchronizer::new(
            Arc::new(MemoryStore::new("primary")),
            Arc::new(MemoryStore::new("backup")),
        );
        let metadata = Arc::new(CountingMetadata::default());
        let tracker = Tracker::new(
            Library::new(sync),
            metadata.clone(),
            SessionFile::new(dir.path().join("session.json")),
            StdRng::seed_from_u64(99),
        );
        (tracker, metadata)
    }

    #[tokio::test]
    async fn test_metadata_fetched_once_per_title() {
        let dir = TempDir::new().unwrap();
        let (mut tracker, metadata) = tracker(&dir);

        tracker.add_item(AddRequest::new(8, MediaType::Anime, Status::Planned)).await.unwrap();
        let done = tracker
            .add_item(AddRequest::new(8, MediaType::Anime, Status::Completed))
            .await
            .unwrap();

        assert_eq!(metadata.calls.load(Ordering::SeqCst), 1);
        assert_eq!(done.progress, 24);
        assert!(done.end_date.is_some());
        assert_eq!(tracker.library().len(), 1);
    }

    #[tokio::test]
    async fn test_rewatch_intent_routes_through_lifecycle() {
        let dir = TempDir::new().unwrap();
        let (mut tracker, _) = tracker(&dir);
        let key = ItemKey::new(3, MediaType::Anime);

        let mut rewatch = AddRequest::new(3, MediaType::Anime, Status::InProgress);
        rewatch.rewatch = true;
        assert!(matches!(
            tracker.add_item(rewatch.clone()).await,
            Err(Error::NotEligible(_))
        ));

        tracker.add_item(AddRequest::new(3, MediaType::Anime, Status::Completed)).await.unwrap();
        let started = tracker.add_item(rewatch).await.unwrap();
        assert_eq!(started.rewatch_count, 1);

        let mut finish = AddRequest::new(3, MediaType::Anime, Status::Completed);
        finish.rewatch = true;
        let finished = tracker.add_item(finish).await.unwrap();
        assert_eq!(finished.rewatch_count, 1);
        assert!(finished.end_date.is_some());
        assert!(tracker.has_rewatches(key));
        assert_eq!(tracker.completed_rewatches(key).len(), 1);

        let mut on_hold = AddRequest::new(3, MediaType::Anime, Status::OnHold);
        on_hold.rewatch = true;
        assert!(matches!(tracker.add_item(on_hold).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_running_rewatch_cannot_take_a_completed_number() {
        let dir = TempDir::new().unwrap();
        let (mut tracker, _) = tracker(&dir);
        let key = ItemKey::new(6, MediaType::Anime);
        tracker
            .add_item(AddRequest::new(6, MediaType::Anime, Status::Completed))
            .await
            .unwrap();
        tracker.start_rewatch(key, None).await.unwrap();
        let done = tracker.complete_rewatch(key, None).await.unwrap();

        let mut restart = AddRequest::new(6, MediaType::Anime, Status::InProgress);
        restart.rewatch = true;
        restart.rewatch_count = Some(done.rewatch_count);
        assert!(matches!(
            tracker.add_item(restart.clone()).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(tracker.completed_rewatches(key), vec![done]);
        assert!(tracker.library().active_rewatch(key).is_none());

        restart.rewatch_count = Some(2);
        let running = tracker.add_item(restart).await.unwrap();
        assert_eq!(running.rewatch_count, 2);
        assert_eq!(tracker.completed_rewatches(key).len(), 1);
    }

    #[tokio::test]
    async fn test_rewatch_number_zero_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (mut tracker, _) = tracker(&dir);
        let key = ItemKey::new(7, MediaType::Manga);
        tracker
            .add_item(AddRequest::new(7, MediaType::Manga, Status::Completed))
            .await
            .unwrap();

        for status in [Status::Completed, Status::InProgress] {
            let mut request = AddRequest::new(7, MediaType::Manga, status);
            request.rewatch = true;
            request.rewatch_count = Some(0);
            assert!(matches!(
                tracker.add_item(request).await,
                Err(Error::InvalidInput(_))
            ));
        }
        assert!(!tracker.has_rewatches(key));
        assert_eq!(tracker.library().len(), 1);
    }

    #[tokio::test]
    async fn test_open_detail_repairs_numbering() {
        let dir = TempDir::new().unwrap();
        let (mut tracker, _) = tracker(&dir);
        let key = ItemKey::new(5, MediaType::Manga);
        tracker.add_item(AddRequest::new(5, MediaType::Manga, Status::Completed)).await.unwrap();

        for count in [2, 4] {
            let mut past = AddRequest::new(5, MediaType::Manga, Status::Completed);
            past.rewatch = true;
            past.rewatch_count = Some(count);
            tracker.add_item(past).await.unwrap();
        }

        let detail = tracker.open_detail(key).await;
        assert_eq!(detail.status, Some(Status::Completed));
        assert_eq!(
            detail.completed_rewatches.iter().map(|r| r.rewatch_count).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(detail.renumber.renumbered, vec![(2, 1), (4, 2)]);
    }

    #[tokio::test]
    async fn test_tournament_commits_ranks_and_clears_session() {
        let dir = TempDir::new().unwrap();
        let (mut tracker, _) = tracker(&dir);
        let category = Category::new(MediaType::Anime, Status::Completed);
        for id in 1..=4 {
            tracker
                .add_item(AddRequest::new(id, MediaType::Anime, Status::Completed))
                .await
                .unwrap();
        }

        tracker.start_tournament(category).unwrap();
        let first = tracker.current_pair().unwrap().left.media_id;
        tracker.record_choice(first).await.unwrap();
        tracker.save_for_later().await.unwrap();
        assert!(tracker.active_tournament().is_none());
        assert!(dir.path().join("session.json").exists());

        assert_eq!(tracker.resume().await.unwrap().cursor(), 1);
        let mut ranks = None;
        while let Some(pair) = tracker.current_pair().cloned() {
            let winner = pair.left.media_id.min(pair.right.media_id);
            ranks = tracker.record_choice(winner).await.unwrap();
        }

        let ranks = ranks.unwrap();
        assert_eq!(ranks.len(), 4);
        assert!(!dir.path().join("session.json").exists());
        let listed: Vec<u32> = tracker.items(category).iter().map(|i| i.rank).collect();
        assert_eq!(listed, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_tournament_needs_two_items_and_resume_needs_session() {
        let dir = TempDir::new().unwrap();
        let (mut tracker, _) = tracker(&dir);
        let category = Category::new(MediaType::Manga, Status::Planned);
        tracker.add_item(AddRequest::new(1, MediaType::Manga, Status::Planned)).await.unwrap();

        assert!(matches!(
            tracker.start_tournament(category),
            Err(Error::NotEnoughItems { found: 1, .. })
        ));
        assert!(matches!(tracker.resume().await, Err(Error::NotFound(_))));
    }
}
