//! Reconciliation between the SQLite primary store and the JSON backup store.

use chrono::Utc;
use rankshelf::library::Library;
use rankshelf::rewatch::RewatchManager;
use rankshelf::store::{BackupStore, MemoryStore, RecordFilter, RecordStore, SqliteStore};
use rankshelf::sync::{SyncOp, Synchronizer};
use rankshelf::{Category, Item, ItemKey, MediaType, Status};
use std::sync::Arc;
use tempfile::TempDir;

fn completed_manga(id: i64) -> Item {
    Item::new(id, MediaType::Manga, format!("Manga {}", id), Status::Completed)
}

async fn open_stores(dir: &TempDir, database: &str) -> (Arc<SqliteStore>, Arc<BackupStore>) {
    let db = dir.path().join(database);
    let primary = SqliteStore::open(db.to_str().unwrap()).await.unwrap();
    let backup = BackupStore::open(dir.path().join("backup.json")).await.unwrap();
    (Arc::new(primary), Arc::new(backup))
}

#[tokio::test]
async fn test_empty_primary_bucket_is_refilled_from_backup() {
    let dir = TempDir::new().unwrap();
    let (primary, backup) = open_stores(&dir, "library.db").await;

    let records: Vec<Item> = (1..=3).map(completed_manga).collect();
    for record in &records {
        backup.upsert(record).await.unwrap();
    }

    let (library, report) = Library::load(Synchronizer::new(primary.clone(), backup.clone())).await;

    let category = Category::new(MediaType::Manga, Status::Completed);
    let mut loaded: Vec<i64> = library.items(category).iter().map(|i| i.media_id).collect();
    loaded.sort();
    assert_eq!(loaded, vec![1, 2, 3]);
    assert_eq!(report.from_backup, 3);

    let filter = RecordFilter {
        media_type: MediaType::Manga,
        status: Status::Completed,
        is_rewatch: false,
    };
    let healed = primary.query(filter).await.unwrap();
    assert_eq!(healed.len(), 3);
    for record in &records {
        assert!(healed.contains(record));
    }
}

#[tokio::test]
async fn test_library_survives_loss_of_primary_database() {
    let dir = TempDir::new().unwrap();
    let key = ItemKey::new(11, MediaType::Anime);

    {
        let (primary, backup) = open_stores(&dir, "library.db").await;
        let mut library = Library::new(Synchronizer::new(primary, backup));
        library
            .add_item(Item::new(11, MediaType::Anime, "Texhnolyze", Status::Completed))
            .await;
        library
            .add_item(Item::new(12, MediaType::Anime, "Ergo Proxy", Status::OnHold))
            .await;

        let mut rewatches = RewatchManager::new(&mut library);
        rewatches.start_rewatch(key, None).await.unwrap();
        rewatches.complete_rewatch(key, Some(Utc::now())).await.unwrap();
        rewatches.start_rewatch(key, None).await.unwrap();
        assert!(library.divergences().is_empty());
    }

    // A fresh, empty primary database stands in for a lost or corrupted one.
    let (primary, backup) = open_stores(&dir, "replacement.db").await;
    let (library, report) = Library::load(Synchronizer::new(primary.clone(), backup)).await;

    assert_eq!(report.from_primary, 0);
    assert_eq!(library.len(), 4);
    assert_eq!(
        library.find_current_status(ItemKey::new(12, MediaType::Anime)),
        Some(Status::OnHold)
    );
    assert_eq!(library.completed_rewatches(key).len(), 1);
    assert_eq!(library.active_rewatch(key).map(|r| r.rewatch_count), Some(2));
    assert!(library.completed_rewatches(key)[0].end_date.is_some());

    let healed = primary
        .query(RecordFilter {
            media_type: MediaType::Anime,
            status: Status::Completed,
            is_rewatch: true,
        })
        .await
        .unwrap();
    assert_eq!(healed.len(), 1);
}

#[tokio::test]
async fn test_failed_primary_writes_are_reported_and_recovered() {
    let dir = TempDir::new().unwrap();
    let failing = Arc::new(MemoryStore::new("primary"));
    let backup = Arc::new(BackupStore::open(dir.path().join("backup.json")).await.unwrap());
    failing.set_fail_writes(true);

    let mut library = Library::new(Synchronizer::new(failing.clone(), backup.clone()));
    let added = library.add_item(completed_manga(7)).await;

    // The in-memory change stands even though the primary write failed.
    assert_eq!(
        library.find_current_status(ItemKey::new(7, MediaType::Manga)),
        Some(Status::Completed)
    );
    let divergences = library.take_divergences();
    assert_eq!(divergences.len(), 1);
    assert_eq!(divergences[0].backend, "primary");
    assert_eq!(divergences[0].op, SyncOp::Upsert);
    assert!(failing.records().is_empty());

    failing.set_fail_writes(false);
    let (reloaded, report) = Library::load(Synchronizer::new(failing.clone(), backup)).await;
    assert_eq!(report.recovered.len(), 1);
    assert_eq!(reloaded.len(), 1);
    assert_eq!(failing.records(), vec![added]);
}

#[tokio::test]
async fn test_removed_items_stay_removed_after_reload() {
    let dir = TempDir::new().unwrap();
    let (primary, backup) = open_stores(&dir, "library.db").await;

    let mut library = Library::new(Synchronizer::new(primary.clone(), backup.clone()));
    let kept = library.add_item(completed_manga(1)).await;
    let dropped = library.add_item(completed_manga(2)).await;
    library.remove_item(&dropped.record_key()).await.unwrap();

    let (reloaded, _) = Library::load(Synchronizer::new(primary, backup.clone())).await;
    assert_eq!(
        reloaded.items(Category::new(MediaType::Manga, Status::Completed)),
        &[kept]
    );
    assert_eq!(backup.len().await, 1);
}

#[tokio::test]
async fn test_move_lost_by_primary_loads_as_single_record() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(MemoryStore::new("primary"));
    let backup = Arc::new(BackupStore::open(dir.path().join("backup.json")).await.unwrap());
    let key = ItemKey::new(1, MediaType::Anime);

    let mut library = Library::new(Synchronizer::new(primary.clone(), backup.clone()));
    library
        .add_item(Item::new(1, MediaType::Anime, "Kaiba", Status::Planned))
        .await;
    primary.set_fail_writes(true);
    library
        .add_item(Item::new(1, MediaType::Anime, "Kaiba", Status::Completed))
        .await;
    primary.set_fail_writes(false);

    let (reloaded, _) = Library::load(Synchronizer::new(primary.clone(), backup)).await;

    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.find_current_status(key), Some(Status::Completed));
    assert!(reloaded
        .items(Category::new(MediaType::Anime, Status::Planned))
        .is_empty());
    let stored = primary.records();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, Status::Completed);
}

#[tokio::test]
async fn test_rewatch_completed_only_in_backup_loads_once() {
    let dir = TempDir::new().unwrap();
    let primary = Arc::new(MemoryStore::new("primary"));
    let backup = Arc::new(BackupStore::open(dir.path().join("backup.json")).await.unwrap());
    let key = ItemKey::new(3, MediaType::Anime);

    let mut library = Library::new(Synchronizer::new(primary.clone(), backup.clone()));
    library
        .add_item(Item::new(3, MediaType::Anime, "Paprika", Status::Completed))
        .await;
    let mut rewatches = RewatchManager::new(&mut library);
    rewatches.start_rewatch(key, None).await.unwrap();
    primary.set_fail_writes(true);
    rewatches.complete_rewatch(key, None).await.unwrap();
    primary.set_fail_writes(false);

    let (reloaded, _) = Library::load(Synchronizer::new(primary, backup)).await;

    assert_eq!(reloaded.len(), 2);
    assert!(reloaded.active_rewatch(key).is_none());
    assert_eq!(reloaded.completed_rewatches(key).len(), 1);
    assert_eq!(reloaded.rewatches(key).len(), 1);
}
