//! Library-level properties: one bucket per title, and tournament ranks
//! written back in win order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rankshelf::library::Library;
use rankshelf::store::MemoryStore;
use rankshelf::sync::Synchronizer;
use rankshelf::tournament::TournamentEngine;
use rankshelf::{Category, Item, MediaType, Status};
use std::collections::HashMap;
use std::sync::Arc;

fn library() -> (Library, Arc<MemoryStore>) {
    let primary = Arc::new(MemoryStore::new("primary"));
    let backup = Arc::new(MemoryStore::new("backup"));
    (Library::new(Synchronizer::new(primary.clone(), backup)), primary)
}

#[tokio::test]
async fn test_random_filing_keeps_one_primary_per_title() {
    let (mut library, primary) = library();
    let mut rng = StdRng::seed_from_u64(2024);

    for _ in 0..300 {
        let media_type = if rng.gen_bool(0.5) {
            MediaType::Anime
        } else {
            MediaType::Manga
        };
        let media_id = rng.gen_range(1..=12);
        let status = Status::ALL[rng.gen_range(0..Status::ALL.len())];
        library
            .add_item(Item::new(media_id, media_type, "Title", status))
            .await;

        let mut seen: HashMap<(i64, MediaType), usize> = HashMap::new();
        for media_type in MediaType::ALL {
            for status in Status::ALL {
                for item in library.items(Category::new(media_type, status)) {
                    *seen.entry((item.media_id, item.media_type)).or_insert(0) += 1;
                }
            }
        }
        assert!(seen.values().all(|count| *count == 1));
        assert_eq!(seen.len(), library.len());
    }

    assert_eq!(primary.records().len(), library.len());
}

#[tokio::test]
async fn test_committed_ranks_follow_win_counts() {
    let (mut library, primary) = library();
    let category = Category::new(MediaType::Anime, Status::Completed);
    for id in 1..=10 {
        library
            .add_item(Item::new(id, MediaType::Anime, format!("Show {}", id), Status::Completed))
            .await;
    }

    let mut rng = StdRng::seed_from_u64(8);
    let mut engine = TournamentEngine::new();
    let candidates = library.items(category).to_vec();
    engine.start(category, &candidates, &mut rng).unwrap();

    let mut wins: HashMap<i64, u32> = HashMap::new();
    let mut recorded = 0;
    while let Some(pair) = engine.current_pair().cloned() {
        // Prefer the lower id; skip every fifth pair.
        let winner = if recorded % 5 == 4 {
            engine.skip(&mut rng).unwrap()
        } else {
            let winner = pair.left.media_id.min(pair.right.media_id);
            engine.record_win(winner).unwrap();
            winner
        };
        *wins.entry(winner).or_insert(0) += 1;
        recorded += 1;
    }
    assert!(engine.is_completed());

    let ranks = engine.commit(&mut library).await.unwrap();
    assert!(engine.is_idle());
    assert_eq!(ranks.len(), 10);

    let listed = library.items(category);
    let listed_ranks: Vec<u32> = listed.iter().map(|i| i.rank).collect();
    assert_eq!(listed_ranks, (1..=10).collect::<Vec<u32>>());

    for a in listed {
        for b in listed {
            let (wa, wb) = (
                wins.get(&a.media_id).copied().unwrap_or(0),
                wins.get(&b.media_id).copied().unwrap_or(0),
            );
            if wa > wb {
                assert!(
                    a.rank < b.rank,
                    "{} ({} wins) should outrank {} ({} wins)",
                    a.media_id,
                    wa,
                    b.media_id,
                    wb
                );
            }
        }
    }

    assert!(primary.records().iter().all(|r| r.rank > 0));
}

#[tokio::test]
async fn test_commit_requires_completed_run() {
    let (mut library, _) = library();
    let mut engine = TournamentEngine::new();
    assert!(engine.commit(&mut library).await.is_err());
    assert!(engine.is_idle());
}
