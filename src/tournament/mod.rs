//! Pairwise tournament ranking.
//!
//! A run shuffles the candidates once and derives a merge-sort shaped
//! schedule from that order. Each recorded choice adds one win to the chosen
//! item and advances the cursor; when the cursor reaches the end of the
//! schedule the run is complete and ranks are assigned by descending wins.
//! Equal win counts keep the shuffled order, which is also the order the first
//! merge round walks the candidates.

mod session;

pub use session::SessionFile;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::library::Library;
use crate::models::{Category, Item, RecordKey};

/// Two items put in front of the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonPair {
    pub left: Item,
    pub right: Item,
}

impl ComparisonPair {
    pub fn contains(&self, media_id: i64) -> bool {
        self.left.media_id == media_id || self.right.media_id == media_id
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    /// Candidates in shuffled order.
    pub order: Vec<Item>,
    pub pairs: Vec<ComparisonPair>,
}

/// Shuffle the items and build the comparison schedule from that order.
pub fn generate_pairs<R: Rng + ?Sized>(items: &[Item], rng: &mut R) -> Schedule {
    let mut order = items.to_vec();
    order.shuffle(rng);
    let pairs = merge_schedule(&order);
    Schedule { order, pairs }
}

/// Merge singleton runs pairwise, round by round, until one run is left.
/// Each merge compares fronts and provisionally takes the left front; the
/// real outcome comes from the user later. An odd run waits for the next round.
pub fn merge_schedule(order: &[Item]) -> Vec<ComparisonPair> {
    let mut runs: Vec<Vec<&Item>> = order.iter().map(|item| vec![item]).collect();
    let mut pairs = Vec::new();

    while runs.len() > 1 {
        let mut next = Vec::with_capacity(runs.len().div_ceil(2));
        let mut remaining = runs.into_iter();

        while let Some(left) = remaining.next() {
            match remaining.next() {
                Some(right) => next.push(merge_runs(left, right, &mut pairs)),
                None => next.push(left),
            }
        }
        runs = next;
    }

    pairs
}

fn merge_runs<'a>(
    left: Vec<&'a Item>,
    right: Vec<&'a Item>,
    pairs: &mut Vec<ComparisonPair>,
) -> Vec<&'a Item> {
    let mut merged = Vec::with_capacity(left.len() + right.len());

    // The right front stays in place while every left item is taken.
    if let Some(front) = right.first() {
        for item in &left {
            pairs.push(ComparisonPair {
                left: (*item).clone(),
                right: (*front).clone(),
            });
        }
    }

    merged.extend(left);
    merged.extend(right);
    merged
}

/// Everything needed to continue an abandoned run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TournamentSnapshot {
    pub session_id: Uuid,
    pub category: Category,
    pub candidates: Vec<Item>,
    pub schedule: Vec<ComparisonPair>,
    pub cursor: usize,
    pub win_tally: HashMap<i64, u32>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TournamentRun {
    session_id: Uuid,
    category: Category,
    candidates: Vec<Item>,
    schedule: Vec<ComparisonPair>,
    cursor: usize,
    win_tally: HashMap<i64, u32>,
}

impl TournamentRun {
    /// Only primary records compete; a running rewatch shares its title's id.
    pub fn start<R: Rng + ?Sized>(category: Category, items: &[Item], rng: &mut R) -> Result<Self> {
        let candidates: Vec<Item> = items.iter().filter(|i| !i.is_rewatch).cloned().collect();
        if candidates.len() < 2 {
            return Err(Error::NotEnoughItems {
                category,
                found: candidates.len(),
            });
        }

        let Schedule { order, pairs } = generate_pairs(&candidates, rng);
        info!("Tournament for {}: {} items, {} comparisons", category, order.len(), pairs.len());

        Ok(Self {
            session_id: Uuid::new_v4(),
            category,
            candidates: order,
            schedule: pairs,
            cursor: 0,
            win_tally: HashMap::new(),
        })
    }

    pub fn from_snapshot(snapshot: TournamentSnapshot) -> Result<Self> {
        if snapshot.cursor > snapshot.schedule.len() {
            return Err(Error::InvalidInput(format!(
                "snapshot cursor {} is past the schedule of {}",
                snapshot.cursor,
                snapshot.schedule.len()
            )));
        }

        Ok(Self {
            session_id: snapshot.session_id,
            category: snapshot.category,
            candidates: snapshot.candidates,
            schedule: snapshot.schedule,
            cursor: snapshot.cursor,
            win_tally: snapshot.win_tally,
        })
    }

    pub fn snapshot(&self) -> TournamentSnapshot {
        TournamentSnapshot {
            session_id: self.session_id,
            category: self.category,
            candidates: self.candidates.clone(),
            schedule: self.schedule.clone(),
            cursor: self.cursor,
            win_tally: self.win_tally.clone(),
            saved_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn schedule(&self) -> &[ComparisonPair] {
        &self.schedule
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn wins(&self, media_id: i64) -> u32 {
        self.win_tally.get(&media_id).copied().unwrap_or(0)
    }

    pub fn current_pair(&self) -> Option<&ComparisonPair> {
        self.schedule.get(self.cursor)
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.schedule.len()
    }

    /// Credit the winner of the current pair and move to the next one.
    pub fn record_win(&mut self, winner_id: i64) -> Result<()> {
        let pair = self
            .current_pair()
            .ok_or_else(|| Error::InvalidChoice("the tournament has no pairs left".to_string()))?;

        if !pair.contains(winner_id) {
            return Err(Error::InvalidChoice(format!(
                "{} is not part of the current pair ({} vs {})",
                winner_id, pair.left.media_id, pair.right.media_id
            )));
        }

        *self.win_tally.entry(winner_id).or_insert(0) += 1;
        self.cursor += 1;
        debug!("Recorded win for {} ({}/{})", winner_id, self.cursor, self.schedule.len());
        Ok(())
    }

    /// A skip is a coin-flip win, so the cursor always advances.
    pub fn skip<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<i64> {
        let pair = self
            .current_pair()
            .ok_or_else(|| Error::InvalidChoice("the tournament has no pairs left".to_string()))?;

        let winner = if rng.gen_bool(0.5) {
            pair.left.media_id
        } else {
            pair.right.media_id
        };
        self.record_win(winner)?;
        Ok(winner)
    }

    /// `rank = position + 1` after a stable sort by descending wins.
    pub fn final_ranks(&self) -> Vec<(RecordKey, u32)> {
        let mut ordered: Vec<&Item> = self.candidates.iter().collect();
        ordered.sort_by_key(|item| Reverse(self.wins(item.media_id)));

        ordered
            .into_iter()
            .enumerate()
            .map(|(index, item)| (item.record_key(), index as u32 + 1))
            .collect()
    }
}

#[derive(Debug, Default)]
pub enum TournamentState {
    #[default]
    Idle,
    Active(TournamentRun),
    Completed(TournamentRun),
}

/// `Idle -> Active -> Completed -> Idle`. At most one run exists at a time.
#[derive(Debug, Default)]
pub struct TournamentEngine {
    state: TournamentState,
}

impl TournamentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TournamentState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, TournamentState::Idle)
    }

    pub fn active(&self) -> Option<&TournamentRun> {
        match &self.state {
            TournamentState::Active(run) => Some(run),
            _ => None,
        }
    }

    pub fn current_pair(&self) -> Option<&ComparisonPair> {
        self.active().and_then(TournamentRun::current_pair)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(Error::InvalidInput("a tournament is already running".to_string()))
        }
    }

    #[instrument(skip(self, items, rng), fields(category = %category))]
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        category: Category,
        items: &[Item],
        rng: &mut R,
    ) -> Result<&TournamentRun> {
        self.ensure_idle()?;
        let run = TournamentRun::start(category, items, rng)?;
        self.state = TournamentState::Active(run);
        self.active().ok_or_else(|| Error::InvalidInput("tournament failed to start".to_string()))
    }

    fn with_active<T>(
        &mut self,
        action: impl FnOnce(&mut TournamentRun) -> Result<T>,
    ) -> Result<T> {
        let TournamentState::Active(run) = &mut self.state else {
            return Err(Error::InvalidChoice("no tournament is active".to_string()));
        };
        let value = action(run)?;

        if run.is_complete() {
            if let TournamentState::Active(run) = std::mem::take(&mut self.state) {
                info!("Tournament for {} complete", run.category);
                self.state = TournamentState::Completed(run);
            }
        }
        Ok(value)
    }

    /// Returns true once the last pair has been decided.
    pub fn record_win(&mut self, winner_id: i64) -> Result<bool> {
        self.with_active(|run| run.record_win(winner_id))?;
        Ok(self.is_completed())
    }

    pub fn skip<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<i64> {
        self.with_active(|run| run.skip(rng))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, TournamentState::Completed(_))
    }

    /// Stop the active run and hand back its state for later.
    pub fn save_for_later(&mut self) -> Result<TournamentSnapshot> {
        match std::mem::take(&mut self.state) {
            TournamentState::Active(run) => {
                info!("Saving tournament for {} at pair {}", run.category, run.cursor);
                Ok(run.snapshot())
            }
            other => {
                self.state = other;
                Err(Error::InvalidChoice("no tournament is active".to_string()))
            }
        }
    }

    pub fn resume(&mut self, snapshot: TournamentSnapshot) -> Result<&TournamentRun> {
        self.ensure_idle()?;
        let run = TournamentRun::from_snapshot(snapshot)?;
        info!("Resuming tournament for {} at pair {}", run.category, run.cursor);

        self.state = if run.is_complete() {
            TournamentState::Completed(run)
        } else {
            TournamentState::Active(run)
        };
        match &self.state {
            TournamentState::Active(run) | TournamentState::Completed(run) => Ok(run),
            TournamentState::Idle => Err(Error::InvalidInput(
                "tournament failed to resume".to_string(),
            )),
        }
    }

    /// Write the ranks of a completed run through the library and go idle.
    #[instrument(skip(self, library))]
    pub async fn commit(&mut self, library: &mut Library) -> Result<Vec<(RecordKey, u32)>> {
        let run = match std::mem::take(&mut self.state) {
            TournamentState::Completed(run) => run,
            other => {
                self.state = other;
                return Err(Error::InvalidChoice("the tournament is not complete".to_string()));
            }
        };

        let ranks = run.final_ranks();
        library.apply_ranks(run.category, &ranks).await;
        Ok(ranks)
    }

    pub fn abandon(&mut self) {
        self.state = TournamentState::Idle;
    }
}
