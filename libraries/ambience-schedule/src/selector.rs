//! Non-repeating random draws from schedule content pools
//!
//! Each schedule gets a bag: items are drawn uniformly at random from
//! `remaining` until it is empty, then the bag refills from `played`.
//! Every item plays once per cycle and the first draw of a new cycle never
//! repeats the last draw of the previous one.

use ambience_core::{AudioTrack, ScheduleDefinition, ScheduleId, TrackId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Draw state for one schedule
#[derive(Debug, Clone)]
pub struct ContentBag {
    remaining: Vec<AudioTrack>,
    played: Vec<AudioTrack>,
    pool: Vec<TrackId>,
    last: Option<TrackId>,
}

impl ContentBag {
    fn new(pool: &[AudioTrack]) -> Self {
        Self {
            remaining: pool.to_vec(),
            played: Vec::with_capacity(pool.len()),
            pool: fingerprint(pool),
            last: None,
        }
    }

    /// Items not yet drawn in this cycle
    pub fn remaining(&self) -> &[AudioTrack] {
        &self.remaining
    }

    /// Items drawn in this cycle, in draw order
    pub fn played(&self) -> &[AudioTrack] {
        &self.played
    }

    fn draw<R: Rng>(&mut self, rng: &mut R) -> Option<AudioTrack> {
        if self.remaining.is_empty() {
            self.refill();
        }

        let index = self.pick(rng)?;
        let item = self.remaining.swap_remove(index);
        self.last = Some(item.id.clone());
        self.played.push(item.clone());
        Some(item)
    }

    /// Random index into `remaining`, avoiding the previous draw when a
    /// fresh cycle starts
    fn pick<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let len = self.remaining.len();
        if len == 0 {
            return None;
        }

        let avoid = self
            .last
            .as_ref()
            .filter(|_| self.played.is_empty() && len > 1)
            .and_then(|last| self.remaining.iter().position(|t| &t.id == last));

        match avoid {
            Some(skip) => {
                let index = rng.gen_range(0..len - 1);
                Some(if index >= skip { index + 1 } else { index })
            }
            None => Some(rng.gen_range(0..len)),
        }
    }

    fn refill(&mut self) {
        self.remaining.append(&mut self.played);
    }
}

fn fingerprint(pool: &[AudioTrack]) -> Vec<TrackId> {
    pool.iter().map(|t| t.id.clone()).collect()
}

/// Per-schedule content bags
///
/// Bags are created lazily on first draw and rebuilt when a schedule's
/// pool changes.
pub struct ContentSelector<R = StdRng> {
    bags: HashMap<ScheduleId, ContentBag>,
    rng: R,
}

impl ContentSelector<StdRng> {
    /// Selector seeded from the OS
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic selector
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for ContentSelector<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> ContentSelector<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            bags: HashMap::new(),
            rng,
        }
    }

    /// Draw the next content item for `schedule`
    ///
    /// Returns `None` only for an empty pool. Single-item pools return that
    /// item without touching the bag.
    pub fn draw(&mut self, schedule: &ScheduleDefinition) -> Option<AudioTrack> {
        let pool = &schedule.content_pool;
        match pool.len() {
            0 => return None,
            1 => return pool.first().cloned(),
            _ => {}
        }

        let bag = self
            .bags
            .entry(schedule.id.clone())
            .or_insert_with(|| ContentBag::new(pool));

        if bag.pool != fingerprint(pool) {
            debug!(schedule = %schedule.id, "Content pool changed, rebuilding bag");
            *bag = ContentBag::new(pool);
        }

        let item = bag.draw(&mut self.rng);
        if let Some(item) = &item {
            debug!(
                schedule = %schedule.id,
                item = %item.id,
                remaining = bag.remaining.len(),
                "Drew content"
            );
        }
        item
    }

    /// Bag for `id`, if one has been created
    pub fn bag(&self, id: &ScheduleId) -> Option<&ContentBag> {
        self.bags.get(id)
    }

    /// Drop bags for schedules that no longer exist
    pub fn retain_schedules<'a>(&mut self, live: impl IntoIterator<Item = &'a ScheduleId>) {
        let live: HashSet<&ScheduleId> = live.into_iter().collect();
        self.bags.retain(|id, _| live.contains(id));
    }

    /// Forget the bag for `id`; the next draw starts a fresh cycle
    pub fn reset(&mut self, id: &ScheduleId) {
        self.bags.remove(id);
    }
}
