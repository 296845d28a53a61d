//! Concurrent per-identity limiter state.
//!
//! Backed by a sharded `DashMap`: a write locks one shard, so visitors hashing to
//! different shards never contend, and every mutation of a single entry is
//! serialized by that entry's shard lock.

use std::time::Duration;

use dashmap::DashMap;
use quanta::Instant;

use crate::Identity;
use crate::VirtualCursor;

/// Limiter state for one identity plus the time it was last active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterEntry {
    pub limiter: VirtualCursor,
    pub last_seen: Instant,
}

impl LimiterEntry {
    pub fn fresh(interval: Duration, now: Instant) -> Self {
        Self {
            limiter: VirtualCursor::new(interval, now),
            last_seen: now,
        }
    }

    /// Record activity at `now`. A clock reading older than the recorded one is
    /// ignored so `last_seen` never moves backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_idle(&self, now: Instant, max_inactivity: Duration) -> bool {
        self.idle_for(now) > max_inactivity
    }
}

/// Identity → [`LimiterEntry`] map shared by every request and the reaper.
#[derive(Debug)]
pub struct LimiterStore {
    entries: DashMap<Identity, LimiterEntry>,
    interval: Duration,
}

impl LimiterStore {
    /// Create an empty store whose fresh entries refill every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Return the stored entry, creating a fresh one if the identity is unknown.
    ///
    /// Creation goes through the shard's entry lock, so concurrent first requests
    /// for one identity agree on a single entry.
    ///
    /// Returns a copy: changes to it are not stored. Request handling goes
    /// through [`LimiterStore::update`] instead.
    pub fn get_or_create(&self, identity: &Identity, now: Instant) -> LimiterEntry {
        if let Some(entry) = self.entries.get(identity) {
            return *entry;
        }
        *self
            .entries
            .entry(identity.clone())
            .or_insert_with(|| LimiterEntry::fresh(self.interval, now))
    }

    /// Unconditionally overwrite the entry for `identity`.
    ///
    /// Not used on the request path, where a read followed by `put` could lose a
    /// concurrent update; see [`LimiterStore::update`].
    pub fn put(&self, identity: Identity, entry: LimiterEntry) {
        self.entries.insert(identity, entry);
    }

    pub fn delete(&self, identity: &Identity) -> Option<LimiterEntry> {
        self.entries.remove(identity).map(|(_, entry)| entry)
    }

    /// Get-or-create, mutate and write back as a single step under the entry's
    /// lock. Two requests for the same identity never see each other's
    /// half-applied state, and neither update is lost.
    pub fn update<F, R>(&self, identity: &Identity, now: Instant, f: F) -> R
    where
        F: FnOnce(&mut LimiterEntry) -> R,
    {
        let apply = |slot: &mut LimiterEntry| {
            let mut entry = *slot;
            let result = f(&mut entry);
            *slot = entry;
            result
        };

        // Skip the key clone on the hot path.
        if let Some(mut slot) = self.entries.get_mut(identity) {
            return apply(&mut slot);
        }
        let mut slot = self
            .entries
            .entry(identity.clone())
            .or_insert_with(|| LimiterEntry::fresh(self.interval, now));
        apply(&mut slot)
    }

    /// Visit every entry once. Shards are locked one at a time for reading, so
    /// `visit` must not call back into the store.
    pub fn for_each(&self, mut visit: impl FnMut(&Identity, &LimiterEntry)) {
        for item in self.entries.iter() {
            visit(item.key(), item.value());
        }
    }

    /// Delete `identity` only if it is still idle when its lock is taken.
    pub fn evict_if_idle(
        &self,
        identity: &Identity,
        now: Instant,
        max_inactivity: Duration,
    ) -> bool {
        self.entries
            .remove_if(identity, |_, entry| entry.is_idle(now, max_inactivity))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
