//! Fire-and-forget counters for monitoring coordinator health.
//!
//! Everything is an atomic so the hot path never takes a lock and a
//! counter update can never fail a request. Read via [`CoordinatorStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::SyncType;
use crate::storage::Tier;

/// Plain-value copy of the counters at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub active_rooms: u64,
    pub sync_step1_messages: u64,
    pub sync_step1_bytes: u64,
    pub sync_step2_messages: u64,
    pub sync_step2_bytes: u64,
    pub sync_update_messages: u64,
    pub sync_update_bytes: u64,
    pub awareness_messages: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_dropped: u64,
    pub writes_denied: u64,
    pub decode_errors: u64,
    pub fast_saves: u64,
    pub fast_save_failures: u64,
    pub fast_bytes: u64,
    pub slow_saves: u64,
    pub slow_save_failures: u64,
    pub slow_bytes: u64,
    pub size_fallbacks: u64,
}

#[derive(Default)]
struct SyncCounter {
    messages: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Default)]
struct TierCounter {
    saves: AtomicU64,
    failures: AtomicU64,
    bytes: AtomicU64,
}

/// Lock-free coordinator counters.
#[derive(Default)]
pub struct CoordinatorStats {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    active_rooms: AtomicU64,
    step1: SyncCounter,
    step2: SyncCounter,
    update: SyncCounter,
    awareness_messages: AtomicU64,
    broadcasts_sent: AtomicU64,
    broadcasts_dropped: AtomicU64,
    writes_denied: AtomicU64,
    decode_errors: AtomicU64,
    fast: TierCounter,
    slow: TierCounter,
    size_fallbacks: AtomicU64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_created(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_destroyed(&self) {
        // Saturating: a stray decrement must not wrap
        let _ = self
            .active_rooms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn sync_message(&self, sync_type: SyncType, bytes: usize) {
        let counter = match sync_type {
            SyncType::Step1 => &self.step1,
            SyncType::Step2 => &self.step2,
            SyncType::Update => &self.update,
        };
        counter.messages.fetch_add(1, Ordering::Relaxed);
        counter.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn awareness_message(&self) {
        self.awareness_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast(&self, sent: usize, dropped: usize) {
        self.broadcasts_sent.fetch_add(sent as u64, Ordering::Relaxed);
        self.broadcasts_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn write_denied(&self) {
        self.writes_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persisted(&self, tier: Tier, bytes: usize, ok: bool) {
        let counter = match tier {
            Tier::Fast => &self.fast,
            Tier::Slow => &self.slow,
        };
        if ok {
            counter.saves.fetch_add(1, Ordering::Relaxed);
            counter.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        } else {
            counter.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn size_fallback(&self) {
        self.size_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            connections_opened: load(&self.connections_opened),
            connections_closed: load(&self.connections_closed),
            active_rooms: load(&self.active_rooms),
            sync_step1_messages: load(&self.step1.messages),
            sync_step1_bytes: load(&self.step1.bytes),
            sync_step2_messages: load(&self.step2.messages),
            sync_step2_bytes: load(&self.step2.bytes),
            sync_update_messages: load(&self.update.messages),
            sync_update_bytes: load(&self.update.bytes),
            awareness_messages: load(&self.awareness_messages),
            broadcasts_sent: load(&self.broadcasts_sent),
            broadcasts_dropped: load(&self.broadcasts_dropped),
            writes_denied: load(&self.writes_denied),
            decode_errors: load(&self.decode_errors),
            fast_saves: load(&self.fast.saves),
            fast_save_failures: load(&self.fast.failures),
            fast_bytes: load(&self.fast.bytes),
            slow_saves: load(&self.slow.saves),
            slow_save_failures: load(&self.slow.failures),
            slow_bytes: load(&self.slow.bytes),
            size_fallbacks: load(&self.size_fallbacks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_is_zero() {
        assert_eq!(CoordinatorStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_sync_counters_by_type() {
        let stats = CoordinatorStats::new();
        stats.sync_message(SyncType::Step1, 10);
        stats.sync_message(SyncType::Update, 100);
        stats.sync_message(SyncType::Update, 50);

        let snap = stats.snapshot();
        assert_eq!(snap.sync_step1_messages, 1);
        assert_eq!(snap.sync_step1_bytes, 10);
        assert_eq!(snap.sync_step2_messages, 0);
        assert_eq!(snap.sync_update_messages, 2);
        assert_eq!(snap.sync_update_bytes, 150);
    }

    #[test]
    fn test_persistence_counters() {
        let stats = CoordinatorStats::new();
        stats.persisted(Tier::Fast, 64, true);
        stats.persisted(Tier::Slow, 512, false);

        let snap = stats.snapshot();
        assert_eq!(snap.fast_saves, 1);
        assert_eq!(snap.fast_bytes, 64);
        assert_eq!(snap.slow_saves, 0);
        assert_eq!(snap.slow_save_failures, 1);
        assert_eq!(snap.slow_bytes, 0);
    }

    #[test]
    fn test_room_gauge_never_underflows() {
        let stats = CoordinatorStats::new();
        stats.room_destroyed();
        assert_eq!(stats.snapshot().active_rooms, 0);
        stats.room_created();
        stats.room_created();
        stats.room_destroyed();
        assert_eq!(stats.snapshot().active_rooms, 1);
    }
}
