use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what the relay did with the events it saw
#[derive(Debug, Default)]
pub struct RelayStats {
    published: AtomicU64,
    publish_failures: AtomicU64,
    received: AtomicU64,
    self_filtered: AtomicU64,
    delivered: AtomicU64,
    decode_failures: AtomicU64,
    handler_panics: AtomicU64,
    outbound_overflow: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub self_filtered: u64,
    pub delivered: u64,
    pub decode_failures: u64,
    pub handler_panics: u64,
    pub outbound_overflow: u64,
}

impl RelayStats {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_self_filtered(&self) {
        self.self_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound_overflow(&self) {
        self.outbound_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            self_filtered: self.self_filtered.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            outbound_overflow: self.outbound_overflow.load(Ordering::Relaxed),
        }
    }
}
