use serde::Serialize;
use std::ops::AddAssign;

use crate::info;
use crate::sim::log::Logger;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hit: u64,
    pub miss: u64,
    pub seq_read: u64,
    pub seq_write: u64,
    pub rand_read: u64,
    pub rand_write: u64,
    pub allocate: u64,
    pub prefetch: u64,
    pub writeback: u64,
}

impl CacheStats {
    pub fn record_hit(&mut self) {
        self.hit = self.hit.saturating_add(1);
    }

    pub fn record_miss(&mut self) {
        self.miss = self.miss.saturating_add(1);
    }

    pub fn record_access(&mut self, write: bool, sequential: bool) {
        let counter = match (write, sequential) {
            (false, true) => &mut self.seq_read,
            (true, true) => &mut self.seq_write,
            (false, false) => &mut self.rand_read,
            (true, false) => &mut self.rand_write,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn record_allocate(&mut self) {
        self.allocate = self.allocate.saturating_add(1);
    }

    pub fn record_prefetch(&mut self) {
        self.prefetch = self.prefetch.saturating_add(1);
    }

    pub fn record_writeback(&mut self) {
        self.writeback = self.writeback.saturating_add(1);
    }

    pub fn accesses(&self) -> u64 {
        self.seq_read + self.seq_write + self.rand_read + self.rand_write
    }

    /// Every demand access resolves to exactly one hit or one miss.
    pub fn is_balanced(&self) -> bool {
        self.hit + self.miss == self.accesses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hit + self.miss;
        if total == 0 {
            0.0
        } else {
            self.hit as f64 / total as f64
        }
    }

    pub fn print(&self, name: &str, logger: &Logger) {
        info!(
            logger,
            "{}: hit={} miss={} seq_read={} seq_write={} rand_read={} rand_write={} allocate={} prefetch={} writeback={} hit_rate={:.3}",
            name,
            self.hit,
            self.miss,
            self.seq_read,
            self.seq_write,
            self.rand_read,
            self.rand_write,
            self.allocate,
            self.prefetch,
            self.writeback,
            self.hit_rate()
        );
    }
}

impl AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: Self) {
        self.hit = self.hit.saturating_add(rhs.hit);
        self.miss = self.miss.saturating_add(rhs.miss);
        self.seq_read = self.seq_read.saturating_add(rhs.seq_read);
        self.seq_write = self.seq_write.saturating_add(rhs.seq_write);
        self.rand_read = self.rand_read.saturating_add(rhs.rand_read);
        self.rand_write = self.rand_write.saturating_add(rhs.rand_write);
        self.allocate = self.allocate.saturating_add(rhs.allocate);
        self.prefetch = self.prefetch.saturating_add(rhs.prefetch);
        self.writeback = self.writeback.saturating_add(rhs.writeback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_kinds_land_in_their_counters() {
        let mut stats = CacheStats::default();
        stats.record_access(false, true);
        stats.record_access(true, false);
        stats.record_hit();
        stats.record_miss();
        assert_eq!(1, stats.seq_read);
        assert_eq!(1, stats.rand_write);
        assert!(stats.is_balanced());
        assert_eq!(0.5, stats.hit_rate());
    }

    #[test]
    fn add_assign_accumulates() {
        let mut total = CacheStats::default();
        let mut one = CacheStats::default();
        one.record_writeback();
        one.record_prefetch();
        total += one;
        total += one;
        assert_eq!(2, total.writeback);
        assert_eq!(2, total.prefetch);
    }
}
