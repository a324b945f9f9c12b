// src/cache/mod.rs

pub mod store;

#[cfg(test)]
mod tests;

pub use store::CacheStore;

use serde::Serialize;
use std::time::Duration;

/// Standard cache lifetimes, from live data to static reference data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTtl {
    /// Live scores, price changes
    VeryShort,
    /// Player form, ownership
    Short,
    /// Player stats, team data
    Medium,
    /// Bootstrap data, fixtures
    Long,
    /// Historical data
    VeryLong,
    /// Teams, positions, constants
    Permanent,
}

impl CacheTtl {
    pub const fn as_secs(self) -> u64 {
        match self {
            CacheTtl::VeryShort => 60,
            CacheTtl::Short => 300,
            CacheTtl::Medium => 900,
            CacheTtl::Long => 3600,
            CacheTtl::VeryLong => 7200,
            CacheTtl::Permanent => 86400,
        }
    }

    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

impl From<CacheTtl> for Duration {
    fn from(ttl: CacheTtl) -> Self {
        ttl.as_duration()
    }
}

/// Cache counters for the lifetime of a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
