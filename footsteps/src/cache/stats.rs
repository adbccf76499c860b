//! Cache statistics snapshots.

use serde::Serialize;

/// Name of the event carrying [`CacheStats`] to display consumers.
pub const CACHE_STATS_EVENT: &str = "footsteps:cache-stats";

/// Point-in-time view of the feature cache.
///
/// Published after every `get` and `set`. Consumers that have not yet
/// received a snapshot must show "no data", not zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub tile_count: usize,
    pub total_bytes: usize,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`, or `None` before the first lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let lookups = self.hits + self.misses;
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }

    /// Serializes the snapshot as a named event payload.
    pub fn to_event(&self) -> serde_json::Value {
        serde_json::json!({
            "event": CACHE_STATS_EVENT,
            "detail": self,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), None);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), Some(0.75));
    }

    #[test]
    fn test_event_uses_camel_case() {
        let stats = CacheStats {
            hits: 1,
            misses: 2,
            tile_count: 3,
            total_bytes: 4,
        };
        let event = stats.to_event();
        assert_eq!(event["event"], CACHE_STATS_EVENT);
        assert_eq!(event["detail"]["tileCount"], 3);
        assert_eq!(event["detail"]["totalBytes"], 4);
    }
}
