//! In-process copy of the records last read from the provider.
//!
//! Purely a read-path optimization: the cache is rebuilt from every real
//! provider fetch and patched on apply so that cached cycles still observe
//! their own writes. Nothing here survives the process.

use std::time::{Duration, Instant};

use crate::endpoint::Endpoint;

#[derive(Debug, Clone)]
pub(crate) struct RecordsCache {
    endpoints: Vec<Endpoint>,
    refreshed_at: Instant,
    interval: Duration,
}

impl RecordsCache {
    pub(crate) fn new(endpoints: Vec<Endpoint>, interval: Duration) -> RecordsCache {
        RecordsCache {
            endpoints,
            refreshed_at: Instant::now(),
            interval,
        }
    }

    /// A copy of the cached records, or `None` once the interval has passed.
    /// A zero interval never yields a hit.
    pub(crate) fn get(&self) -> Option<Vec<Endpoint>> {
        if self.interval.is_zero() || self.refreshed_at.elapsed() >= self.interval {
            return None;
        }
        Some(self.endpoints.clone())
    }

    pub(crate) fn add(&mut self, ep: &Endpoint) {
        self.endpoints.push(ep.clone());
    }

    /// Remove the first entry matching `ep`'s (name, type, set-identifier)
    /// whose targets are set-equal.
    pub(crate) fn remove(&mut self, ep: &Endpoint) {
        if let Some(pos) = self
            .endpoints
            .iter()
            .position(|c| c.key() == ep.key() && c.targets.same(&ep.targets))
        {
            self.endpoints.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordType;

    fn ep(name: &str, target: &str) -> Endpoint {
        Endpoint::new(name, RecordType::A, vec![target])
    }

    #[test]
    fn should_expire_after_interval() {
        let cache = RecordsCache::new(vec![ep("foo.example.org", "1.1.1.1")], Duration::from_secs(60));
        assert!(cache.get().is_some());

        let cache = RecordsCache::new(vec![ep("foo.example.org", "1.1.1.1")], Duration::ZERO);
        assert!(cache.get().is_none(), "zero interval must never serve hits");
    }

    #[test]
    fn should_remove_first_matching_entry_only() {
        let mut cache = RecordsCache::new(
            vec![
                ep("foo.example.org", "1.1.1.1"),
                ep("foo.example.org", "1.1.1.1"),
                ep("foo.example.org", "2.2.2.2"),
            ],
            Duration::from_secs(60),
        );
        cache.remove(&ep("foo.example.org", "1.1.1.1"));
        let left = cache.get().unwrap();
        assert_eq!(left.len(), 2);

        // No match on targets leaves the cache untouched.
        cache.remove(&ep("foo.example.org", "9.9.9.9"));
        assert_eq!(cache.get().unwrap().len(), 2);
    }
}
