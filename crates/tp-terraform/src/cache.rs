//! Single-slot, time-bounded cache for the project snapshot.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tp_protocol::ProjectSnapshot;

use crate::error::TerraformResult;
use crate::parser::ProjectParser;

/// Default snapshot lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct Slot {
    snapshot: Arc<ProjectSnapshot>,
    taken_at: Instant,
}

/// Serves the last parsed snapshot until it is older than the TTL.
///
/// The slot lock is held across the parse, so concurrent callers on a cold
/// or expired cache trigger exactly one re-derivation.
pub struct SnapshotCache {
    parser: Arc<dyn ProjectParser>,
    ttl: Duration,
    slot: Mutex<Option<Slot>>,
}

impl SnapshotCache {
    pub fn new(parser: Arc<dyn ProjectParser>, ttl: Duration) -> Self {
        Self {
            parser,
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached snapshot, re-parsing when expired or when `force_refresh`.
    /// A failed parse leaves the previous slot untouched.
    pub fn get(&self, force_refresh: bool) -> TerraformResult<Arc<ProjectSnapshot>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());

        if !force_refresh {
            if let Some(cached) = slot.as_ref() {
                if cached.taken_at.elapsed() < self.ttl {
                    return Ok(cached.snapshot.clone());
                }
            }
        }

        let snapshot = Arc::new(self.parser.parse()?);
        tracing::debug!(
            resources = snapshot.resource_count(),
            forced = force_refresh,
            "project snapshot refreshed"
        );
        *slot = Some(Slot {
            snapshot: snapshot.clone(),
            taken_at: Instant::now(),
        });
        Ok(snapshot)
    }

    /// Age of the cached snapshot, if any.
    pub fn age(&self) -> Option<Duration> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|s| s.taken_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::StaticParser;

    fn cache(parser: &Arc<StaticParser>, ttl: Duration) -> SnapshotCache {
        SnapshotCache::new(parser.clone(), ttl)
    }

    #[test]
    fn second_get_within_ttl_is_cached() {
        let parser = Arc::new(StaticParser::with_sample_project());
        let cache = cache(&parser, DEFAULT_TTL);
        let first = cache.get(false).unwrap();
        let second = cache.get(false).unwrap();
        assert_eq!(parser.parse_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn force_refresh_reparses() {
        let parser = Arc::new(StaticParser::with_sample_project());
        let cache = cache(&parser, DEFAULT_TTL);
        cache.get(false).unwrap();
        cache.get(true).unwrap();
        assert_eq!(parser.parse_count(), 2);
    }

    #[test]
    fn expiry_reparses_once() {
        let parser = Arc::new(StaticParser::with_sample_project());
        let cache = cache(&parser, Duration::from_millis(30));
        cache.get(false).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        cache.get(false).unwrap();
        cache.get(false).unwrap();
        assert_eq!(parser.parse_count(), 2);
    }

    #[test]
    fn failed_parse_keeps_previous_slot() {
        let parser = Arc::new(StaticParser::with_sample_project());
        let cache = cache(&parser, DEFAULT_TTL);
        cache.get(false).unwrap();
        parser.set_failing(true);
        assert!(cache.get(true).is_err());
        assert!(cache.age().is_some());
        parser.set_failing(false);
        assert_eq!(cache.get(false).unwrap().resource_count(), 3);
    }

    #[test]
    fn age_is_none_before_first_get() {
        let parser = Arc::new(StaticParser::with_sample_project());
        assert!(cache(&parser, DEFAULT_TTL).age().is_none());
    }
}
