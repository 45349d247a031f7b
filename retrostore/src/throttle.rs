//! Per-key write throttling.
//!
//! The writer accepts any number of writes but commits at most one per key
//! per `min_interval`; the latest value wins. [`ThrottledWriter::flush`] is the final write issued on
//! page hide / shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use retroutils::{after, SharedClock};
use tracing::{debug, warn};

use crate::{KeyValueStore, Result, StoreError};

#[derive(Debug, Default)]
struct KeySlot {
    last_write: Option<DateTime<Utc>>,
    pending: Option<String>,
}

pub struct ThrottledWriter {
    store: Arc<dyn KeyValueStore>,
    clock: SharedClock,
    min_interval: Duration,
    slots: Mutex<HashMap<String, KeySlot>>,
}

impl std::fmt::Debug for ThrottledWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledWriter")
            .field("min_interval", &self.min_interval)
            .field("pending", &self.pending_keys())
            .finish()
    }
}

impl ThrottledWriter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: SharedClock, min_interval: Duration) -> Self {
        Self {
            store,
            clock,
            min_interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Writes `value` now if the key's interval has elapsed, otherwise keeps it
    /// as the pending value.
    ///
    /// Returns `true` if the value reached the store.
    pub fn write(&self, key: &str, value: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().expect("ThrottledWriter mutex poisoned");
        let slot = slots.entry(key.to_string()).or_default();

        let due = match slot.last_write {
            None => true,
            Some(last) => now >= after(last, self.min_interval),
        };

        if !due {
            slot.pending = Some(value.to_string());
            return Ok(false);
        }

        slot.pending = None;
        slot.last_write = Some(now);
        self.store.set(key, value)?;
        Ok(true)
    }

    /// Commits pending values whose interval has elapsed.
    pub fn flush_due(&self) -> Result<usize> {
        let now = self.clock.now();
        self.commit(|slot| match slot.last_write {
            None => true,
            Some(last) => now >= after(last, self.min_interval),
        })
    }

    /// Commits every pending value regardless of the interval.
    pub fn flush(&self) -> Result<usize> {
        self.commit(|_| true)
    }

    pub fn has_pending(&self, key: &str) -> bool {
        let slots = self.slots.lock().expect("ThrottledWriter mutex poisoned");
        slots.get(key).is_some_and(|s| s.pending.is_some())
    }

    fn pending_keys(&self) -> Vec<String> {
        let slots = self.slots.lock().expect("ThrottledWriter mutex poisoned");
        slots
            .iter()
            .filter(|(_, s)| s.pending.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn commit(&self, eligible: impl Fn(&KeySlot) -> bool) -> Result<usize> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().expect("ThrottledWriter mutex poisoned");
        let mut written = 0;
        let mut failed = 0;

        for (key, slot) in slots.iter_mut() {
            if slot.pending.is_none() || !eligible(slot) {
                continue;
            }
            let Some(value) = slot.pending.take() else {
                continue;
            };
            slot.last_write = Some(now);
            match self.store.set(key, &value) {
                Ok(()) => written += 1,
                Err(e) => {
                    // dropped: a later write will carry a fresher value anyway
                    warn!(key = %key, error = %e, "Dropping pending write");
                    failed += 1;
                }
            }
        }

        if written > 0 {
            debug!(written, "Flushed pending writes");
        }
        if failed > 0 {
            return Err(StoreError::other(format!(
                "{} pending write(s) failed",
                failed
            )));
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::TimeZone;
    use retroutils::ManualClock;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, ThrottledWriter) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let writer = ThrottledWriter::new(store.clone(), clock.clone(), Duration::from_secs(1));
        (store, clock, writer)
    }

    #[test]
    fn test_first_write_goes_through() {
        let (store, _clock, writer) = setup();
        assert!(writer.write("k", "v1").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn test_burst_is_coalesced_to_latest_value() {
        let (store, clock, writer) = setup();
        writer.write("k", "v1").unwrap();

        clock.advance_ms(200);
        assert!(!writer.write("k", "v2").unwrap());
        clock.advance_ms(200);
        assert!(!writer.write("k", "v3").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));
        assert!(writer.has_pending("k"));

        // not yet due
        assert_eq!(writer.flush_due().unwrap(), 0);

        clock.advance_ms(700);
        assert_eq!(writer.flush_due().unwrap(), 1);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v3"));
        assert!(!writer.has_pending("k"));
    }

    #[test]
    fn test_final_flush_ignores_interval() {
        let (store, clock, writer) = setup();
        writer.write("k", "v1").unwrap();
        clock.advance_ms(10);
        writer.write("k", "v2").unwrap();

        assert_eq!(writer.flush().unwrap(), 1);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(writer.flush().unwrap(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (store, clock, writer) = setup();
        writer.write("a", "1").unwrap();
        clock.advance_ms(10);
        assert!(writer.write("b", "2").unwrap());
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(StoreError::other("disk full"))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_flush_drops_pending_value() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let writer = ThrottledWriter::new(Arc::new(BrokenStore), clock.clone(), Duration::from_secs(1));

        assert!(writer.write("k", "v").is_err());
        clock.advance_ms(10);
        assert!(!writer.write("k", "v2").unwrap());
        assert!(writer.flush().is_err());
        assert!(!writer.has_pending("k"));
    }
}
