use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// How long a capability listing stays fresh.
pub const CAPABILITY_TTL: Duration = Duration::from_secs(30);

struct Entry<T> {
    data: Vec<T>,
    expires_at: Instant,
}

/// Single-slot memoization cell for one capability kind of one downstream.
///
/// Uses the tokio clock so paused-time tests can step past the TTL.
pub struct CapabilityCache<T> {
    ttl: Duration,
    slot: Mutex<Option<Entry<T>>>,
}

impl<T: Clone> CapabilityCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// The cached list, if present and unexpired.
    pub fn get(&self) -> Option<Vec<T>> {
        let slot = self.slot.lock();
        slot.as_ref()
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.data.clone())
    }

    /// Store a fresh list, replacing whatever was there.
    pub fn put(&self, data: Vec<T>) {
        *self.slot.lock() = Some(Entry {
            data,
            expires_at: Instant::now() + self.ttl,
        });
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }
}

impl<T: Clone> Default for CapabilityCache<T> {
    fn default() -> Self {
        Self::new(CAPABILITY_TTL)
    }
}
