//! Rate-limited latest-value publishing for live displays. Readers always
//! see the newest update; nothing queues up behind a slow reader.

use std::sync::{Arc, Mutex};

/// Shared slot holding the newest published value and its revision.
#[derive(Debug)]
pub struct LiveFeed<T> {
    slot: Arc<Mutex<Option<(u64, T)>>>,
}

impl<T> Clone for LiveFeed<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Default for LiveFeed<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Clone> LiveFeed<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, value: T) {
        // a poisoned slot still holds a complete value
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };

        let revision = slot.as_ref().map(|(r, _)| r + 1).unwrap_or(1);
        *slot = Some((revision, value));
    }

    /// Newest value and its revision, starting at 1.
    pub fn latest(&self) -> Option<(u64, T)> {
        let slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };

        slot.clone()
    }

    /// Newest value if it is newer than `seen`.
    pub fn since(&self, seen: u64) -> Option<(u64, T)> {
        self.latest().filter(|(r, _)| *r > seen)
    }
}

/// Writes into a [`LiveFeed`] at most `hz` times per second of stream time.
/// The newest value held back by the limit stays pending until the next
/// publish replaces it.
#[derive(Debug)]
pub struct ThrottledPublisher<T> {
    feed: LiveFeed<T>,
    min_interval: f64,
    last: Option<f64>,
    pending: Option<T>,
}

impl<T: Clone> ThrottledPublisher<T> {
    /// Non-positive `hz` publishes every offer.
    pub fn new(hz: f64) -> Self {
        let min_interval = if hz > 0.0 && hz.is_finite() {
            1.0 / hz
        } else {
            0.0
        };

        Self {
            feed: LiveFeed::new(),
            min_interval,
            last: None,
            pending: None,
        }
    }

    pub fn feed(&self) -> LiveFeed<T> {
        self.feed.clone()
    }

    /// Publishes `value` unless the previous publish was too recent.
    pub fn offer(&mut self, value: T, timestamp: f64) -> bool {
        if let Some(last) = self.last {
            // stream restarted or clock went back
            let due = timestamp < last || timestamp - last >= self.min_interval - 1e-9;
            if !due {
                self.pending = Some(value);
                return false;
            }
        }

        self.force(value, timestamp);

        true
    }

    /// Publishes regardless of the rate limit, e.g. a final state.
    pub fn force(&mut self, value: T, timestamp: f64) {
        self.feed.store(value);
        self.last = Some(timestamp);
        self.pending = None;
    }

    /// Takes the held-back value, e.g. to publish a final state built on it.
    pub fn take_pending(&mut self) -> Option<T> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttles_to_rate() {
        let mut publisher = ThrottledPublisher::new(30.0);
        let feed = publisher.feed();

        // 120 fps for one second
        let published = (0..120)
            .filter(|&i| publisher.offer(i, i as f64 / 120.0))
            .count();

        assert_eq!(published, 30);
        assert_eq!(feed.latest().map(|(_, v)| v), Some(116));
    }

    #[test]
    fn readers_see_only_newer_values() {
        let mut publisher = ThrottledPublisher::new(0.0);
        let feed = publisher.feed();
        assert!(feed.latest().is_none());

        publisher.offer("a", 0.0);
        let (rev, v) = feed.latest().unwrap();
        assert_eq!((rev, v), (1, "a"));
        assert!(feed.since(rev).is_none());

        publisher.offer("b", 0.0);
        assert_eq!(feed.since(rev), Some((2, "b")));
    }

    #[test]
    fn force_bypasses_limit() {
        let mut publisher = ThrottledPublisher::new(1.0);
        let feed = publisher.feed();

        assert!(publisher.offer(1, 0.0));
        assert!(!publisher.offer(2, 0.5));
        publisher.force(3, 0.6);

        assert_eq!(feed.latest().map(|(_, v)| v), Some(3));
        assert!(!publisher.offer(4, 1.0));
        assert!(publisher.offer(5, 1.6));
    }

    #[test]
    fn newest_held_back_value_stays_pending() {
        let mut publisher = ThrottledPublisher::new(10.0);
        let feed = publisher.feed();

        assert!(publisher.offer(1, 0.0));
        assert!(!publisher.offer(2, 0.02));
        assert!(!publisher.offer(3, 0.04));
        assert_eq!(feed.latest(), Some((1, 1)));
        assert_eq!(publisher.take_pending(), Some(3));
        assert_eq!(publisher.take_pending(), None);

        // a publish supersedes whatever was held back
        assert!(!publisher.offer(4, 0.06));
        assert!(publisher.offer(5, 0.2));
        assert_eq!(publisher.take_pending(), None);

        assert!(!publisher.offer(6, 0.21));
        publisher.force(7, 0.22);
        assert_eq!(publisher.take_pending(), None);
        assert_eq!(feed.latest(), Some((3, 7)));
    }
}
