// Append-only, time-bounded buffer of ingested activity events.
// The store favors boundedness over completeness: when the buffer is full
// the oldest events are dropped and counted, never errored.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::Event;

struct StoredEvent {
    event: Event,
    // Arrival sequence breaks timestamp ties
    seq: u64,
}

pub struct EventStore {
    events: RwLock<VecDeque<StoredEvent>>,
    max_buffer: usize,
    next_seq: AtomicU64,
    dropped: AtomicU64,
}

impl EventStore {
    pub fn new(max_buffer: usize) -> Self {
        EventStore {
            events: RwLock::new(VecDeque::with_capacity(max_buffer.min(1024))),
            max_buffer,
            next_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an event, assigning an id if the feed omitted one. Overflow
    /// drops the oldest entries rather than failing.
    pub fn append(&self, mut event: Event) {
        if event.event_id.is_nil() {
            event.event_id = Uuid::new_v4();
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut events = self.events.write();
        events.push_back(StoredEvent { event, seq });

        while events.len() > self.max_buffer {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events for one user within the trailing interval, chronological order.
    pub fn window(&self, user_id: &str, since: DateTime<Utc>) -> Vec<Event> {
        let events = self.events.read();
        let mut matched: Vec<&StoredEvent> = events
            .iter()
            .filter(|stored| stored.event.user_id == user_id && stored.event.timestamp >= since)
            .collect();
        matched.sort_by(|a, b| a.event.timestamp.cmp(&b.event.timestamp).then(a.seq.cmp(&b.seq)));
        matched.into_iter().map(|s| s.event.clone()).collect()
    }

    /// All live events, used for cross-user clustering.
    pub fn all(&self) -> Vec<Event> {
        let events = self.events.read();
        let mut all: Vec<&StoredEvent> = events.iter().collect();
        all.sort_by(|a, b| a.event.timestamp.cmp(&b.event.timestamp).then(a.seq.cmp(&b.seq)));
        all.into_iter().map(|s| s.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove events older than the cutoff. Only the retention sweeper calls
    /// this; returns the number removed.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|stored| stored.event.timestamp >= cutoff);
        before - events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use chrono::Duration;

    fn bet(user: &str, at: DateTime<Utc>, amount: f64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            user_id: user.to_string(),
            timestamp: at,
            kind: EventKind::BetPlaced { amount, market: None },
        }
    }

    #[test]
    fn window_is_chronological_even_for_out_of_order_arrival() {
        let store = EventStore::new(100);
        let now = Utc::now();

        store.append(bet("u-1", now, 10.0));
        store.append(bet("u-1", now - Duration::seconds(30), 20.0));
        store.append(bet("u-1", now - Duration::seconds(10), 30.0));

        let window = store.window("u-1", now - Duration::seconds(60));
        let amounts: Vec<f64> = window
            .iter()
            .map(|e| match e.kind {
                EventKind::BetPlaced { amount, .. } => amount,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(amounts, vec![20.0, 30.0, 10.0]);
    }

    #[test]
    fn window_excludes_other_users_and_stale_events() {
        let store = EventStore::new(100);
        let now = Utc::now();

        store.append(bet("u-1", now, 10.0));
        store.append(bet("u-2", now, 15.0));
        store.append(bet("u-1", now - Duration::seconds(120), 5.0));

        let window = store.window("u-1", now - Duration::seconds(60));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let store = EventStore::new(3);
        let now = Utc::now();

        for i in 0..5 {
            store.append(bet("u-1", now + Duration::seconds(i), i as f64));
        }

        assert_eq!(store.len(), 3);
        assert_eq!(store.dropped(), 2);
        // The survivors are the three newest
        let all = store.all();
        match all[0].kind {
            EventKind::BetPlaced { amount, .. } => assert_eq!(amount, 2.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn purge_removes_everything_older_than_cutoff() {
        let store = EventStore::new(100);
        let now = Utc::now();

        store.append(bet("u-1", now - Duration::seconds(600), 1.0));
        store.append(bet("u-1", now - Duration::seconds(10), 2.0));

        let removed = store.purge_older_than(now - Duration::seconds(300));
        assert_eq!(removed, 1);
        assert!(store.all().iter().all(|e| e.timestamp >= now - Duration::seconds(300)));
    }
}
