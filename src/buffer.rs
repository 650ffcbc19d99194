//! The consumer-side bounded buffer: dedup by id, most-recent-first,
//! capped capacity, and the accessible announcement hook.

use std::collections::{HashSet, VecDeque};

use crate::event::DomainEvent;

/// Bounded, ordered event buffer held by a consumer widget.
///
/// Insertion contract: an event whose `id` is already present is a no-op
/// (first-seen wins; the existing entry is neither updated nor moved).
/// Otherwise the event is prepended and the buffer truncated to capacity.
/// Both the stream and polling paths feed this same contract.
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    entries: VecDeque<DomainEvent>,
    ids: HashSet<String>,
    announcement: Option<String>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            announcement: None,
        }
    }

    /// Insert one event. Returns true if it was actually added.
    pub fn insert(&mut self, event: DomainEvent) -> bool {
        if self.ids.contains(&event.id) {
            return false;
        }

        self.announcement = Some(event.summary());
        self.ids.insert(event.id.clone());
        self.entries.push_front(event);

        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                self.ids.remove(&evicted.id);
            }
        }
        true
    }

    /// Merge a batch (typically a poll result). Returns how many events
    /// were actually inserted; duplicates neither add entries nor reorder
    /// existing ones.
    pub fn merge(&mut self, events: impl IntoIterator<Item = DomainEvent>) -> usize {
        events.into_iter().filter(|e| self.insert(e.clone())).count()
    }

    /// One-shot polite live-region text describing the newest inserted
    /// event. Set only when an insertion actually happened, cleared on
    /// read so screen readers announce each change once.
    pub fn take_announcement(&mut self) -> Option<String> {
        self.announcement.take()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most-recent-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &DomainEvent> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&DomainEvent> {
        self.entries.front()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}
