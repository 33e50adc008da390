//! Bounded-attempt priority queue

/// Item that can be tracked by a [`PriorityQueue`].
pub trait QueueItem {
    /// Identity used to refuse duplicate pushes.
    fn id(&self) -> &str;

    fn attempts(&self) -> u32;

    fn set_attempts(&mut self, attempts: u32);
}

/// FIFO queue ordered by attempt count.
///
/// Every accepted push bumps the item's attempt counter by one. Items with
/// fewer attempts are popped first and ties keep insertion order, so a
/// retried item goes behind everything that is still on its first try.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    max_attempts: u32,
    items: Vec<T>,
}

impl<T: QueueItem> PriorityQueue<T> {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            items: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Push an item, handing it back if it is refused.
    ///
    /// An item is refused when it is already queued or when accepting it
    /// would take it past `max_attempts`. A refused item keeps its previous
    /// attempt count.
    pub fn push(&mut self, mut item: T) -> std::result::Result<(), T> {
        let attempts = item.attempts() + 1;
        if attempts > self.max_attempts || self.includes(item.id()) {
            return Err(item);
        }

        item.set_attempts(attempts);
        self.items.push(item);
        self.items.sort_by_key(|i| i.attempts());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.remove(0))
    }

    pub fn includes(&self, id: &str) -> bool {
        self.items.iter().any(|i| i.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
