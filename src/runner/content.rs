use std::sync::Mutex;

use rand::Rng;
use rand::seq::SliceRandom;

/// Bounded uniform sample of content identifiers (reservoir sampling).
#[derive(Debug)]
pub struct ContentPool {
    capacity: usize,
    state: Mutex<Reservoir>,
}

#[derive(Debug, Default)]
struct Reservoir {
    items: Vec<String>,
    seen: u64,
}

impl ContentPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(Reservoir::default()),
        }
    }

    pub fn offer(&self, item: String) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.seen = state.seen.saturating_add(1);
        if state.items.len() < self.capacity {
            state.items.push(item);
            return;
        }
        let slot = rand::thread_rng().gen_range(0..state.seen);
        if let Some(existing) = usize::try_from(slot)
            .ok()
            .and_then(|idx| state.items.get_mut(idx))
        {
            *existing = item;
        }
    }

    pub fn extend<I>(&self, items: I)
    where
        I: IntoIterator<Item = String>,
    {
        for item in items {
            self.offer(item);
        }
    }

    /// Replace the whole pool, e.g. with a sample pushed by the master.
    pub fn replace(&self, items: Vec<String>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.seen = u64::try_from(items.len()).unwrap_or(u64::MAX);
        state.items = items;
        state.items.truncate(self.capacity);
    }

    #[must_use]
    pub fn choose(&self) -> Option<String> {
        let state = self.state.lock().ok()?;
        state.items.choose(&mut rand::thread_rng()).cloned()
    }

    #[must_use]
    pub fn sample(&self, amount: usize) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .items
            .choose_multiple(&mut rand::thread_rng(), amount)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn drain(&self) -> Vec<String> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        state.seen = 0;
        std::mem::take(&mut state.items)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map_or(0, |state| state.items.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
