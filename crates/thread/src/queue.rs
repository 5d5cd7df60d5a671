use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::sync::panic_message;

/// Ordering strategy for a [`DynamicSortedQueue`].
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A queue whose ordering can be replaced at any time.
///
/// Items are kept in insertion order and `next` scans for the minimum under
/// the active comparator, so equal items come out first-in first-out and a
/// new comparator takes effect on the very next call.
#[derive(Clone)]
pub struct DynamicSortedQueue<T> {
    items: Vec<T>,
    comparator: Comparator<T>,
}

impl<T: PartialEq + Clone> DynamicSortedQueue<T> {
    pub fn new(comparator: Comparator<T>) -> Self {
        Self {
            items: Vec::new(),
            comparator,
        }
    }

    /// Enqueue `item`. Returns false if it is already present.
    pub fn add(&mut self, item: T) -> bool {
        if self.items.contains(&item) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Remove and return the minimum item.
    pub fn next(&mut self) -> Option<T> {
        let mut best = 0;
        if self.items.is_empty() {
            return None;
        }
        for i in 1..self.items.len() {
            if (self.comparator)(&self.items[i], &self.items[best]) == Ordering::Less {
                best = i;
            }
        }
        Some(self.items.remove(best))
    }

    pub fn remove(&mut self, item: &T) -> bool {
        match self.items.iter().position(|x| x == item) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn set_comparator(&mut self, comparator: Comparator<T>) {
        self.comparator = comparator;
    }

    /// Remove every item `keep` rejects and return them in queue order.
    pub fn filter(&mut self, mut keep: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut rejected = Vec::new();
        self.items.retain(|item| {
            if keep(item) {
                true
            } else {
                rejected.push(item.clone());
                false
            }
        });
        rejected
    }

    /// Visit items in insertion order. A panicking body stops the walk; the
    /// panic is logged and the number of items fully processed is returned.
    pub fn process_each(&self, mut body: impl FnMut(&T)) -> usize {
        let mut count = 0;
        for item in &self.items {
            match panic::catch_unwind(AssertUnwindSafe(|| body(item))) {
                Ok(()) => count += 1,
                Err(payload) => {
                    error!(
                        processed = count,
                        "queue iteration aborted: {}",
                        panic_message(payload.as_ref())
                    );
                    break;
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fifo() -> DynamicSortedQueue<u32> {
        DynamicSortedQueue::new(Arc::new(|_: &u32, _: &u32| Ordering::Equal))
    }

    #[test]
    fn equal_items_come_out_in_insertion_order() {
        let mut q = fifo();
        for i in [5, 1, 3] {
            assert!(q.add(i));
        }
        assert_eq!(q.next(), Some(5));
        assert_eq!(q.next(), Some(1));
        assert_eq!(q.next(), Some(3));
        assert_eq!(q.next(), None);
    }

    #[test]
    fn add_is_idempotent() {
        let mut q = fifo();
        assert!(q.add(7));
        assert!(!q.add(7));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_and_contains() {
        let mut q = fifo();
        q.add(1);
        q.add(2);
        assert!(q.contains(&2));
        assert!(q.remove(&2));
        assert!(!q.remove(&2));
        assert!(!q.contains(&2));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn comparator_change_applies_to_next_call() {
        let mut q = fifo();
        for i in [2, 9, 4] {
            q.add(i);
        }
        assert_eq!(q.next(), Some(2));
        q.set_comparator(Arc::new(|a: &u32, b: &u32| b.cmp(a)));
        assert_eq!(q.next(), Some(9));
        assert_eq!(q.next(), Some(4));
    }

    #[test]
    fn filter_returns_rejected_items() {
        let mut q = fifo();
        for i in 1..=6 {
            q.add(i);
        }
        let odd = q.filter(|i| i % 2 == 0);
        assert_eq!(odd, vec![1, 3, 5]);
        assert_eq!(q.len(), 3);
        assert_eq!(q.next(), Some(2));
    }

    #[test]
    fn process_each_stops_on_panic() {
        let mut q = fifo();
        for i in 1..=4 {
            q.add(i);
        }
        let mut seen = Vec::new();
        let processed = q.process_each(|i| {
            if *i == 3 {
                panic!("boom");
            }
            seen.push(*i);
        });
        assert_eq!(processed, 2);
        assert_eq!(seen, vec![1, 2]);
    }
}
