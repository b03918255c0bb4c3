//! Lock-free work queue for distributing shards across parallel workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free queue handing out each item exactly once.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next item
/// together with its 1-based position, used for "[n/total]" log labels.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item (lock-free)
    pub fn next(&self) -> Option<(usize, &S)> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i).map(|item| (i + 1, item))
    }

    /// Total items in queue
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items not yet claimed
    pub fn remaining(&self) -> usize {
        self.items
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_in_order_with_position() {
        let q = WorkQueue::new(vec!["a", "b"]);
        assert_eq!(q.total(), 2);
        assert_eq!(q.next(), Some((1, &"a")));
        assert_eq!(q.remaining(), 1);
        assert_eq!(q.next(), Some((2, &"b")));
        assert_eq!(q.next(), None);
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn empty_queue() {
        let q: WorkQueue<i32> = WorkQueue::new(vec![]);
        assert_eq!(q.total(), 0);
        assert_eq!(q.next(), None);
    }

    #[test]
    fn concurrent_claims_are_unique() {
        let q = WorkQueue::new((0..1000).collect::<Vec<_>>());
        let seen = std::sync::Mutex::new(Vec::new());
        rayon::scope(|s| {
            for _ in 0..4 {
                s.spawn(|_| {
                    while let Some((_, item)) = q.next() {
                        seen.lock().unwrap().push(*item);
                    }
                });
            }
        });
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
