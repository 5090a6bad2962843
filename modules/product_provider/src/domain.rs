use std::sync::atomic::{AtomicI64, Ordering};

use crate::contract::Product;

/// Thread-safe counter backing the `product` resource.
#[derive(Debug)]
pub struct Counter {
    value: AtomicI64,
    step: i64,
}

impl Counter {
    pub fn new(initial: i64, step: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            step,
        }
    }
}

impl Product for Counter {
    fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    fn increase_value(&self) -> i64 {
        self.value.fetch_add(self.step, Ordering::SeqCst) + self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn increases_by_step() {
        let c = Counter::new(10, 5);
        assert_eq!(c.value(), 10);
        assert_eq!(c.increase_value(), 15);
        assert_eq!(c.increase_value(), 20);
        assert_eq!(c.value(), 20);
    }

    #[test]
    fn concurrent_increases_are_not_lost() {
        let c = Arc::new(Counter::new(0, 1));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        c.increase_value();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(c.value(), 1000);
    }
}
