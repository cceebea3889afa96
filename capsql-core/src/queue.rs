use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use capsql_types::parking_lot::{Condvar, Mutex};
use capsql_types::types::DataRow;

use crate::errors::WriterError;

/// Consumer poll period; bounds how long shutdown checks can lag.
pub const POP_TIMEOUT: Duration = Duration::from_millis(500);

/// Bounded single-producer/single-consumer row queue.
///
/// The producer blocks at the capacity high-water mark and resumes once
/// the consumer has drained to half capacity. A `None` item is the
/// shutdown sentinel: the consumer drains everything before it and stops.
pub fn row_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::new(),
            capacity: capacity.max(2),
            consumer_alive: true,
            consumer_active: false,
        }),
        space: Condvar::new(),
        available: Condvar::new(),
    });
    (
        QueueSender {
            shared: shared.clone(),
        },
        QueueReceiver { shared },
    )
}

struct State {
    items: VecDeque<Option<DataRow>>,
    capacity: usize,
    consumer_alive: bool,
    consumer_active: bool,
}

struct Shared {
    state: Mutex<State>,
    space: Condvar,
    available: Condvar,
}

pub struct QueueSender {
    shared: Arc<Shared>,
}

impl QueueSender {
    /// Enqueues a row, blocking while the backlog is above the high-water
    /// mark. Fails once the consumer has died.
    pub fn push(&self, row: DataRow) -> Result<(), WriterError> {
        self.push_item(Some(row))
    }

    /// Enqueues the shutdown sentinel.
    pub fn push_sentinel(&self) -> Result<(), WriterError> {
        self.push_item(None)
    }

    /// Whether the consumer is currently between `set_active(true)` and
    /// `set_active(false)`.
    pub fn consumer_active(&self) -> bool {
        self.shared.state.lock().consumer_active
    }

    fn push_item(&self, item: Option<DataRow>) -> Result<(), WriterError> {
        let mut state = self.shared.state.lock();
        if state.items.len() >= state.capacity {
            // High-water mark reached; resume only once the consumer has
            // drained the backlog to half capacity.
            while state.consumer_alive && state.items.len() > state.capacity / 2 {
                self.shared.space.wait(&mut state);
            }
        }
        if !state.consumer_alive {
            return Err(WriterError::WriterDead);
        }
        state.items.push_back(item);
        drop(state);
        self.shared.available.notify_one();
        Ok(())
    }
}

pub struct QueueReceiver {
    shared: Arc<Shared>,
}

impl QueueReceiver {
    /// Dequeues the next item, waiting at most [`POP_TIMEOUT`]. `None`
    /// means the wait timed out; `Some(None)` is the shutdown sentinel.
    pub fn pop(&self) -> Option<Option<DataRow>> {
        let mut state = self.shared.state.lock();
        if state.items.is_empty() {
            let _ = self.shared.available.wait_for(&mut state, POP_TIMEOUT);
            if state.items.is_empty() {
                return None;
            }
        }
        let item = state.items.pop_front().expect("checked non-empty");
        // Wake the producer only once the backlog has drained far enough.
        if state.items.len() <= state.capacity / 2 {
            drop(state);
            self.shared.space.notify_one();
        }
        Some(item)
    }

    /// Marks the consumer as running or stopped.
    pub fn set_active(&self, active: bool) {
        self.shared.state.lock().consumer_active = active;
    }

    /// Marks the consumer dead: pending and future `push` calls fail.
    pub fn mark_dead(&self) {
        let mut state = self.shared.state.lock();
        state.consumer_alive = false;
        state.consumer_active = false;
        drop(state);
        self.shared.space.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsql_types::types::DataRow;
    use std::thread;

    fn row(table: &str) -> DataRow {
        DataRow::new(table.to_string())
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (tx, rx) = row_queue(10);
        tx.push(row("a")).unwrap();
        tx.push(row("b")).unwrap();
        tx.push_sentinel().unwrap();
        assert_eq!(rx.pop().unwrap().unwrap().table_name, "a");
        assert_eq!(rx.pop().unwrap().unwrap().table_name, "b");
        assert_eq!(rx.pop().unwrap(), None);
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let (_tx, rx) = row_queue(10);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn producer_blocks_at_high_water_until_half_drained() {
        let (tx, rx) = row_queue(4);
        for i in 0..4 {
            tx.push(row(&format!("r{i}"))).unwrap();
        }

        let producer = thread::spawn(move || {
            tx.push(row("blocked")).unwrap();
            tx
        });
        // Producer cannot finish while the queue sits at capacity.
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        // Draining to half capacity releases it.
        assert!(rx.pop().is_some());
        assert!(rx.pop().is_some());
        let tx = producer.join().unwrap();
        drop(tx);
        assert_eq!(rx.pop().unwrap().unwrap().table_name, "r2");
    }

    #[test]
    fn push_fails_once_consumer_is_dead() {
        let (tx, rx) = row_queue(4);
        rx.set_active(true);
        assert!(tx.consumer_active());
        rx.mark_dead();
        assert!(!tx.consumer_active());
        assert!(matches!(tx.push(row("x")), Err(WriterError::WriterDead)));
    }

    #[test]
    fn blocked_producer_unblocks_on_dead_consumer() {
        let (tx, rx) = row_queue(2);
        tx.push(row("a")).unwrap();
        tx.push(row("b")).unwrap();
        let producer = thread::spawn(move || tx.push(row("c")));
        thread::sleep(Duration::from_millis(50));
        rx.mark_dead();
        assert!(matches!(producer.join().unwrap(), Err(WriterError::WriterDead)));
    }
}
