//! The writer queue: a FIFO of framed packets awaiting write to the
//! child's stdin, guarded by a mutex/condvar pair.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct WriterQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

struct QueueState {
    packets: VecDeque<Vec<u8>>,
    stopped: bool,
}

impl WriterQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueue a packet and wake the writer thread.
    pub fn push(&self, packet: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.packets.push_back(packet);
        self.not_empty.notify_one();
    }

    /// Block until a packet is available or the queue is stopped.
    /// Returns `None` once stopped with nothing left to drain.
    pub fn pop_blocking(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(packet) = state.packets.pop_front() {
                return Some(packet);
            }
            if state.stopped {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Request cooperative shutdown: wakes the writer thread so it can
    /// observe `stopped` and exit once the queue drains.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.not_empty.notify_all();
    }
}

impl Default for WriterQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(WriterQueue::new());
        let reader = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_blocking())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.push(vec![1, 2, 3]);
        assert_eq!(reader.join().unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn stop_unblocks_waiting_pop() {
        let queue = Arc::new(WriterQueue::new());
        let reader = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_blocking())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.stop();
        assert_eq!(reader.join().unwrap(), None);
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = WriterQueue::new();
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);
        assert_eq!(queue.pop_blocking(), Some(vec![1]));
        assert_eq!(queue.pop_blocking(), Some(vec![2]));
        assert_eq!(queue.pop_blocking(), Some(vec![3]));
    }
}
