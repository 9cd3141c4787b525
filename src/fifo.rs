//! Arrival-ordered FIFO of task ids
//!
//! Backs both the per-priority ready queues and every waiter list. Capacity
//! is [`MAX_TASKS`] so a FIFO can always hold every task in the system.

use heapless::Deque;

use crate::config::MAX_TASKS;
use crate::task::TaskId;

#[derive(Debug, Clone)]
pub struct TaskFifo {
    ids: Deque<TaskId, MAX_TASKS>,
}

impl TaskFifo {
    pub const fn new() -> Self {
        Self { ids: Deque::new() }
    }

    /// Append at the tail; false if the FIFO is full
    pub fn push(&mut self, id: TaskId) -> bool {
        self.ids.push_back(id).is_ok()
    }

    /// Insert at the head; false if the FIFO is full
    pub fn push_front(&mut self, id: TaskId) -> bool {
        self.ids.push_front(id).is_ok()
    }

    /// Remove the head (first arrival)
    pub fn pop(&mut self) -> Option<TaskId> {
        self.ids.pop_front()
    }

    pub fn front(&self) -> Option<TaskId> {
        self.ids.front().copied()
    }

    /// Unlink `id` wherever it sits, keeping everyone else's order
    pub fn remove(&mut self, id: TaskId) -> bool {
        let mut found = false;
        for _ in 0..self.ids.len() {
            let Some(head) = self.ids.pop_front() else { break };
            if head == id && !found {
                found = true;
            } else {
                // Cannot fail: one slot was just freed
                let _ = self.ids.push_back(head);
            }
        }
        found
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.ids.iter().any(|&t| t == id)
    }

    /// Occurrences of `id` (1 in a healthy structure)
    pub fn occurrences(&self, id: TaskId) -> usize {
        self.ids.iter().filter(|&&t| t == id).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for TaskFifo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(fifo: &TaskFifo) -> heapless::Vec<u8, MAX_TASKS> {
        fifo.iter().map(|t| t.0).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut fifo = TaskFifo::new();
        for i in 0..4 {
            assert!(fifo.push(TaskId(i)));
        }
        for i in 0..4 {
            assert_eq!(fifo.pop(), Some(TaskId(i)));
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut fifo = TaskFifo::new();
        for i in 0..5 {
            fifo.push(TaskId(i));
        }
        assert!(fifo.remove(TaskId(2)));
        assert!(!fifo.remove(TaskId(2)));
        assert_eq!(ids(&fifo).as_slice(), &[0, 1, 3, 4]);
    }

    #[test]
    fn test_capacity() {
        let mut fifo = TaskFifo::new();
        for i in 0..MAX_TASKS as u8 {
            assert!(fifo.push(TaskId(i)));
        }
        assert!(!fifo.push(TaskId(99)));
        assert!(fifo.remove(TaskId(0)));
        assert!(fifo.push_front(TaskId(99)));
        assert_eq!(fifo.front(), Some(TaskId(99)));
    }
}
