//! Order queue - orders that arrived but have not started yet

use std::collections::VecDeque;

use crate::types::{MachineOrder, OrderId};

/// Unbounded FIFO of waiting orders.
///
/// Not synchronised on its own: the controller keeps it next to the
/// admission gate behind one lock so that "gate open and queue non-empty"
/// is checked and acted on in a single critical section.
#[derive(Debug, Default)]
pub struct OrderQueue {
    orders: VecDeque<MachineOrder>,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Never blocks, never fails.
    pub fn enqueue(&mut self, order: MachineOrder) {
        self.orders.push_back(order);
    }

    /// Put an order back at the head, ahead of everything waiting.
    pub fn requeue_front(&mut self, order: MachineOrder) {
        self.orders.push_front(order);
    }

    /// Remove the head, or `None` when empty.
    pub fn try_dequeue(&mut self) -> Option<MachineOrder> {
        self.orders.pop_front()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Drop every waiting order with `id`. Returns how many were removed.
    pub fn remove(&mut self, id: &OrderId) -> usize {
        let before = self.orders.len();
        self.orders.retain(|o| &o.id != id);
        before - self.orders.len()
    }

    /// Take every waiting order, oldest first.
    pub fn drain(&mut self) -> Vec<MachineOrder> {
        self.orders.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = OrderQueue::new();
        assert!(queue.try_dequeue().is_none());

        queue.enqueue(MachineOrder::new("A"));
        queue.enqueue(MachineOrder::new("B"));
        queue.enqueue(MachineOrder::new("C"));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "A");
        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "B");
        queue.enqueue(MachineOrder::new("D"));
        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "C");
        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "D");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_by_id_keeps_order_of_the_rest() {
        let mut queue = OrderQueue::new();
        for id in ["A", "B", "A", "C"] {
            queue.enqueue(MachineOrder::new(id));
        }
        assert_eq!(queue.remove(&OrderId::from("A")), 2);
        assert_eq!(queue.remove(&OrderId::from("Z")), 0);
        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "B");
        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "C");
    }

    #[test]
    fn test_requeue_front_goes_first() {
        let mut queue = OrderQueue::new();
        queue.enqueue(MachineOrder::new("B"));
        queue.requeue_front(MachineOrder::new("A"));
        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "A");
        assert_eq!(queue.try_dequeue().unwrap().id.as_str(), "B");
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = OrderQueue::new();
        queue.enqueue(MachineOrder::new("A"));
        queue.enqueue(MachineOrder::new("B"));
        let drained: Vec<_> = queue.drain().into_iter().map(|o| o.id).collect();
        assert_eq!(drained, vec![OrderId::from("A"), OrderId::from("B")]);
        assert!(queue.is_empty());
    }
}
