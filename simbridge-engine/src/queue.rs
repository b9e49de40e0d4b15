//! Result queues filled by method searches.
//!
//! A [`KnnQueue`] is a bounded max-heap on distance: the worst kept result
//! sits on top, so `pop` drains results worst-first. Callers reverse the
//! drained sequence to get nearest-first order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::distance::DistanceValue;

/// A search hit: record position in the index, its id and distance
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<D> {
    pub position: usize,
    pub id: i32,
    pub distance: D,
}

impl<D: DistanceValue> PartialEq for Neighbor<D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<D: DistanceValue> Eq for Neighbor<D> {}

impl<D: DistanceValue> PartialOrd for Neighbor<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: DistanceValue> Ord for Neighbor<D> {
    // Larger distance = larger in ordering, so the heap top is the worst hit.
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.position.cmp(&other.position))
    }
}

/// Bounded result queue; `limit == usize::MAX` for range searches
#[derive(Debug, Clone)]
pub struct KnnQueue<D: DistanceValue> {
    limit: usize,
    heap: BinaryHeap<Neighbor<D>>,
}

impl<D: DistanceValue> KnnQueue<D> {
    /// Queue keeping the `k` closest hits
    pub fn new(k: usize) -> Self {
        Self {
            limit: k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    /// Queue keeping every pushed hit
    pub fn unbounded() -> Self {
        Self { limit: usize::MAX, heap: BinaryHeap::new() }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Distance of the worst kept hit
    pub fn top_distance(&self) -> Option<D> {
        self.heap.peek().map(|n| n.distance)
    }

    /// Whether a hit at `distance` would be kept
    pub fn accepts(&self, distance: D) -> bool {
        if self.limit == 0 {
            return false;
        }
        self.heap.len() < self.limit
            || self
                .top_distance()
                .map_or(true, |worst| distance.total_cmp(&worst) == Ordering::Less)
    }

    pub fn push(&mut self, neighbor: Neighbor<D>) {
        if self.limit == 0 {
            return;
        }
        self.heap.push(neighbor);
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    /// Remove and return the worst kept hit
    pub fn pop(&mut self) -> Option<Neighbor<D>> {
        self.heap.pop()
    }
}
