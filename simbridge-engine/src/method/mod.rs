//! # Methods
//!
//! A method is the search structure built over a space's record vector.
//! Methods never own records: every call receives a [`SearchContext`] with
//! the space and the records the structure was built over.

use std::io::{Read, Write};

use simbridge_core::error::Result;

use crate::distance::DistanceValue;
use crate::object::{Element, QueryRecord, Record};
use crate::queue::KnnQueue;
use crate::space::Space;

pub mod brute_force;
pub mod vamana;

pub use brute_force::BruteForce;
pub use vamana::{Vamana, VamanaConfig};

/// Space and records a method operates on
pub struct SearchContext<'a, E: Element, D: DistanceValue> {
    pub space: &'a dyn Space<E, D>,
    pub records: &'a [Record<E>],
}

impl<E: Element, D: DistanceValue> Clone for SearchContext<'_, E, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: Element, D: DistanceValue> Copy for SearchContext<'_, E, D> {}

impl<'a, E: Element, D: DistanceValue> SearchContext<'a, E, D> {
    pub fn new(space: &'a dyn Space<E, D>, records: &'a [Record<E>]) -> Self {
        Self { space, records }
    }

    /// Distance from `query` to the record at `position`
    #[inline]
    pub fn distance_to(&self, query: &[E], position: usize) -> D {
        self.space.distance(query, self.records[position].data())
    }
}

/// Search structure interface
pub trait Method<E: Element, D: DistanceValue>: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Build over `ctx.records` with index-time parameters
    fn build(&mut self, ctx: SearchContext<'_, E, D>, params: &[String], print_progress: bool) -> Result<()>;

    /// Apply query-time parameters
    fn set_query_time_params(&mut self, params: &[String]) -> Result<()>;

    /// Restore the method's own query-time defaults
    fn reset_query_time_params(&mut self);

    /// Push the closest records to `query` into `queue`
    fn search_knn(
        &self,
        ctx: SearchContext<'_, E, D>,
        query: &QueryRecord<'_, E>,
        queue: &mut KnnQueue<D>,
    ) -> Result<()>;

    /// Push every record within `radius` of `query` into `queue`
    fn search_range(
        &self,
        ctx: SearchContext<'_, E, D>,
        query: &QueryRecord<'_, E>,
        radius: D,
        queue: &mut KnnQueue<D>,
    ) -> Result<()>;

    /// Write the structure (never the records)
    fn save(&self, w: &mut dyn Write) -> Result<()>;

    /// Read a structure written by `save` for the records in `ctx`
    fn load(&mut self, r: &mut dyn Read, ctx: SearchContext<'_, E, D>) -> Result<()>;

    /// Approximate bytes held by the structure
    fn memory_usage(&self) -> usize;
}
