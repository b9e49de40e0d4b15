//! # Query Result Extraction
//!
//! Searches run against a borrowed query record and fill a caller buffer of
//! parallel id/distance arrays, nearest first.
//!
//! Fill protocol:
//! 1. the index must be built;
//! 2. zero hits succeed with `size == 0`;
//! 3. more hits than the buffer holds fail with `BufferTooSmall`, `size == 0`;
//! 4. otherwise the engine queue is drained worst-first and reversed.

use rayon::prelude::*;
use tracing::debug;

use simbridge_core::error::{Error, Result, ResultExt};
use simbridge_core::QueryHit;
use simbridge_engine::{DistanceValue, Element, KnnQueue};

use crate::construct::{borrowed_query, DataInput};
use crate::handle::{with_input, IndexHandle, TypedIndex};

/// Caller-owned result arrays
#[derive(Debug)]
pub struct ResultBuffer<'a> {
    ids: &'a mut [i32],
    distances: &'a mut [f32],
    size: usize,
}

impl<'a> ResultBuffer<'a> {
    /// Both arrays must have the same length, which becomes the capacity
    pub fn new(ids: &'a mut [i32], distances: &'a mut [f32]) -> Result<Self> {
        if ids.len() != distances.len() {
            return Err(Error::invalid_argument(format!(
                "result arrays differ in length: {} ids, {} distances",
                ids.len(),
                distances.len()
            )));
        }
        Ok(Self { ids, distances, size: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    /// Number of valid entries from the last fill
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn ids(&self) -> &[i32] {
        &self.ids[..self.size]
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances[..self.size]
    }

    /// Write `hits` in order, or nothing at all
    fn fill(&mut self, hits: &[QueryHit]) -> Result<()> {
        self.size = 0;
        if hits.len() > self.capacity() {
            return Err(Error::buffer_too_small(hits.len(), self.capacity()));
        }
        for (i, hit) in hits.iter().enumerate() {
            self.ids[i] = hit.id;
            self.distances[i] = hit.distance;
        }
        self.size = hits.len();
        Ok(())
    }
}

/// Pop worst-first, then reverse into nearest-first order
fn drain_nearest_first<D: DistanceValue>(mut queue: KnnQueue<D>) -> Vec<QueryHit> {
    let mut hits = Vec::with_capacity(queue.len());
    while let Some(neighbor) = queue.pop() {
        hits.push(QueryHit {
            id: neighbor.id,
            distance: neighbor.distance.to_f32(),
        });
    }
    hits.reverse();
    hits
}

impl<E: Element, D: DistanceValue> TypedIndex<E, D> {
    fn knn(&self, query: &[E], k: usize) -> Result<Vec<QueryHit>> {
        let method = self.method()?;
        let query = borrowed_query(query, self.width())?;
        let mut queue = KnnQueue::new(k);
        method.search_knn(self.ctx(), &query, &mut queue)?;
        Ok(drain_nearest_first(queue))
    }

    fn range(&self, query: &[E], radius: f32) -> Result<Vec<QueryHit>> {
        let method = self.method()?;
        let query = borrowed_query(query, self.width())?;
        let mut queue = KnnQueue::unbounded();
        method.search_range(self.ctx(), &query, D::from_radius(radius), &mut queue)?;
        Ok(drain_nearest_first(queue))
    }
}

impl IndexHandle {
    /// The `k` nearest records to `query`, nearest first
    pub fn knn_query(&self, query: DataInput<'_>, k: usize) -> Result<Vec<QueryHit>> {
        if k == 0 {
            return Err(Error::invalid_argument("k must be positive"));
        }
        with_input!(&self.body, query, |ix, data| ix.knn(data, k))
    }

    /// Every record within `radius` of `query`, nearest first
    pub fn range_query(&self, query: DataInput<'_>, radius: f32) -> Result<Vec<QueryHit>> {
        if radius.is_nan() {
            return Err(Error::invalid_argument("radius is NaN"));
        }
        with_input!(&self.body, query, |ix, data| ix.range(data, radius))
    }

    /// Result count of a k-NN query; a sizing hint for [`Self::knn_query_fill`]
    pub fn knn_query_get_size(&self, query: DataInput<'_>, k: usize) -> Result<usize> {
        self.knn_query(query, k).map(|hits| hits.len())
    }

    /// Run a k-NN query into `result`
    pub fn knn_query_fill(&self, query: DataInput<'_>, k: usize, result: &mut ResultBuffer<'_>) -> Result<()> {
        result.size = 0;
        let hits = self.knn_query(query, k)?;
        result.fill(&hits)
    }

    /// Result count of a range query; a sizing hint for [`Self::range_query_fill`]
    pub fn range_query_get_size(&self, query: DataInput<'_>, radius: f32) -> Result<usize> {
        self.range_query(query, radius).map(|hits| hits.len())
    }

    /// Run a range query into `result`
    pub fn range_query_fill(&self, query: DataInput<'_>, radius: f32, result: &mut ResultBuffer<'_>) -> Result<()> {
        result.size = 0;
        let hits = self.range_query(query, radius)?;
        result.fill(&hits)
    }

    /// Run one k-NN fill per query on the handle's worker pool.
    ///
    /// Every query runs even if another fails; the first failure by query
    /// order is returned. Each query only writes its own buffer.
    pub fn knn_query_batch(
        &self,
        queries: &[DataInput<'_>],
        k: usize,
        results: &mut [ResultBuffer<'_>],
    ) -> Result<()> {
        if queries.len() != results.len() {
            return Err(Error::invalid_argument(format!(
                "{} queries for {} result buffers",
                queries.len(),
                results.len()
            )));
        }

        let pool = self.query_pool()?;
        let outcomes: Vec<Result<()>> = pool.install(|| {
            queries
                .par_iter()
                .zip(results.par_iter_mut())
                .enumerate()
                .map(|(i, (query, result))| {
                    self.knn_query_fill(*query, k, result)
                        .with_context(|| format!("query {}", i))
                })
                .collect()
        });

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        debug!(queries = queries.len(), failed, threads = pool.current_num_threads(), "Batch query finished");
        outcomes.into_iter().collect()
    }
}
