//! # Vamana Graph Method (DiskANN)
//!
//! Approximate nearest neighbor search over a navigable graph, generic over
//! the space: only distances are needed, never coordinates.
//!
//! ## Algorithm Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Vamana Graph Structure                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │     ┌───┐         ┌───┐         ┌───┐                       │
//! │     │ A │─────────│ B │─────────│ C │                       │
//! │     └─┬─┘         └─┬─┘         └─┬─┘                       │
//! │       │    ╲        │        ╱    │                         │
//! │     ┌─┴─┐      ╲  ┌─┴─┐  ╱      ┌─┴─┐                       │
//! │     │ D │────────│ E │────────│ F │  ← Entry Point          │
//! │     └───┘        └───┘        └───┘                         │
//! │                                                              │
//! │  • Each node has at most R neighbors (degree bound)          │
//! │  • Edges are "diverse" - not all pointing same direction     │
//! │  • Greedy search converges to nearest neighbor               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Build Process
//! 1. Initialize a random R-regular graph
//! 2. Pick an approximate medoid (smallest summed distance to a sample)
//! 3. For each node, greedy search for candidates, then RobustPrune over
//!    the candidates and the node's current neighbors
//! 4. Add reverse edges, re-pruning neighbors that overflow R
//!
//! ## Parameters
//! - index time: `maxDegree` (R), `buildBreadth` (L), `alpha`,
//!   `indexThreadQty` (0 = global rayon pool)
//! - query time: `efSearch`

use std::collections::{BinaryHeap, HashSet};
use std::cmp::Reverse;
use std::io::{Read, Write};
use std::marker::PhantomData;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use rand::seq::{index, SliceRandom};
use rayon::prelude::*;
use tracing::{debug, info};

use simbridge_core::error::{Error, Result};

use crate::dataset::length_prefix;
use crate::distance::{DistanceValue, Ordered};
use crate::method::{Method, SearchContext};
use crate::object::{Element, QueryRecord};
use crate::params::ParamReader;
use crate::queue::{KnnQueue, Neighbor};

const VAMANA_MAGIC: &[u8; 8] = b"SBVAMANA";
const VAMANA_VERSION: u32 = 1;

/// Engine default for `efSearch`
pub const DEFAULT_EF_SEARCH: usize = 100;

/// Sample size used when estimating the medoid
const MEDOID_SAMPLE: usize = 64;

/// Vamana build configuration
#[derive(Debug, Clone)]
pub struct VamanaConfig {
    /// Max out-degree per node (R)
    pub max_degree: usize,
    /// Search list size during build (L)
    pub build_search_size: usize,
    /// Alpha parameter for RobustPrune (typically 1.2)
    pub alpha: f32,
    /// Build threads, 0 for the global rayon pool
    pub threads: usize,
}

impl Default for VamanaConfig {
    fn default() -> Self {
        Self {
            max_degree: 32,
            build_search_size: 100,
            alpha: 1.2,
            threads: 0,
        }
    }
}

impl VamanaConfig {
    fn from_params(params: &[String]) -> Result<Self> {
        let defaults = Self::default();
        let mut reader = ParamReader::parse(params)?;
        let config = Self {
            max_degree: reader.get_or("maxDegree", defaults.max_degree)?,
            build_search_size: reader.get_or("buildBreadth", defaults.build_search_size)?,
            alpha: reader.get_or("alpha", defaults.alpha)?,
            threads: reader.get_or("indexThreadQty", defaults.threads)?,
        };
        reader.finish()?;

        if config.max_degree == 0 {
            return Err(Error::invalid_argument("maxDegree must be positive"));
        }
        if config.build_search_size == 0 {
            return Err(Error::invalid_argument("buildBreadth must be positive"));
        }
        if !(config.alpha >= 1.0) {
            return Err(Error::invalid_argument("alpha must be at least 1.0"));
        }
        Ok(config)
    }
}

/// A node in the graph; neighbors are record positions
struct Node {
    neighbors: RwLock<Vec<u32>>,
}

impl Node {
    fn new(neighbors: Vec<u32>) -> Self {
        Self { neighbors: RwLock::new(neighbors) }
    }
}

/// Vamana graph over a record vector
pub struct Vamana<E, D> {
    config: VamanaConfig,
    ef_search: usize,
    nodes: Vec<Node>,
    entry_point: u32,
    _marker: PhantomData<fn() -> (E, D)>,
}

impl<E, D> Vamana<E, D> {
    pub fn new() -> Self {
        Self {
            config: VamanaConfig::default(),
            ef_search: DEFAULT_EF_SEARCH,
            nodes: Vec::new(),
            entry_point: 0,
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &VamanaConfig {
        &self.config
    }

    pub fn ef_search(&self) -> usize {
        self.ef_search
    }
}

impl<E, D> Default for Vamana<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element, D: DistanceValue> Vamana<E, D> {
    /// Record with the smallest summed distance to a random sample
    fn find_medoid(ctx: SearchContext<'_, E, D>) -> u32 {
        let n = ctx.records.len();
        if n <= 1 {
            return 0;
        }

        let mut rng = rand::thread_rng();
        let sample = index::sample(&mut rng, n, MEDOID_SAMPLE.min(n)).into_vec();
        let candidates = index::sample(&mut rng, n, MEDOID_SAMPLE.min(n)).into_vec();

        candidates
            .par_iter()
            .map(|&c| {
                let total: f64 = sample
                    .iter()
                    .map(|&s| ctx.space.distance(ctx.records[c].data(), ctx.records[s].data()).to_f64())
                    .sum();
                (total, c as u32)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, c)| c)
            .unwrap_or(0)
    }

    /// Greedy search from the entry point, returning up to `search_size`
    /// positions sorted nearest-first. When the reachable part of the graph
    /// runs out before `search_size` results, the search restarts from the
    /// lowest unvisited position.
    fn greedy_search(&self, ctx: SearchContext<'_, E, D>, query: &[E], search_size: usize) -> Vec<(u32, D)> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }

        // Candidate set (min-heap by distance)
        let mut candidates: BinaryHeap<Reverse<(Ordered<D>, u32)>> = BinaryHeap::new();
        // Result set (max-heap to track worst in top-L)
        let mut results: BinaryHeap<(Ordered<D>, u32)> = BinaryHeap::new();
        let mut visited: HashSet<u32> = HashSet::new();
        let mut seeds = std::iter::once(self.entry_point).chain(0..n as u32);

        loop {
            let Some(seed) = seeds.find(|s| !visited.contains(s)) else {
                break;
            };
            let seed_dist = ctx.distance_to(query, seed as usize);
            candidates.push(Reverse((Ordered(seed_dist), seed)));
            results.push((Ordered(seed_dist), seed));
            if results.len() > search_size {
                results.pop();
            }
            visited.insert(seed);

            while let Some(Reverse((Ordered(dist), idx))) = candidates.pop() {
                if results.len() >= search_size {
                    if let Some(&(Ordered(worst), _)) = results.peek() {
                        if dist > worst {
                            break;
                        }
                    }
                }

                let neighbors = self.nodes[idx as usize].neighbors.read();
                for &neighbor in neighbors.iter() {
                    if visited.insert(neighbor) {
                        let neighbor_dist = ctx.distance_to(query, neighbor as usize);
                        candidates.push(Reverse((Ordered(neighbor_dist), neighbor)));
                        results.push((Ordered(neighbor_dist), neighbor));
                        if results.len() > search_size {
                            results.pop();
                        }
                    }
                }
            }

            if results.len() >= search_size {
                break;
            }
        }

        let mut sorted: Vec<(u32, D)> = results.into_iter().map(|(Ordered(d), i)| (i, d)).collect();
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        sorted
    }

    /// RobustPrune: keep close neighbors that are not "covered" by a closer
    /// one, then backfill with the nearest covered candidates up to the degree
    /// bound. Identical records cover each other; the backfill keeps them
    /// linked.
    fn robust_prune(&self, ctx: SearchContext<'_, E, D>, node: u32, candidates: &[(u32, D)]) -> Vec<u32> {
        let alpha = self.config.alpha as f64;
        let max_degree = self.config.max_degree;

        let mut remaining: Vec<(u32, D)> = candidates.iter().copied().filter(|(i, _)| *i != node).collect();
        remaining.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        remaining.dedup_by_key(|(i, _)| *i);

        let mut result: Vec<u32> = Vec::with_capacity(max_degree);
        let mut covered: Vec<(u32, D)> = Vec::new();
        let mut cursor = 0;
        while cursor < remaining.len() && result.len() < max_degree {
            let (best, _) = remaining[cursor];
            cursor += 1;
            result.push(best);

            let best_data = ctx.records[best as usize].data();
            let (kept, pruned): (Vec<(u32, D)>, Vec<(u32, D)>) =
                remaining[cursor..].iter().copied().partition(|&(idx, dist)| {
                    let dist_to_best = ctx.space.distance(best_data, ctx.records[idx as usize].data());
                    dist.to_f64() < alpha * dist_to_best.to_f64()
                });
            remaining.truncate(cursor);
            remaining.extend(kept);
            covered.extend(pruned);
        }

        if result.len() < max_degree {
            covered.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            let room = max_degree - result.len();
            result.extend(covered.into_iter().take(room).map(|(i, _)| i));
        }

        result
    }

    fn initial_graph(&mut self, n: usize) {
        let mut rng = rand::thread_rng();
        let degree = self.config.max_degree.min(n.saturating_sub(1));
        self.nodes = (0..n)
            .map(|i| {
                let mut neighbors: Vec<u32> = index::sample(&mut rng, n, (degree + 1).min(n))
                    .into_iter()
                    .filter(|&j| j != i)
                    .map(|j| j as u32)
                    .collect();
                neighbors.truncate(degree);
                Node::new(neighbors)
            })
            .collect();
    }

    fn vamana_build(&self, ctx: SearchContext<'_, E, D>, print_progress: bool) {
        let n = ctx.records.len();
        let search_size = self.config.build_search_size;
        let max_degree = self.config.max_degree;

        // Each batch: search + prune in parallel (read-heavy), then apply edges
        let batch_size = 256.min(n.max(1));
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rand::thread_rng());
        let report_every = (n / 10).max(batch_size);
        let mut next_report = report_every;

        for batch_start in (0..n).step_by(batch_size) {
            let batch = &order[batch_start..(batch_start + batch_size).min(n)];

            let updates: Vec<(usize, Vec<u32>)> = batch
                .par_iter()
                .map(|&i| {
                    let base = ctx.records[i].data();
                    let mut candidates = self.greedy_search(ctx, base, search_size);
                    // Current out-neighbors compete with the search results
                    for &j in self.nodes[i].neighbors.read().iter() {
                        candidates.push((j, ctx.space.distance(base, ctx.records[j as usize].data())));
                    }
                    (i, self.robust_prune(ctx, i as u32, &candidates))
                })
                .collect();

            for (i, new_neighbors) in updates {
                *self.nodes[i].neighbors.write() = new_neighbors.clone();

                // Reverse edges; re-prune when the neighbor is full
                for &neighbor in &new_neighbors {
                    let overflow = {
                        let mut list = self.nodes[neighbor as usize].neighbors.write();
                        if list.contains(&(i as u32)) {
                            None
                        } else if list.len() < max_degree {
                            list.push(i as u32);
                            None
                        } else {
                            let mut extended = list.clone();
                            extended.push(i as u32);
                            Some(extended)
                        }
                    };
                    if let Some(extended) = overflow {
                        let base = ctx.records[neighbor as usize].data();
                        let candidates: Vec<(u32, D)> = extended
                            .into_iter()
                            .map(|j| (j, ctx.space.distance(base, ctx.records[j as usize].data())))
                            .collect();
                        let pruned = self.robust_prune(ctx, neighbor, &candidates);
                        *self.nodes[neighbor as usize].neighbors.write() = pruned;
                    }
                }
            }

            let done = (batch_start + batch_size).min(n);
            if print_progress && (done >= next_report || done == n) {
                info!("vamana build progress: {}/{} records ({:.0}%)", done, n, done as f64 * 100.0 / n as f64);
                next_report += report_every;
            }
        }
    }

    fn collect_candidates(
        &self,
        ctx: SearchContext<'_, E, D>,
        query: &QueryRecord<'_, E>,
        search_size: usize,
    ) -> Result<Vec<(u32, D)>> {
        if self.nodes.len() != ctx.records.len() {
            return Err(Error::query_execution_failed(format!(
                "graph has {} nodes but index holds {} records",
                self.nodes.len(),
                ctx.records.len()
            )));
        }
        Ok(self.greedy_search(ctx, query.data(), search_size))
    }
}

impl<E: Element, D: DistanceValue> Method<E, D> for Vamana<E, D> {
    fn name(&self) -> &'static str {
        "vamana"
    }

    fn build(&mut self, ctx: SearchContext<'_, E, D>, params: &[String], print_progress: bool) -> Result<()> {
        self.config = VamanaConfig::from_params(params).map_err(|e| Error::index_build_failed(e.to_string()))?;

        let n = ctx.records.len();
        if n > u32::MAX as usize {
            return Err(Error::index_build_failed(format!("{} records exceed the graph's u32 addressing", n)));
        }

        self.initial_graph(n);
        self.entry_point = Self::find_medoid(ctx);
        debug!(records = n, entry_point = self.entry_point, "vamana graph initialized");

        if self.config.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.threads)
                .build()
                .map_err(|e| Error::index_build_failed(format!("cannot start build threads: {}", e)))?;
            pool.install(|| self.vamana_build(ctx, print_progress));
        } else {
            self.vamana_build(ctx, print_progress);
        }

        Ok(())
    }

    fn set_query_time_params(&mut self, params: &[String]) -> Result<()> {
        let mut reader = ParamReader::parse(params)?;
        let ef_search = reader.get_or("efSearch", self.ef_search)?;
        reader.finish()?;
        if ef_search == 0 {
            return Err(Error::invalid_argument("efSearch must be positive"));
        }
        self.ef_search = ef_search;
        Ok(())
    }

    fn reset_query_time_params(&mut self) {
        self.ef_search = DEFAULT_EF_SEARCH;
    }

    fn search_knn(
        &self,
        ctx: SearchContext<'_, E, D>,
        query: &QueryRecord<'_, E>,
        queue: &mut KnnQueue<D>,
    ) -> Result<()> {
        let search_size = self.ef_search.max(queue.limit().min(ctx.records.len()));
        for (position, distance) in self.collect_candidates(ctx, query, search_size)? {
            let position = position as usize;
            queue.push(Neighbor { position, id: ctx.records[position].id(), distance });
        }
        Ok(())
    }

    fn search_range(
        &self,
        ctx: SearchContext<'_, E, D>,
        query: &QueryRecord<'_, E>,
        radius: D,
        queue: &mut KnnQueue<D>,
    ) -> Result<()> {
        for (position, distance) in self.collect_candidates(ctx, query, self.ef_search)? {
            if distance <= radius {
                let position = position as usize;
                queue.push(Neighbor { position, id: ctx.records[position].id(), distance });
            }
        }
        Ok(())
    }

    fn save(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(VAMANA_MAGIC)?;
        w.write_u32::<LittleEndian>(VAMANA_VERSION)?;
        w.write_u32::<LittleEndian>(length_prefix(self.config.max_degree, "maxDegree")?)?;
        w.write_u32::<LittleEndian>(length_prefix(self.config.build_search_size, "buildBreadth")?)?;
        w.write_f32::<LittleEndian>(self.config.alpha)?;

        w.write_u64::<LittleEndian>(self.nodes.len() as u64)?;
        w.write_u32::<LittleEndian>(self.entry_point)?;

        for node in &self.nodes {
            let neighbors = node.neighbors.read();
            w.write_u32::<LittleEndian>(length_prefix(neighbors.len(), "neighbor list")?)?;
            for &neighbor in neighbors.iter() {
                w.write_u32::<LittleEndian>(neighbor)?;
            }
        }
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read, ctx: SearchContext<'_, E, D>) -> Result<()> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != VAMANA_MAGIC {
            return Err(Error::data_io("invalid vamana topology magic"));
        }

        let version = r.read_u32::<LittleEndian>()?;
        if version != VAMANA_VERSION {
            return Err(Error::data_io(format!("unsupported vamana version: {}", version)));
        }

        let max_degree = r.read_u32::<LittleEndian>()? as usize;
        let build_search_size = r.read_u32::<LittleEndian>()? as usize;
        let alpha = r.read_f32::<LittleEndian>()?;

        let n = r.read_u64::<LittleEndian>()? as usize;
        if n != ctx.records.len() {
            return Err(Error::data_io(format!(
                "topology was built over {} records but {} are loaded",
                n,
                ctx.records.len()
            )));
        }
        let entry_point = r.read_u32::<LittleEndian>()?;
        if n > 0 && entry_point as usize >= n {
            return Err(Error::data_io(format!("entry point {} out of range", entry_point)));
        }

        let mut nodes = Vec::with_capacity(n);
        for _ in 0..n {
            let count = r.read_u32::<LittleEndian>()? as usize;
            if count > max_degree {
                return Err(Error::data_io(format!("node degree {} exceeds bound {}", count, max_degree)));
            }
            let mut neighbors = Vec::with_capacity(count);
            for _ in 0..count {
                let neighbor = r.read_u32::<LittleEndian>()?;
                if neighbor as usize >= n {
                    return Err(Error::data_io(format!("neighbor {} out of range", neighbor)));
                }
                neighbors.push(neighbor);
            }
            nodes.push(Node::new(neighbors));
        }

        self.config = VamanaConfig { max_degree, build_search_size, alpha, threads: 0 };
        self.nodes = nodes;
        self.entry_point = entry_point;
        Ok(())
    }

    fn memory_usage(&self) -> usize {
        let edges: usize = self.nodes.iter().map(|n| n.neighbors.read().capacity()).sum();
        std::mem::size_of::<Self>()
            + self.nodes.capacity() * std::mem::size_of::<Node>()
            + edges * std::mem::size_of::<u32>()
    }
}
