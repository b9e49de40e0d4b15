//! # Index Handle
//!
//! One handle per index. The handle's body is a sum type with one variant per
//! record encoding, each owning a correctly typed space, method and record
//! vector; every operation dispatches on the variant and nothing else.
//!
//! ```text
//!            add_data_point*              build
//!   create ─────────────────► Created ───────────► Built ──► queries*
//!                                ▲                   │
//!                                └────── reset ──────┘
//! ```
//!
//! Mutation (insert, build, reset) takes `&mut self`; queries take `&self`,
//! so a built handle can be shared across threads behind an `Arc`.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use simbridge_core::error::{Error, Result, ResultExt};
use simbridge_core::{
    Allocator, BridgeConfig, DataEncoding, DistanceKind, HostBuffer, IndexHeader, ParameterSet,
    SparseElement,
};
use simbridge_engine::registry::{self, METHOD_NAMES};
use simbridge_engine::{DistanceValue, Element, Method, Record, SearchContext, Space};

use crate::construct::{encoding_mismatch, owned_record, rows, DataInput, DataOutput};

/// Lifecycle state of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Accepting records, not searchable
    Created,
    /// Method built, searchable, no more records
    Built,
}

/// Space, method and records for one element/distance pairing
pub(crate) struct TypedIndex<E: Element, D: DistanceValue> {
    pub(crate) space: Box<dyn Space<E, D>>,
    pub(crate) method: Option<Box<dyn Method<E, D>>>,
    pub(crate) records: Vec<Record<E>>,
    width: Option<usize>,
    fixed_width: bool,
}

impl<E: Element, D: DistanceValue> TypedIndex<E, D> {
    fn new(space: Box<dyn Space<E, D>>, fixed_width: bool) -> Self {
        Self {
            space,
            method: None,
            records: Vec::new(),
            width: None,
            fixed_width,
        }
    }

    pub(crate) fn ctx(&self) -> SearchContext<'_, E, D> {
        SearchContext::new(self.space.as_ref(), &self.records)
    }

    /// Element count every record and query must have, if fixed
    pub(crate) fn width(&self) -> Option<usize> {
        if self.fixed_width {
            self.width
        } else {
            None
        }
    }

    pub(crate) fn method(&self) -> Result<&dyn Method<E, D>> {
        self.method.as_deref().ok_or_else(|| Error::index_not_built())
    }

    fn push(&mut self, id: i32, data: &[E]) -> Result<()> {
        if self.method.is_some() {
            return Err(Error::index_already_built());
        }
        let record = owned_record(id, data, self.width())?;
        if self.fixed_width && self.width.is_none() {
            self.width = Some(record.len());
        }
        self.records.push(record);
        Ok(())
    }

    /// Restore loaded records, taking the width from the first one
    pub(crate) fn replace_records(&mut self, records: Vec<Record<E>>) -> Result<()> {
        if self.fixed_width {
            if let Some(first) = records.first() {
                let width = first.len();
                if let Some(bad) = records.iter().position(|r| r.len() != width) {
                    return Err(Error::data_io(format!(
                        "record {} has {} elements, record 0 has {}",
                        bad,
                        records[bad].len(),
                        width
                    )));
                }
            }
            self.width = records.first().map(Record::len);
        }
        self.records = records;
        Ok(())
    }

    /// Build a method and apply `query_defaults`; the index keeps no method
    /// unless both succeed
    fn build(
        &mut self,
        method_name: &str,
        params: &[String],
        query_defaults: &[String],
        print_progress: bool,
    ) -> Result<()> {
        if self.method.is_some() {
            return Err(Error::index_already_built());
        }
        let mut method = registry::create_method::<E, D>(method_name)?;
        method.build(self.ctx(), params, print_progress)?;
        method.reset_query_time_params();
        method.set_query_time_params(query_defaults)?;
        self.method = Some(method);
        Ok(())
    }

    /// Engine defaults first, then `params` on top
    pub(crate) fn restore_query_params(&mut self, params: &[String]) -> Result<()> {
        let method = self.method.as_mut().ok_or_else(|| Error::index_not_built())?;
        method.reset_query_time_params();
        method.set_query_time_params(params)
    }

    fn set_query_params(&mut self, params: &[String]) -> Result<()> {
        let method = self.method.as_mut().ok_or_else(|| Error::index_not_built())?;
        method.set_query_time_params(params)
    }

    pub(crate) fn record(&self, position: usize) -> Result<&Record<E>> {
        self.records.get(position).ok_or_else(|| {
            Error::invalid_argument(format!(
                "position {} out of range for {} records",
                position,
                self.records.len()
            ))
        })
    }

    fn distance(&self, pos1: usize, pos2: usize) -> Result<f32> {
        let a = self.record(pos1)?;
        let b = self.record(pos2)?;
        Ok(self.space.distance(a.data(), b.data()).to_f32())
    }

    fn memory_usage(&self) -> usize {
        match &self.method {
            None => 0,
            Some(method) => {
                let records: usize = self.records.iter().map(Record::memory_usage).sum();
                records + method.memory_usage()
            }
        }
    }

    fn clear(&mut self) {
        self.method = None;
        self.records.clear();
        self.width = None;
    }
}

/// Typed body of a handle, one variant per record encoding
pub(crate) enum IndexBody {
    DenseFloat(TypedIndex<f32, f32>),
    SparseFloat(TypedIndex<SparseElement, f32>),
    DenseByte(TypedIndex<u8, i32>),
    Text(TypedIndex<u8, i32>),
}

/// Run `$e` against whichever typed index the body holds
macro_rules! dispatch {
    ($body:expr, $ix:ident => $e:expr) => {
        match $body {
            $crate::handle::IndexBody::DenseFloat($ix) => $e,
            $crate::handle::IndexBody::SparseFloat($ix) => $e,
            $crate::handle::IndexBody::DenseByte($ix) => $e,
            $crate::handle::IndexBody::Text($ix) => $e,
        }
    };
}

/// Pair the body with caller data of the same encoding; sparse data is
/// validated before `$e` runs
macro_rules! with_input {
    ($body:expr, $input:expr, |$ix:ident, $data:ident| $e:expr) => {
        match ($body, $input) {
            ($crate::handle::IndexBody::DenseFloat($ix), $crate::construct::DataInput::Dense($data)) => $e,
            ($crate::handle::IndexBody::SparseFloat($ix), $crate::construct::DataInput::Sparse($data)) => {
                match $crate::construct::validate_sparse($data) {
                    Ok(()) => $e,
                    Err(err) => Err(err),
                }
            }
            ($crate::handle::IndexBody::DenseByte($ix), $crate::construct::DataInput::Bytes($data)) => $e,
            ($crate::handle::IndexBody::Text($ix), $crate::construct::DataInput::Text($data)) => $e,
            (body, input) => Err($crate::construct::encoding_mismatch(body.encoding(), input.encoding())),
        }
    };
}

pub(crate) use {dispatch, with_input};

impl IndexBody {
    fn create(encoding: DataEncoding, space_name: &str, params: &[String]) -> Result<Self> {
        Ok(match encoding {
            DataEncoding::DenseFloatVector => {
                IndexBody::DenseFloat(TypedIndex::new(registry::create_dense_float_space(space_name, params)?, true))
            }
            DataEncoding::SparseFloatVector => {
                IndexBody::SparseFloat(TypedIndex::new(registry::create_sparse_float_space(space_name, params)?, false))
            }
            DataEncoding::DenseByteVector => {
                IndexBody::DenseByte(TypedIndex::new(registry::create_byte_space(space_name, params)?, true))
            }
            DataEncoding::LengthPrefixedString => {
                IndexBody::Text(TypedIndex::new(registry::create_string_space(space_name, params)?, false))
            }
        })
    }

    pub(crate) fn encoding(&self) -> DataEncoding {
        match self {
            IndexBody::DenseFloat(_) => DataEncoding::DenseFloatVector,
            IndexBody::SparseFloat(_) => DataEncoding::SparseFloatVector,
            IndexBody::DenseByte(_) => DataEncoding::DenseByteVector,
            IndexBody::Text(_) => DataEncoding::LengthPrefixedString,
        }
    }
}

fn copy_out<E: Copy>(data: &[E], buffer: &mut [E]) -> Result<usize> {
    if buffer.len() < data.len() {
        return Err(Error::buffer_too_small(data.len(), buffer.len()));
    }
    buffer[..data.len()].copy_from_slice(data);
    Ok(data.len())
}

/// A similarity-search index behind the boundary
pub struct IndexHandle {
    header: IndexHeader,
    pub(crate) body: IndexBody,
    space_name: String,
    space_params: Vec<String>,
    method_name: String,
    allocator: Allocator,
    pub(crate) config: BridgeConfig,
    thread_pool_size: usize,
    pool: Mutex<Option<(usize, Arc<ThreadPool>)>>,
}

impl IndexHandle {
    /// Create an empty index with default configuration
    pub fn create(
        encoding: DataEncoding,
        distance_kind: DistanceKind,
        space_name: &str,
        space_params: &ParameterSet,
        method_name: &str,
        allocator: Allocator,
    ) -> Result<Self> {
        Self::create_with_config(
            encoding,
            distance_kind,
            space_name,
            space_params,
            method_name,
            allocator,
            BridgeConfig::default(),
        )
    }

    /// Create an empty index.
    ///
    /// The space must accept `encoding`. A `distance_kind` other than the
    /// space's canonical one is replaced by the canonical kind.
    pub fn create_with_config(
        encoding: DataEncoding,
        distance_kind: DistanceKind,
        space_name: &str,
        space_params: &ParameterSet,
        method_name: &str,
        allocator: Allocator,
        config: BridgeConfig,
    ) -> Result<Self> {
        let handle = Self::assemble(
            encoding,
            distance_kind,
            space_name,
            space_params.entries().to_vec(),
            method_name,
            allocator,
            config,
        )?;
        info!(
            space = %handle.space_name,
            method = %handle.method_name,
            encoding = %handle.header.encoding,
            distance = %handle.header.distance_kind,
            "Index created"
        );
        Ok(handle)
    }

    pub(crate) fn assemble(
        encoding: DataEncoding,
        distance_kind: DistanceKind,
        space_name: &str,
        space_params: Vec<String>,
        method_name: &str,
        allocator: Allocator,
        config: BridgeConfig,
    ) -> Result<Self> {
        let entry = registry::spaces().resolve(space_name)?;
        debug!(space = entry.name, encoding = %entry.encoding, distance = %entry.distance_kind, "Space resolved");

        if entry.encoding != encoding {
            return Err(Error::space_incompatible(format!(
                "space '{}' stores {} records, not {}",
                space_name, entry.encoding, encoding
            )));
        }
        if entry.distance_kind != distance_kind {
            warn!(
                space = space_name,
                requested = %distance_kind,
                using = %entry.distance_kind,
                "Distance kind overridden by the space's canonical kind"
            );
        }
        if !METHOD_NAMES.contains(&method_name) {
            return Err(Error::invalid_argument(format!(
                "unknown method '{}', expected one of: {}",
                method_name,
                METHOD_NAMES.join(", ")
            )));
        }

        let body = IndexBody::create(encoding, space_name, &space_params)?;
        let thread_pool_size = config.threads.default_size.clamp(1, config.threads.max_size.max(1));

        Ok(Self {
            header: IndexHeader::new(encoding, entry.distance_kind),
            body,
            space_name: space_name.to_string(),
            space_params,
            method_name: method_name.to_string(),
            allocator,
            config,
            thread_pool_size,
            pool: Mutex::new(None),
        })
    }

    pub fn header(&self) -> IndexHeader {
        self.header
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn space_type(&self) -> &str {
        &self.space_name
    }

    pub fn space_params(&self) -> &[String] {
        &self.space_params
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn state(&self) -> IndexState {
        if dispatch!(&self.body, ix => ix.method.is_some()) {
            IndexState::Built
        } else {
            IndexState::Created
        }
    }

    /// Number of stored records
    pub fn data_qty(&self) -> usize {
        dispatch!(&self.body, ix => ix.records.len())
    }

    /// Append one record
    pub fn add_data_point(&mut self, input: DataInput<'_>, id: i32) -> Result<()> {
        with_input!(&mut self.body, input, |ix, data| ix.push(id, data))
    }

    /// Append records in order; the default id is the record's position.
    ///
    /// Stops at the first failure. Records appended before it stay.
    pub fn add_data_point_batch(&mut self, inputs: &[DataInput<'_>], ids: Option<&[i32]>) -> Result<()> {
        if let Some(ids) = ids {
            if ids.len() != inputs.len() {
                return Err(Error::invalid_argument(format!(
                    "{} ids for {} records",
                    ids.len(),
                    inputs.len()
                )));
            }
        }
        if self.state() == IndexState::Built {
            return Err(Error::index_already_built());
        }

        for (i, input) in inputs.iter().enumerate() {
            let id = match ids {
                Some(ids) => ids[i],
                None => i32::try_from(self.data_qty())
                    .map_err(|_| Error::invalid_argument("record position exceeds the i32 id range"))?,
            };
            self.add_data_point(*input, id)
                .with_context(|| format!("record {} of batch", i))?;
        }

        debug!(count = inputs.len(), total = self.data_qty(), "Batch appended");
        Ok(())
    }

    /// Append `flat.len() / dim` dense float rows
    pub fn add_dense_batch(&mut self, flat: &[f32], dim: usize, ids: Option<&[i32]>) -> Result<()> {
        let inputs: Vec<DataInput<'_>> = rows(flat, dim)?.map(DataInput::Dense).collect();
        self.add_data_point_batch(&inputs, ids)
    }

    /// Append `flat.len() / dim` byte rows
    pub fn add_byte_batch(&mut self, flat: &[u8], dim: usize, ids: Option<&[i32]>) -> Result<()> {
        let inputs: Vec<DataInput<'_>> = rows(flat, dim)?.map(DataInput::Bytes).collect();
        self.add_data_point_batch(&inputs, ids)
    }

    /// Build the method over every stored record
    pub fn build(&mut self, method_params: &ParameterSet, print_progress: bool) -> Result<()> {
        let started = Instant::now();
        let query_defaults = [self.config.query.default_entry()];
        dispatch!(&mut self.body, ix => ix.build(&self.method_name, method_params.entries(), &query_defaults, print_progress))?;

        info!(
            method = %self.method_name,
            space = %self.space_name,
            records = self.data_qty(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index built"
        );
        Ok(())
    }

    /// Reset the method to its own defaults, then apply the configured
    /// search breadth
    pub(crate) fn apply_default_query_params(&mut self) -> Result<()> {
        let entry = self.config.query.default_entry();
        dispatch!(&mut self.body, ix => ix.restore_query_params(std::slice::from_ref(&entry)))
    }

    /// Drop the method and every record; the space is kept
    pub fn reset(&mut self) {
        let dropped = self.data_qty();
        dispatch!(&mut self.body, ix => ix.clear());
        info!(space = %self.space_name, records = dropped, "Index reset");
    }

    /// Apply query-time parameters to the built method
    pub fn set_query_time_params(&mut self, params: &ParameterSet) -> Result<()> {
        dispatch!(&mut self.body, ix => ix.set_query_params(params.entries()))
    }

    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size
    }

    /// Worker count for batch queries, `1..=max_size`
    pub fn set_thread_pool_size(&mut self, size: usize) -> Result<()> {
        let max = self.config.threads.max_size;
        if size == 0 || size > max {
            return Err(Error::invalid_argument(format!(
                "thread pool size must be between 1 and {}, got {}",
                max, size
            )));
        }
        self.thread_pool_size = size;
        Ok(())
    }

    /// The cached batch-query pool, rebuilt when the size changed
    pub(crate) fn query_pool(&self) -> Result<Arc<ThreadPool>> {
        let mut cached = self.pool.lock();
        if let Some((size, pool)) = cached.as_ref() {
            if *size == self.thread_pool_size {
                return Ok(Arc::clone(pool));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.thread_pool_size)
            .thread_name(|i| format!("simbridge-query-{}", i))
            .build()
            .map_err(|e| Error::runtime(format!("cannot start query threads: {}", e)))?;
        let pool = Arc::new(pool);
        debug!(threads = self.thread_pool_size, "Query pool started");
        *cached = Some((self.thread_pool_size, Arc::clone(&pool)));
        Ok(pool)
    }

    /// Start the batch-query pool ahead of the first batch
    pub fn initialize_pool(&self) -> Result<()> {
        self.query_pool().map(|_| ())
    }

    /// Approximate bytes held by records and method; 0 before build
    pub fn memory_usage(&self) -> usize {
        dispatch!(&self.body, ix => ix.memory_usage())
    }

    /// Distance between two stored records
    pub fn get_distance(&self, pos1: usize, pos2: usize) -> Result<f32> {
        dispatch!(&self.body, ix => ix.distance(pos1, pos2))
    }

    /// Element count of the record at `position`
    pub fn get_data_point_size(&self, position: usize) -> Result<usize> {
        dispatch!(&self.body, ix => ix.record(position).map(Record::len))
    }

    /// Copy the record at `position` into `out`, returning the element count
    pub fn get_data_point_fill(&self, position: usize, out: DataOutput<'_>) -> Result<usize> {
        match (&self.body, out) {
            (IndexBody::DenseFloat(ix), DataOutput::Dense(buf)) => copy_out(ix.record(position)?.data(), buf),
            (IndexBody::SparseFloat(ix), DataOutput::Sparse(buf)) => copy_out(ix.record(position)?.data(), buf),
            (IndexBody::DenseByte(ix), DataOutput::Bytes(buf)) => copy_out(ix.record(position)?.data(), buf),
            (IndexBody::Text(ix), DataOutput::Text(buf)) => copy_out(ix.record(position)?.data(), buf),
            (body, out) => Err(encoding_mismatch(body.encoding(), out.encoding())),
        }
    }

    /// NUL-terminated copy of a string record, allocated with `allocator`
    pub fn get_data_point_string(&self, position: usize, allocator: &Allocator) -> Result<HostBuffer> {
        match &self.body {
            IndexBody::Text(ix) => allocator.dup_bytes(ix.record(position)?.data()),
            body => Err(encoding_mismatch(body.encoding(), DataEncoding::LengthPrefixedString)),
        }
    }

    /// Detached copy of a dense record; the host releases it on its own
    pub fn borrow_data_dense(&self, position: usize, allocator: &Allocator) -> Result<HostBuffer> {
        match &self.body {
            IndexBody::DenseFloat(ix) => allocator.copy_detached(ix.record(position)?.data()),
            body => Err(encoding_mismatch(body.encoding(), DataEncoding::DenseFloatVector)),
        }
    }

    /// Detached copy of a sparse record's `(id, value)` pairs
    pub fn borrow_data_sparse(&self, position: usize, allocator: &Allocator) -> Result<HostBuffer> {
        match &self.body {
            IndexBody::SparseFloat(ix) => allocator.copy_detached(ix.record(position)?.data()),
            body => Err(encoding_mismatch(body.encoding(), DataEncoding::SparseFloatVector)),
        }
    }
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("header", &self.header)
            .field("space", &self.space_name)
            .field("method", &self.method_name)
            .field("state", &self.state())
            .field("records", &self.data_qty())
            .field("thread_pool_size", &self.thread_pool_size)
            .finish()
    }
}
