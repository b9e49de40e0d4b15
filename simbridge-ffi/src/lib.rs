//! # simbridge
//!
//! Boundary layer between host programs and the simbridge similarity-search
//! engine. Rust callers use [`IndexHandle`] directly; C callers use the
//! `simbridge_*` functions in [`ffi`] (header in `include/simbridge.h`).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  ffi        extern "C" surface, per-thread error detail  │
//! ├──────────────────────────────────────────────────────────┤
//! │  handle     IndexHandle: state machine, typed dispatch   │
//! │  construct  owned records / borrowed queries             │
//! │  query      k-NN and range fills, batch on rayon pool    │
//! │  persist    topology file + "<path>.dat" record file     │
//! ├──────────────────────────────────────────────────────────┤
//! │  simbridge-engine   spaces, methods, registry            │
//! │  simbridge-core     errors, allocator bridge, params     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use simbridge::{DataInput, IndexHandle};
//! use simbridge_core::{Allocator, DataEncoding, DistanceKind, ParameterSet};
//!
//! let params = ParameterSet::new(Allocator::system());
//! let mut index = IndexHandle::create(
//!     DataEncoding::DenseFloatVector,
//!     DistanceKind::Float,
//!     "l2",
//!     &params,
//!     "brute_force",
//!     Allocator::system(),
//! )?;
//! index.add_dense_batch(&[0.0, 0.0, 1.0, 1.0, 5.0, 5.0], 2, None)?;
//! index.build(&params, false)?;
//!
//! let hits = index.knn_query(DataInput::Dense(&[0.9, 0.9]), 2)?;
//! assert_eq!(hits[0].id, 1);
//! # Ok::<(), simbridge_core::Error>(())
//! ```

pub mod construct;
pub mod ffi;
pub mod handle;
pub mod persist;
pub mod query;

pub use construct::{validate_sparse, DataInput, DataOutput};
pub use handle::{IndexHandle, IndexState};
pub use persist::data_path;
pub use query::ResultBuffer;
