//! # simbridge Engine
//!
//! The similarity-search engine behind the simbridge boundary.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Engine Layer                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   Spaces    │    │ BruteForce  │    │   Vamana    │     │
//! │  │ (SIMD math) │    │  (Exact)    │    │   Graph     │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │         │                  │                  │              │
//! │         └──────────────────┴──────────────────┘              │
//! │                           │                                  │
//! │              Space<E, D> / Method<E, D> traits               │
//! │                  + name registry                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `simd`: SIMD-accelerated dense kernels (AVX2/FMA, NEON)
//! - `distance`: `f32` / `i32` distance values
//! - `object`: stored records and borrowed query records
//! - `space`: distance functions per record encoding
//! - `queue`: bounded worst-first result queues
//! - `method`: brute-force and Vamana search structures
//! - `registry`: name → space / method resolution
//! - `dataset`: record-vector file format

pub mod dataset;
pub mod distance;
pub mod method;
pub mod object;
pub mod params;
pub mod queue;
pub mod registry;
pub mod simd;
pub mod space;

pub use distance::DistanceValue;
pub use method::{BruteForce, Method, SearchContext, Vamana, VamanaConfig};
pub use object::{Element, QueryRecord, Record, QUERY_ID};
pub use queue::{KnnQueue, Neighbor};
pub use registry::{create_method, spaces, SpaceEntry, METHOD_NAMES};
pub use space::Space;
