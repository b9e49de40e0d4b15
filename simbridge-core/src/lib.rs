//! # simbridge Core
//!
//! Shared vocabulary of the simbridge workspace:
//! - Error taxonomy with stable C codes
//! - Allocator bridge for memory handed to host callers
//! - Record encodings, distance kinds and C-layout structs
//! - Ordered engine parameter lists
//! - Configuration and logging setup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 simbridge-core                  │
//! ├─────────────────────────────────────────────────┤
//! │  • error   - codes, located errors, details     │
//! │  • alloc   - host alloc/free bridge             │
//! │  • types   - encodings, headers, sparse items   │
//! │  • params  - "name=value" parameter sets        │
//! │  • config  - defaults (query, threads, logs)    │
//! │  • logging - tracing-subscriber setup           │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod alloc;
pub mod config;
pub mod error;
pub mod logging;
pub mod params;
pub mod types;

// Re-export commonly used types
pub use alloc::{Allocator, HostAllocator, HostBuffer, RawAllocator};
pub use config::BridgeConfig;
pub use error::{Error, ErrorCode, ErrorDetail, Result, ResultExt};
pub use params::{ParamType, ParamValue, ParameterSet};
pub use types::{DataEncoding, DistanceKind, IndexHeader, QueryHit, SparseElement};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
