//! # Spaces
//!
//! A space defines how two records of one element type are compared and how
//! a vector of its records is written to disk.
//!
//! | Name                 | Elements        | Distance | Formula                      |
//! |----------------------|-----------------|----------|------------------------------|
//! | `l2`                 | `f32`           | `f32`    | sqrt(Σ (a-b)²)               |
//! | `l2sqr`              | `f32`           | `f32`    | Σ (a-b)²                     |
//! | `l1`                 | `f32`           | `f32`    | Σ abs(a-b)                   |
//! | `cosinesimil`        | `f32`           | `f32`    | 1 - cos(a,b)                 |
//! | `negdotprod`         | `f32`           | `f32`    | -(a·b)                       |
//! | `cosinesimil_sparse` | `SparseElement` | `f32`    | 1 - cos(a,b)                 |
//! | `negdotprod_sparse`  | `SparseElement` | `f32`    | -(a·b)                       |
//! | `l2sqr_sift`         | `u8`            | `i32`    | Σ (a-b)²                     |
//! | `l1_uint8`           | `u8`            | `i32`    | Σ abs(a-b)                   |
//! | `leven`              | `u8` (string)   | `i32`    | Levenshtein edit distance    |

use std::io::{Read, Write};

use simbridge_core::error::{Error, Result};
use simbridge_core::{DataEncoding, SparseElement};

use crate::dataset;
use crate::distance::DistanceValue;
use crate::object::{Element, Record};
use crate::simd;

/// Distance function over records of element type `E`
pub trait Space<E: Element, D: DistanceValue>: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Record shape this space accepts
    fn encoding(&self) -> DataEncoding;

    /// Distance between two records; smaller is closer
    fn distance(&self, a: &[E], b: &[E]) -> D;

    /// Serialize a record vector of this space
    fn write_records(&self, w: &mut dyn Write, records: &[Record<E>]) -> Result<()> {
        dataset::write_records(w, self.encoding(), records)
    }

    /// Deserialize a record vector of this space
    fn read_records(&self, r: &mut dyn Read) -> Result<Vec<Record<E>>> {
        dataset::read_records(r, self.encoding())
    }
}

/// Reject parameters for spaces that take none
pub(crate) fn expect_no_params(name: &str, params: &[String]) -> Result<()> {
    match params.first() {
        None => Ok(()),
        Some(first) => Err(Error::invalid_argument(format!(
            "space '{}' takes no parameters, got '{}'",
            name, first
        ))),
    }
}

// ============================================================================
// Dense float vectors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseMetric {
    L2,
    L2Squared,
    L1,
    Cosine,
    NegativeDot,
}

#[derive(Debug, Clone, Copy)]
pub struct DenseFloatSpace {
    metric: DenseMetric,
}

impl DenseFloatSpace {
    pub fn new(metric: DenseMetric) -> Self {
        Self { metric }
    }
}

impl Space<f32, f32> for DenseFloatSpace {
    fn name(&self) -> &'static str {
        match self.metric {
            DenseMetric::L2 => "l2",
            DenseMetric::L2Squared => "l2sqr",
            DenseMetric::L1 => "l1",
            DenseMetric::Cosine => "cosinesimil",
            DenseMetric::NegativeDot => "negdotprod",
        }
    }

    fn encoding(&self) -> DataEncoding {
        DataEncoding::DenseFloatVector
    }

    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DenseMetric::L2 => simd::l2_distance(a, b),
            DenseMetric::L2Squared => simd::l2_distance_squared(a, b),
            DenseMetric::L1 => simd::l1_distance(a, b),
            DenseMetric::Cosine => simd::cosine_distance(a, b),
            DenseMetric::NegativeDot => -simd::dot_product(a, b),
        }
    }
}

// ============================================================================
// Sparse float vectors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseMetric {
    Cosine,
    NegativeDot,
}

#[derive(Debug, Clone, Copy)]
pub struct SparseFloatSpace {
    metric: SparseMetric,
}

impl SparseFloatSpace {
    pub fn new(metric: SparseMetric) -> Self {
        Self { metric }
    }
}

/// Merge-join dot product; both inputs sorted by id
fn sparse_dot(a: &[SparseElement], b: &[SparseElement]) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0f32;
    while i < a.len() && j < b.len() {
        match a[i].id.cmp(&b[j].id) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].value * b[j].value;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

fn sparse_norm(v: &[SparseElement]) -> f32 {
    v.iter().map(|e| e.value * e.value).sum::<f32>().sqrt()
}

impl Space<SparseElement, f32> for SparseFloatSpace {
    fn name(&self) -> &'static str {
        match self.metric {
            SparseMetric::Cosine => "cosinesimil_sparse",
            SparseMetric::NegativeDot => "negdotprod_sparse",
        }
    }

    fn encoding(&self) -> DataEncoding {
        DataEncoding::SparseFloatVector
    }

    fn distance(&self, a: &[SparseElement], b: &[SparseElement]) -> f32 {
        let dot = sparse_dot(a, b);
        match self.metric {
            SparseMetric::NegativeDot => -dot,
            SparseMetric::Cosine => {
                let denom = sparse_norm(a) * sparse_norm(b);
                if denom > 0.0 {
                    1.0 - dot / denom
                } else {
                    1.0
                }
            }
        }
    }
}

// ============================================================================
// Dense byte vectors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteMetric {
    L2Squared,
    L1,
}

#[derive(Debug, Clone, Copy)]
pub struct ByteVectorSpace {
    metric: ByteMetric,
}

impl ByteVectorSpace {
    pub fn new(metric: ByteMetric) -> Self {
        Self { metric }
    }
}

impl Space<u8, i32> for ByteVectorSpace {
    fn name(&self) -> &'static str {
        match self.metric {
            ByteMetric::L2Squared => "l2sqr_sift",
            ByteMetric::L1 => "l1_uint8",
        }
    }

    fn encoding(&self) -> DataEncoding {
        DataEncoding::DenseByteVector
    }

    #[inline]
    fn distance(&self, a: &[u8], b: &[u8]) -> i32 {
        match self.metric {
            ByteMetric::L2Squared => simd::l2_squared_u8(a, b),
            ByteMetric::L1 => simd::l1_u8(a, b),
        }
    }
}

// ============================================================================
// Strings
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct LevenshteinSpace;

/// Edit distance with unit costs, two-row dynamic programming
pub fn levenshtein(a: &[u8], b: &[u8]) -> i32 {
    if a.is_empty() {
        return b.len() as i32;
    }
    if b.is_empty() {
        return a.len() as i32;
    }

    let mut prev: Vec<i32> = (0..=b.len() as i32).collect();
    let mut curr = vec![0i32; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i as i32 + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + (ca != cb) as i32;
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            curr[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

impl Space<u8, i32> for LevenshteinSpace {
    fn name(&self) -> &'static str {
        "leven"
    }

    fn encoding(&self) -> DataEncoding {
        DataEncoding::LengthPrefixedString
    }

    fn distance(&self, a: &[u8], b: &[u8]) -> i32 {
        levenshtein(a, b)
    }
}
