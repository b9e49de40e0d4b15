//! # Space and Method Registry
//!
//! Static table mapping each space name to the record encoding it accepts
//! and its canonical distance kind. The table is resolved once into a lookup
//! map; callers never need to guess which instantiation a space lives in.

use std::collections::HashMap;
use std::sync::OnceLock;

use simbridge_core::error::{Error, Result};
use simbridge_core::{DataEncoding, DistanceKind, SparseElement};

use crate::distance::DistanceValue;
use crate::method::{BruteForce, Method, Vamana};
use crate::object::Element;
use crate::space::{
    expect_no_params, ByteMetric, ByteVectorSpace, DenseFloatSpace, DenseMetric, LevenshteinSpace,
    SparseFloatSpace, SparseMetric, Space,
};

/// Registry entry for a space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceEntry {
    pub name: &'static str,
    pub encoding: DataEncoding,
    pub distance_kind: DistanceKind,
}

const SPACES: &[SpaceEntry] = &[
    SpaceEntry { name: "l2", encoding: DataEncoding::DenseFloatVector, distance_kind: DistanceKind::Float },
    SpaceEntry { name: "l2sqr", encoding: DataEncoding::DenseFloatVector, distance_kind: DistanceKind::Float },
    SpaceEntry { name: "l1", encoding: DataEncoding::DenseFloatVector, distance_kind: DistanceKind::Float },
    SpaceEntry { name: "cosinesimil", encoding: DataEncoding::DenseFloatVector, distance_kind: DistanceKind::Float },
    SpaceEntry { name: "negdotprod", encoding: DataEncoding::DenseFloatVector, distance_kind: DistanceKind::Float },
    SpaceEntry { name: "cosinesimil_sparse", encoding: DataEncoding::SparseFloatVector, distance_kind: DistanceKind::Float },
    SpaceEntry { name: "negdotprod_sparse", encoding: DataEncoding::SparseFloatVector, distance_kind: DistanceKind::Float },
    SpaceEntry { name: "l2sqr_sift", encoding: DataEncoding::DenseByteVector, distance_kind: DistanceKind::Int },
    SpaceEntry { name: "l1_uint8", encoding: DataEncoding::DenseByteVector, distance_kind: DistanceKind::Int },
    SpaceEntry { name: "leven", encoding: DataEncoding::LengthPrefixedString, distance_kind: DistanceKind::Int },
];

/// Names accepted by [`create_method`]
pub const METHOD_NAMES: &[&str] = &["brute_force", "vamana"];

/// Resolved space lookup table
#[derive(Debug)]
pub struct SpaceRegistry {
    by_name: HashMap<&'static str, SpaceEntry>,
}

impl SpaceRegistry {
    fn build() -> Self {
        Self {
            by_name: SPACES.iter().map(|entry| (entry.name, *entry)).collect(),
        }
    }

    /// Look up a space by name
    pub fn resolve(&self, name: &str) -> Result<SpaceEntry> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::space_incompatible(format!("unknown space '{}'", name)))
    }

    /// Space names accepting `encoding`, in table order
    pub fn names_for(&self, encoding: DataEncoding) -> Vec<&'static str> {
        SPACES.iter().filter(|e| e.encoding == encoding).map(|e| e.name).collect()
    }
}

/// The process-wide registry
pub fn spaces() -> &'static SpaceRegistry {
    static REGISTRY: OnceLock<SpaceRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SpaceRegistry::build)
}

pub type DenseFloatSpaceBox = Box<dyn Space<f32, f32>>;
pub type SparseFloatSpaceBox = Box<dyn Space<SparseElement, f32>>;
pub type ByteSpaceBox = Box<dyn Space<u8, i32>>;

fn wrong_family(name: &str, wanted: DataEncoding) -> Error {
    Error::space_incompatible(format!("space '{}' does not accept {} records", name, wanted))
}

pub fn create_dense_float_space(name: &str, params: &[String]) -> Result<DenseFloatSpaceBox> {
    let metric = match name {
        "l2" => DenseMetric::L2,
        "l2sqr" => DenseMetric::L2Squared,
        "l1" => DenseMetric::L1,
        "cosinesimil" => DenseMetric::Cosine,
        "negdotprod" => DenseMetric::NegativeDot,
        _ => return Err(wrong_family(name, DataEncoding::DenseFloatVector)),
    };
    expect_no_params(name, params)?;
    Ok(Box::new(DenseFloatSpace::new(metric)))
}

pub fn create_sparse_float_space(name: &str, params: &[String]) -> Result<SparseFloatSpaceBox> {
    let metric = match name {
        "cosinesimil_sparse" => SparseMetric::Cosine,
        "negdotprod_sparse" => SparseMetric::NegativeDot,
        _ => return Err(wrong_family(name, DataEncoding::SparseFloatVector)),
    };
    expect_no_params(name, params)?;
    Ok(Box::new(SparseFloatSpace::new(metric)))
}

pub fn create_byte_space(name: &str, params: &[String]) -> Result<ByteSpaceBox> {
    let metric = match name {
        "l2sqr_sift" => ByteMetric::L2Squared,
        "l1_uint8" => ByteMetric::L1,
        _ => return Err(wrong_family(name, DataEncoding::DenseByteVector)),
    };
    expect_no_params(name, params)?;
    Ok(Box::new(ByteVectorSpace::new(metric)))
}

pub fn create_string_space(name: &str, params: &[String]) -> Result<ByteSpaceBox> {
    if name != "leven" {
        return Err(wrong_family(name, DataEncoding::LengthPrefixedString));
    }
    expect_no_params(name, params)?;
    Ok(Box::new(LevenshteinSpace))
}

/// Instantiate a method by name for any element/distance pairing
pub fn create_method<E: Element, D: DistanceValue>(name: &str) -> Result<Box<dyn Method<E, D>>> {
    match name {
        "brute_force" => Ok(Box::new(BruteForce::new())),
        "vamana" => Ok(Box::new(Vamana::new())),
        other => Err(Error::invalid_argument(format!(
            "unknown method '{}', expected one of: {}",
            other,
            METHOD_NAMES.join(", ")
        ))),
    }
}
