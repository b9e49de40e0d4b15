//! # Core Types
//!
//! Record encodings, distance kinds and the plain-old-data structs shared
//! with C callers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a record's bytes are interpreted
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataEncoding {
    /// Contiguous `f32` values
    DenseFloatVector = 0,
    /// Sorted `(id, value)` pairs, see [`SparseElement`]
    SparseFloatVector = 1,
    /// Contiguous unsigned bytes
    DenseByteVector = 2,
    /// Raw character data of a given length, not NUL-terminated
    LengthPrefixedString = 3,
}

impl DataEncoding {
    pub const ALL: [DataEncoding; 4] = [
        DataEncoding::DenseFloatVector,
        DataEncoding::SparseFloatVector,
        DataEncoding::DenseByteVector,
        DataEncoding::LengthPrefixedString,
    ];

    /// The distance kind every index of this encoding is instantiated with
    pub fn canonical_distance_kind(self) -> DistanceKind {
        match self {
            DataEncoding::DenseFloatVector | DataEncoding::SparseFloatVector => DistanceKind::Float,
            DataEncoding::DenseByteVector | DataEncoding::LengthPrefixedString => DistanceKind::Int,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u32 as u8
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(DataEncoding::DenseFloatVector),
            1 => Ok(DataEncoding::SparseFloatVector),
            2 => Ok(DataEncoding::DenseByteVector),
            3 => Ok(DataEncoding::LengthPrefixedString),
            other => Err(Error::invalid_argument(format!("unknown data encoding {}", other))),
        }
    }
}

impl fmt::Display for DataEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataEncoding::DenseFloatVector => "dense float vector",
            DataEncoding::SparseFloatVector => "sparse float vector",
            DataEncoding::DenseByteVector => "dense byte vector",
            DataEncoding::LengthPrefixedString => "string",
        };
        f.write_str(name)
    }
}

/// Numeric type of distances produced by a space
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceKind {
    Float = 0,
    Int = 1,
}

impl DistanceKind {
    pub fn as_u8(self) -> u8 {
        self as u32 as u8
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(DistanceKind::Float),
            1 => Ok(DistanceKind::Int),
            other => Err(Error::invalid_argument(format!("unknown distance kind {}", other))),
        }
    }
}

impl fmt::Display for DistanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceKind::Float => f.write_str("float"),
            DistanceKind::Int => f.write_str("int"),
        }
    }
}

/// Fixed identity of an index, set at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexHeader {
    pub encoding: DataEncoding,
    pub distance_kind: DistanceKind,
}

impl IndexHeader {
    pub fn new(encoding: DataEncoding, distance_kind: DistanceKind) -> Self {
        Self { encoding, distance_kind }
    }
}

/// One non-zero coordinate of a sparse vector
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseElement {
    pub id: u32,
    pub value: f32,
}

impl SparseElement {
    pub fn new(id: u32, value: f32) -> Self {
        Self { id, value }
    }
}

/// A single query hit: record id and its distance to the query
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryHit {
    pub id: i32,
    pub distance: f32,
}
