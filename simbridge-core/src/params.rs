//! Ordered `name=value` parameter lists handed to the engine.

use std::fmt;

use crate::alloc::Allocator;
use crate::error::{Error, Result};

/// Type tag of a parameter value (0 = int, 1 = double, 2 = string)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int = 0,
    Double = 1,
    Str = 2,
}

impl ParamType {
    pub fn from_u32(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(ParamType::Int),
            1 => Ok(ParamType::Double),
            2 => Ok(ParamType::Str),
            other => Err(Error::invalid_argument(format!("unknown parameter type tag {}", other))),
        }
    }
}

/// A typed parameter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue<'a> {
    Int(i32),
    Double(f64),
    Str(&'a str),
}

impl ParamValue<'_> {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Double(_) => ParamType::Double,
            ParamValue::Str(_) => ParamType::Str,
        }
    }
}

impl fmt::Display for ParamValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            // Six fractional digits, matching C's "%f".
            ParamValue::Double(v) => write!(f, "{:.6}", v),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

/// Ordered list of `"name=value"` strings.
///
/// Insertion order is preserved and duplicate names are kept; resolving
/// duplicates is up to the engine. Names are not validated here.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    entries: Vec<String>,
    allocator: Allocator,
}

impl ParameterSet {
    pub fn new(allocator: Allocator) -> Self {
        Self { entries: Vec::new(), allocator }
    }

    /// Build from literal `"name=value"` strings
    pub fn from_entries<I, S>(allocator: Allocator, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
            allocator,
        }
    }

    /// Append `name=value`
    pub fn add(&mut self, name: &str, value: ParamValue<'_>) {
        self.entries.push(format!("{}={}", name, value));
    }

    pub fn add_int(&mut self, name: &str, value: i32) {
        self.add(name, ParamValue::Int(value));
    }

    pub fn add_double(&mut self, name: &str, value: f64) {
        self.add(name, ParamValue::Double(value));
    }

    pub fn add_str(&mut self, name: &str, value: &str) {
        self.add(name, ParamValue::Str(value));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }
}
