//! Distance value types produced by spaces.

use std::cmp::Ordering;
use std::fmt;

use simbridge_core::DistanceKind;

/// Numeric distance type of a space (`f32` or `i32`)
pub trait DistanceValue: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static {
    const KIND: DistanceKind;

    /// Total order, NaN sorted last for floats
    fn total_cmp(&self, other: &Self) -> Ordering;

    fn to_f32(self) -> f32;

    fn to_f64(self) -> f64;

    /// Convert a caller-supplied radius; integer spaces round down, so
    /// `d <= radius` keeps the same meaning
    fn from_radius(radius: f32) -> Self;
}

impl DistanceValue for f32 {
    const KIND: DistanceKind = DistanceKind::Float;

    #[inline]
    fn total_cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(self, other)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_radius(radius: f32) -> Self {
        radius
    }
}

impl DistanceValue for i32 {
    const KIND: DistanceKind = DistanceKind::Int;

    #[inline]
    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_radius(radius: f32) -> Self {
        radius.floor() as i32
    }
}

/// Wrapper giving any distance a total order (for `BinaryHeap`)
#[derive(Debug, Clone, Copy)]
pub struct Ordered<D>(pub D);

impl<D: DistanceValue> PartialEq for Ordered<D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<D: DistanceValue> Eq for Ordered<D> {}

impl<D: DistanceValue> PartialOrd for Ordered<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: DistanceValue> Ord for Ordered<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
