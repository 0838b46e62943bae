// src/geom.rs
//
// Geometric primitives shared by the whole solver stack:
// - Vector: immutable fixed-length real tuple with value equality
// - Interval: one axis of a bounding box
// - Cell: axis-aligned product of intervals bounding a state space
//
// Vectors are hashed and compared by element bit patterns so they can key
// the memoization caches in `relax`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Immutable fixed-dimension real vector.
///
/// Backed by `Arc<[f64]>` so clones in hot paths (bucket lists, transition
/// records, cache keys) are a reference bump, not a copy.
#[derive(Clone)]
pub struct Vector {
    data: Arc<[f64]>,
}

impl Vector {
    pub fn new(data: Vec<f64>) -> Self {
        Self { data: data.into() }
    }

    pub fn from_slice(data: &[f64]) -> Self {
        Self { data: data.into() }
    }

    pub fn dimensions(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, i: usize) -> f64 {
        self.data[i]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Square of the Euclidean distance to `other`.
    pub fn squared_distance(&self, other: &Vector) -> f64 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

impl From<Vec<f64>> for Vector {
    fn from(data: Vec<f64>) -> Self {
        Self::new(data)
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for Vector {}

impl Hash for Vector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for x in self.data.iter() {
            state.write_u64(x.to_bits());
        }
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector{:?}", &self.data[..])
    }
}

/// Closed interval `[start, start + width]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    start: f64,
    width: f64,
}

impl Interval {
    /// Negative widths are folded to their absolute value.
    pub fn new(start: f64, width: f64) -> Self {
        Self {
            start,
            width: width.abs(),
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn end(&self) -> f64 {
        self.start + self.width
    }

    pub fn contains(&self, d: f64) -> bool {
        d >= self.start && d <= self.end()
    }
}

/// Axis-aligned bounding cell: the product of one interval per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    intervals: Vec<Interval>,
}

impl Cell {
    pub fn of(intervals: Vec<Interval>) -> Self {
        Self { intervals }
    }

    /// The cell `[0, 1]^dimensions`.
    pub fn unit(dimensions: usize) -> Self {
        Self::regular(dimensions, 0.0, 1.0)
    }

    /// The cell `[start, start + width]^dimensions`.
    pub fn regular(dimensions: usize, start: f64, width: f64) -> Self {
        Self {
            intervals: vec![Interval::new(start, width); dimensions],
        }
    }

    pub fn dimensions(&self) -> usize {
        self.intervals.len()
    }

    pub fn interval(&self, i: usize) -> &Interval {
        &self.intervals[i]
    }

    pub fn contains(&self, v: &Vector) -> bool {
        v.dimensions() == self.dimensions()
            && self
                .intervals
                .iter()
                .enumerate()
                .all(|(i, itv)| itv.contains(v.get(i)))
    }

    /// Length of the cell's main diagonal.
    pub fn diameter(&self) -> f64 {
        self.intervals
            .iter()
            .map(|itv| itv.width() * itv.width())
            .sum::<f64>()
            .sqrt()
    }
}
