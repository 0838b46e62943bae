// src/filter.rs
//
// Uniform-grid coverage filter over a bounding cell.
//
// Supports amortized O(1) insertion, epsilon-neighbor queries that only
// touch the 3^d adjacent buckets when the radius allows it, and a
// density-aware subsample that returns a spatially even covering set.
//
// Buckets live in a BTreeMap so iteration order is deterministic; the only
// randomness is the caller-supplied RNG used for tie-breaking in
// `subsample`.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::geom::{Cell, Vector};

pub struct GridFilter {
    domain: Cell,
    dimensions: usize,
    cells_per_dim: usize,
    /// Smallest bucket edge across dimensions; the cutoff below which a
    /// neighbor query can restrict itself to adjacent buckets.
    width: f64,
    table: BTreeMap<usize, Vec<Vector>>,
    len: usize,
}

impl GridFilter {
    pub fn new(domain: Cell, cells_per_dim: usize) -> Self {
        assert!(cells_per_dim > 0, "grid needs at least one bucket per axis");
        let dimensions = domain.dimensions();
        let width = (0..dimensions)
            .map(|i| domain.interval(i).width())
            .fold(f64::INFINITY, f64::min)
            / cells_per_dim as f64;
        Self {
            domain,
            dimensions,
            cells_per_dim,
            width,
            table: BTreeMap::new(),
            len: 0,
        }
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of non-empty buckets.
    pub fn occupied_buckets(&self) -> usize {
        self.table.len()
    }

    /// Occupancy histogram: bucket size -> number of buckets of that size.
    pub fn histogram(&self) -> BTreeMap<usize, usize> {
        let mut ret = BTreeMap::new();
        for bucket in self.table.values() {
            *ret.entry(bucket.len()).or_insert(0) += 1;
        }
        ret
    }

    fn coords(&self, v: &Vector) -> Vec<usize> {
        (0..self.dimensions)
            .map(|i| {
                let itv = self.domain.interval(i);
                let raw = (v.get(i) - itv.start()) * self.cells_per_dim as f64 / itv.width();
                (raw.floor() as isize).clamp(0, self.cells_per_dim as isize - 1) as usize
            })
            .collect()
    }

    fn index_of_coords(&self, coords: &[usize]) -> usize {
        coords.iter().fold(0, |acc, &c| acc * self.cells_per_dim + c)
    }

    /// Index of the bucket `v` falls in. Positions outside the domain clamp
    /// to the boundary buckets. Public for tests and diagnostics.
    pub fn bucket_index(&self, v: &Vector) -> usize {
        let coords = self.coords(v);
        self.index_of_coords(&coords)
    }

    /// Geometric center of the given bucket.
    pub fn bucket_center(&self, mut index: usize) -> Vector {
        let mut ret = vec![0.0; self.dimensions];
        for i in (0..self.dimensions).rev() {
            let itv = self.domain.interval(i);
            let coord = index % self.cells_per_dim;
            ret[i] = itv.start() + itv.width() * (coord as f64 + 0.5) / self.cells_per_dim as f64;
            index /= self.cells_per_dim;
        }
        Vector::new(ret)
    }

    pub fn insert(&mut self, v: Vector) {
        let index = self.bucket_index(&v);
        self.table.entry(index).or_default().push(v);
        self.len += 1;
    }

    pub fn insert_all<I: IntoIterator<Item = Vector>>(&mut self, vs: I) {
        for v in vs {
            self.insert(v);
        }
    }

    /// Every stored point strictly within distance `eps` of `v`. Always
    /// exactly the brute-force answer; the adjacent-bucket fast path only
    /// applies when `eps` fits inside one bucket edge.
    pub fn neighbors(&self, v: &Vector, eps: f64) -> Vec<Vector> {
        let eps2 = eps * eps;
        let mut ret = Vec::new();
        if eps >= self.width {
            for bucket in self.table.values() {
                for u in bucket {
                    if v.squared_distance(u) < eps2 {
                        ret.push(u.clone());
                    }
                }
            }
            return ret;
        }

        let center = self.coords(v);
        let mut offset = vec![-1_isize; self.dimensions];
        'offsets: loop {
            let mut coords = Vec::with_capacity(self.dimensions);
            let mut in_grid = true;
            for (i, &off) in offset.iter().enumerate() {
                let c = center[i] as isize + off;
                if c < 0 || c >= self.cells_per_dim as isize {
                    in_grid = false;
                    break;
                }
                coords.push(c as usize);
            }
            if in_grid {
                if let Some(bucket) = self.table.get(&self.index_of_coords(&coords)) {
                    for u in bucket {
                        if v.squared_distance(u) < eps2 {
                            ret.push(u.clone());
                        }
                    }
                }
            }
            // Odometer step over {-1, 0, 1}^d.
            for i in 0..self.dimensions {
                offset[i] += 1;
                if offset[i] <= 1 {
                    continue 'offsets;
                }
                offset[i] = -1;
            }
            break;
        }
        ret
    }

    /// A spatially even covering subset of exactly `k` stored points.
    ///
    /// Panics if `k == 0` or `k` exceeds the number of stored points; both
    /// are caller bugs, not recoverable conditions. `k` equal to the stored
    /// count returns every point. Up to the number of occupied buckets, the
    /// result is one center-closest point from each of `k` randomly chosen
    /// buckets; beyond that, additional points are drawn in
    /// rank-from-center order over a shuffled bucket order, never exceeding
    /// a bucket's occupancy.
    pub fn subsample(&self, k: usize, rng: &mut impl Rng) -> Vec<Vector> {
        assert!(k > 0, "cannot subsample {k} points");
        assert!(
            k <= self.len,
            "requested {k} points but only {} are stored",
            self.len
        );
        if k == self.len {
            return self.table.values().flatten().cloned().collect();
        }
        if k <= self.table.len() {
            return self.bucket_center_sample(k, rng);
        }
        self.rank_order_sample(k, rng)
    }

    fn closest_to_center(&self, index: usize, bucket: &[Vector]) -> Vector {
        let center = self.bucket_center(index);
        let mut best = &bucket[0];
        let mut best_dist = f64::INFINITY;
        for v in bucket {
            let dist = center.squared_distance(v);
            if dist < best_dist {
                best_dist = dist;
                best = v;
            }
        }
        best.clone()
    }

    fn bucket_center_sample(&self, k: usize, rng: &mut impl Rng) -> Vec<Vector> {
        let keys: Vec<usize> = self.table.keys().copied().collect();
        let chosen = rand::seq::index::sample(rng, keys.len(), k);
        let mut ret = Vec::with_capacity(k);
        for key_pos in chosen.iter() {
            let index = keys[key_pos];
            ret.push(self.closest_to_center(index, &self.table[&index]));
        }
        ret
    }

    fn rank_order_sample(&self, k: usize, rng: &mut impl Rng) -> Vec<Vector> {
        // Sort each bucket by distance to its center so rank r is the
        // (r+1)-th closest point.
        let mut ranked: Vec<Vec<Vector>> = self
            .table
            .iter()
            .map(|(&index, bucket)| {
                let center = self.bucket_center(index);
                let mut sorted = bucket.clone();
                sorted.sort_by(|a, b| {
                    center
                        .squared_distance(a)
                        .total_cmp(&center.squared_distance(b))
                });
                sorted
            })
            .collect();

        let mut ret: Vec<Vector> = ranked.iter().map(|bucket| bucket[0].clone()).collect();
        ranked.shuffle(rng);

        let mut rank = 1;
        let mut i = 0;
        while ret.len() < k {
            if i == ranked.len() {
                i = 0;
                rank += 1;
            }
            if ranked[i].len() > rank {
                ret.push(ranked[i][rank].clone());
            }
            i += 1;
        }
        ret
    }
}
