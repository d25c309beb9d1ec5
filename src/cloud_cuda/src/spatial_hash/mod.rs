//! Uniform spatial hash grid over a point set.
//!
//! Every neighborhood operation shares this index: compute the bounds of
//! the input, derive a grid whose cell side is a function of the
//! operation's radius, sort the points by cell, then resolve cells through
//! an open-addressed hash table. The 27-cell stencil around a query cell is
//! a conservative superset of all points within one cell side of the query.
//!
//! # Layout
//!
//! `sorted_indices` is a permutation of the input indices ordered by cell
//! key; each occupied cell owns one contiguous slice of it. The hash table
//! maps a cell coordinate to its slice via linear probing; a slot with
//! `count == 0` is empty.

pub mod kernels;

use nalgebra::Vector3;

use crate::error::{Error, Result};

/// Integer coordinate of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Geometry of a grid: origin, cubic cell side, and cell counts per axis.
#[derive(Debug, Clone)]
pub struct GridParams {
    pub origin: Vector3<f32>,
    pub cell_side: f32,
    pub dims: [i32; 3],
}

/// Cells of padding kept between the grid origin and the data minimum so
/// the 27-cell stencil of any input point stays inside the grid.
const PADDING_CELLS: f32 = 1.5;

impl GridParams {
    /// Derive a padded grid covering `[min_bound, max_bound]`.
    ///
    /// Refuses when `cell_side` is non-positive or when the padded extent
    /// divided by `cell_side` would overflow a signed 32-bit cell
    /// coordinate along any axis.
    pub fn padded(
        min_bound: &Vector3<f32>,
        max_bound: &Vector3<f32>,
        cell_side: f32,
    ) -> Result<Self> {
        if !(cell_side > 0.0) || !cell_side.is_finite() {
            return Err(Error::invalid(
                "grid_build",
                format!("cell side must be positive, got {cell_side}"),
            ));
        }

        let origin = min_bound - Vector3::repeat(PADDING_CELLS * cell_side);

        let mut dims = [0i32; 3];
        for axis in 0..3 {
            let extent = (max_bound[axis] - origin[axis]) as f64;
            let cells = (extent / cell_side as f64).ceil() + 2.0;
            if !cells.is_finite() || cells > i32::MAX as f64 {
                return Err(Error::invalid(
                    "grid_build",
                    format!("extent {extent} overflows cell coordinates at cell side {cell_side}"),
                ));
            }
            dims[axis] = cells as i32;
        }

        Ok(Self {
            origin,
            cell_side,
            dims,
        })
    }

    /// Cell containing `p`.
    pub fn cell_coord(&self, p: &Vector3<f32>) -> CellCoord {
        let inv = 1.0 / self.cell_side;
        CellCoord {
            x: ((p.x - self.origin.x) * inv).floor() as i32,
            y: ((p.y - self.origin.y) * inv).floor() as i32,
            z: ((p.z - self.origin.z) * inv).floor() as i32,
        }
    }

    pub fn contains(&self, c: CellCoord) -> bool {
        c.x >= 0
            && c.y >= 0
            && c.z >= 0
            && c.x < self.dims[0]
            && c.y < self.dims[1]
            && c.z < self.dims[2]
    }

    /// Linearized cell key, the total order the point layout is sorted by.
    pub fn cell_key(&self, c: CellCoord) -> u64 {
        let nx = self.dims[0] as u64;
        let ny = self.dims[1] as u64;
        (c.z as u64 * ny + c.y as u64) * nx + c.x as u64
    }

    fn coord_of_key(&self, key: u64) -> CellCoord {
        let nx = self.dims[0] as u64;
        let ny = self.dims[1] as u64;
        CellCoord {
            x: (key % nx) as i32,
            y: ((key / nx) % ny) as i32,
            z: (key / (nx * ny)) as i32,
        }
    }
}

/// One occupied cell: the slice of the sorted permutation holding its
/// points. A slot with `count == 0` is empty.
#[derive(Debug, Clone, Copy)]
pub struct HashEntry {
    pub cell: CellCoord,
    pub first: u32,
    pub count: u32,
}

impl HashEntry {
    const EMPTY: Self = Self {
        cell: CellCoord { x: 0, y: 0, z: 0 },
        first: 0,
        count: 0,
    };
}

/// Deterministic cell mixing function (Teschner-style prime XOR), folded
/// into a power-of-two table by masking.
pub fn hash_cell(c: CellCoord) -> u32 {
    (c.x as u32).wrapping_mul(73_856_093)
        ^ (c.y as u32).wrapping_mul(19_349_669)
        ^ (c.z as u32).wrapping_mul(83_492_791)
}

/// The spatial hash index. Transient: built at the start of an operation,
/// consumed by its kernels, dropped at operation end.
#[derive(Debug)]
pub struct SpatialHashGrid {
    pub params: GridParams,
    /// Permutation of input indices, sorted by cell key.
    pub sorted_indices: Vec<u32>,
    /// Open-addressed table, length a power of two, at least twice the
    /// point count.
    pub table: Vec<HashEntry>,
    table_mask: u32,
    /// Upper bound on linear-probe length for any lookup; passed to the
    /// device kernels so their probe loops have an exact trip count.
    probe_bound: u32,
}

impl SpatialHashGrid {
    /// Build the index for `coords` on a grid described by `params`.
    ///
    /// Every input point must fall inside the grid; `GridParams::padded`
    /// over the same bounds guarantees that.
    pub fn build(coords: &[Vector3<f32>], params: GridParams) -> Self {
        let n = coords.len();
        if n == 0 {
            return Self {
                params,
                sorted_indices: Vec::new(),
                table: Vec::new(),
                table_mask: 0,
                probe_bound: 0,
            };
        }

        let mut pairs: Vec<(u64, u32)> = coords
            .iter()
            .enumerate()
            .map(|(i, p)| (params.cell_key(params.cell_coord(p)), i as u32))
            .collect();
        pairs.sort_unstable();

        let table_len = (2 * n).next_power_of_two();
        let table_mask = table_len as u32 - 1;
        let mut table = vec![HashEntry::EMPTY; table_len];

        // Scan the sorted layout for per-cell runs and insert each run with
        // linear probing.
        let mut run_start = 0usize;
        while run_start < n {
            let key = pairs[run_start].0;
            let mut run_end = run_start + 1;
            while run_end < n && pairs[run_end].0 == key {
                run_end += 1;
            }

            let cell = params.coord_of_key(key);
            let mut slot = (hash_cell(cell) & table_mask) as usize;
            while table[slot].count != 0 {
                slot = (slot + 1) & table_mask as usize;
            }
            table[slot] = HashEntry {
                cell,
                first: run_start as u32,
                count: (run_end - run_start) as u32,
            };

            run_start = run_end;
        }

        let probe_bound = longest_occupied_run(&table) + 1;

        Self {
            params,
            sorted_indices: pairs.into_iter().map(|(_, i)| i).collect(),
            table,
            table_mask,
            probe_bound,
        }
    }

    pub fn len(&self) -> usize {
        self.sorted_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_indices.is_empty()
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn probe_bound(&self) -> u32 {
        self.probe_bound
    }

    /// Resolve a cell to the slice of sorted point indices it owns, or
    /// `None` when the cell is unoccupied or outside the grid.
    pub fn lookup(&self, cell: CellCoord) -> Option<&[u32]> {
        if self.table.is_empty() || !self.params.contains(cell) {
            return None;
        }

        let mut slot = (hash_cell(cell) & self.table_mask) as usize;
        for _ in 0..self.table.len() {
            let entry = &self.table[slot];
            if entry.count == 0 {
                return None;
            }
            if entry.cell == cell {
                let first = entry.first as usize;
                return Some(&self.sorted_indices[first..first + entry.count as usize]);
            }
            slot = (slot + 1) & self.table_mask as usize;
        }
        None
    }

    /// Enumerate the candidate point indices of the 27-cell stencil around
    /// `center`, in a fixed cell order so per-point neighbor lists are
    /// reproducible across runs of identical input.
    pub fn stencil_candidates(&self, center: CellCoord) -> impl Iterator<Item = u32> + '_ {
        (-1..=1).flat_map(move |dz| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).flat_map(move |dx| {
                    self.lookup(CellCoord::new(center.x + dx, center.y + dy, center.z + dz))
                        .into_iter()
                        .flatten()
                        .copied()
                })
            })
        })
    }

    /// Flatten the table for device upload:
    /// `(cell_x[], cell_y[], cell_z[], first[], count[])`.
    pub fn table_arrays(&self) -> (Vec<i32>, Vec<i32>, Vec<i32>, Vec<u32>, Vec<u32>) {
        let len = self.table.len();
        let mut cx = Vec::with_capacity(len);
        let mut cy = Vec::with_capacity(len);
        let mut cz = Vec::with_capacity(len);
        let mut first = Vec::with_capacity(len);
        let mut count = Vec::with_capacity(len);
        for e in &self.table {
            cx.push(e.cell.x);
            cy.push(e.cell.y);
            cz.push(e.cell.z);
            first.push(e.first);
            count.push(e.count);
        }
        (cx, cy, cz, first, count)
    }
}

/// Longest circular run of occupied slots; any probe sequence terminates
/// within one more step than this.
fn longest_occupied_run(table: &[HashEntry]) -> u32 {
    let len = table.len();
    if len == 0 {
        return 0;
    }

    let mut longest = 0u32;
    let mut current = 0u32;
    // Doubling the scan handles runs that wrap around the table end; an
    // all-occupied table cannot happen at <= 50% load.
    for i in 0..2 * len {
        if table[i % len].count != 0 {
            current += 1;
            longest = longest.max(current.min(len as u32));
        } else {
            current = 0;
        }
    }
    longest
}
