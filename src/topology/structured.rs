//! Block-decomposed structured mesh: the geometric collaborator of the
//! particle container.
//!
//! A global box of `global_cells` is split into `blocks[a]` slabs per axis;
//! each rank owns one block (its *local* box). Sides that face another
//! sub-domain (or wrap around a periodic axis) carry `ghost_width` layers of
//! ghost cells, which together with the local box form the *memory* box.
//!
//! Cells of the memory box fall into exactly one [`Zone`]:
//! - `Ghost`: outside the local box (replicated from neighbours),
//! - `Boundary`: inside the local box, within `ghost_width` of a side that
//!   has a neighbour,
//! - `Center`: everything else.

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshPicError;
use crate::topology::direction::Direction;
use crate::topology::entity_key::{EntityKey, MAX_INDEX};
use crate::topology::index_box::IndexBox;

/// Partition class of a local cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Zone {
    Ghost,
    Boundary,
    Center,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Ghost, Zone::Boundary, Zone::Center];

    #[inline]
    fn slot(self) -> usize {
        match self {
            Zone::Ghost => 0,
            Zone::Boundary => 1,
            Zone::Center => 2,
        }
    }
}

/// User-facing mesh configuration. Filled in by an external loader; checked
/// by [`MeshConfig::validate`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Number of spatial axes in use (1..=3).
    pub ndims: usize,
    /// Cells per axis over the whole domain. Unused axes must be 1.
    pub global_cells: [usize; 3],
    /// Physical coordinate of the lower corner of cell `(0, 0, 0)`.
    pub origin: [f64; 3],
    /// Cell size per axis.
    pub dx: [f64; 3],
    /// Halo width in cells.
    pub ghost_width: usize,
    /// Per-axis periodicity.
    pub periodic: [bool; 3],
    /// Number of sub-domains per axis; the rank count is their product.
    pub blocks: [usize; 3],
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            ndims: 3,
            global_cells: [8, 8, 8],
            origin: [0.0; 3],
            dx: [1.0; 3],
            ghost_width: 1,
            periodic: [false; 3],
            blocks: [1, 1, 1],
        }
    }
}

impl MeshConfig {
    /// Number of ranks the decomposition expects.
    pub fn n_ranks(&self) -> usize {
        self.blocks.iter().product()
    }

    pub fn validate(&self) -> Result<(), MeshPicError> {
        let err = |m: String| Err(MeshPicError::Configuration(m));
        if !(1..=3).contains(&self.ndims) {
            return err(format!("ndims must be 1, 2 or 3 (got {})", self.ndims));
        }
        for a in 0..3 {
            let n = self.global_cells[a];
            let b = self.blocks[a];
            if a >= self.ndims {
                if n != 1 || b != 1 || self.periodic[a] {
                    return err(format!(
                        "axis {a} is unused in a {}-D mesh: needs 1 cell, 1 block, no periodicity",
                        self.ndims
                    ));
                }
                continue;
            }
            if n == 0 || b == 0 {
                return err(format!("axis {a}: cells and blocks must be non-zero"));
            }
            if n as i64 > MAX_INDEX {
                return err(format!(
                    "axis {a}: {n} cells exceed the key codec range (max index {MAX_INDEX})"
                ));
            }
            if !(self.dx[a].is_finite() && self.dx[a] > 0.0) || !self.origin[a].is_finite() {
                return err(format!("axis {a}: dx must be positive and finite"));
            }
            let has_halo = b > 1 || self.periodic[a];
            if has_halo && self.ghost_width == 0 {
                return err(format!(
                    "axis {a} is split or periodic, which needs ghost_width >= 1"
                ));
            }
            if has_halo && n / b < self.ghost_width {
                return err(format!(
                    "axis {a}: blocks of {} cells are thinner than the halo width {}",
                    n / b,
                    self.ghost_width
                ));
            }
        }
        Ok(())
    }
}

/// A realizable link to a neighbouring sub-domain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub rank: usize,
    pub direction: Direction,
    /// Added to particle positions sent over this link so they land in the
    /// receiver's coordinates (non-zero only across a periodic wrap).
    pub shift: [f64; 3],
}

/// One rank's view of the decomposed mesh.
#[derive(Clone, Debug)]
pub struct StructuredMesh {
    config: MeshConfig,
    rank: usize,
    block: [usize; 3],
    global: IndexBox,
    local: IndexBox,
    memory: IndexBox,
    /// `[axis][0 = low side, 1 = high side]`
    halo_sides: [[bool; 2]; 3],
    zones: [Vec<EntityKey>; 3],
}

impl StructuredMesh {
    /// Build the view of `rank` in the decomposition described by `config`.
    pub fn new(config: MeshConfig, rank: usize) -> Result<Self, MeshPicError> {
        config.validate()?;
        let n_ranks = config.n_ranks();
        if rank >= n_ranks {
            return Err(MeshPicError::Configuration(format!(
                "rank {rank} out of range for {n_ranks} sub-domains"
            )));
        }

        let b = config.blocks;
        let block = [rank / (b[1] * b[2]), (rank / b[2]) % b[1], rank % b[2]];

        let mut global = IndexBox::new([0; 3], [1; 3]);
        let mut local = IndexBox::new([0; 3], [1; 3]);
        for a in 0..3 {
            let n = config.global_cells[a] as i64;
            let nb = b[a] as i64;
            global.hi[a] = n;
            local.lo[a] = block[a] as i64 * n / nb;
            local.hi[a] = (block[a] as i64 + 1) * n / nb;
        }

        let mut mesh = Self {
            config,
            rank,
            block,
            global,
            local,
            memory: local,
            halo_sides: [[false; 2]; 3],
            zones: [Vec::new(), Vec::new(), Vec::new()],
        };

        let g = mesh.config.ghost_width as i64;
        let mut below = [0i64; 3];
        let mut above = [0i64; 3];
        for a in 0..mesh.config.ndims {
            for (side, step) in [(0usize, -1i8), (1, 1)] {
                let mut d = [0i8; 3];
                d[a] = step;
                if g > 0 && mesh.neighbor(Direction(d)).is_some() {
                    mesh.halo_sides[a][side] = true;
                }
            }
            if mesh.halo_sides[a][0] {
                below[a] = g;
            }
            if mesh.halo_sides[a][1] {
                above[a] = g;
            }
        }
        mesh.memory = local.expand(below, above);

        let mut zones = [Vec::new(), Vec::new(), Vec::new()];
        for c in mesh.memory.coords() {
            let key = EntityKey::cell(c)?;
            if let Some(z) = mesh.classify(c) {
                zones[z.slot()].push(key);
            }
        }
        mesh.zones = zones;
        mesh.debug_assert_invariants();

        log::debug!(
            "rank {rank}: local {:?}, memory {:?}, zones ghost={} boundary={} center={}",
            mesh.local,
            mesh.memory,
            mesh.zones[0].len(),
            mesh.zones[1].len(),
            mesh.zones[2].len()
        );
        Ok(mesh)
    }

    /// Single-rank mesh.
    pub fn serial(config: MeshConfig) -> Result<Self, MeshPicError> {
        Self::new(config, 0)
    }

    #[inline]
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn n_ranks(&self) -> usize {
        self.config.n_ranks()
    }

    #[inline]
    pub fn ndims(&self) -> usize {
        self.config.ndims
    }

    #[inline]
    pub fn ghost_width(&self) -> usize {
        self.config.ghost_width
    }

    /// Block coordinate of this rank in the decomposition.
    #[inline]
    pub fn block(&self) -> [usize; 3] {
        self.block
    }

    /// Owned cells of this rank.
    #[inline]
    pub fn index_box(&self) -> IndexBox {
        self.local
    }

    /// Owned plus ghost cells.
    #[inline]
    pub fn memory_box(&self) -> IndexBox {
        self.memory
    }

    #[inline]
    pub fn global_box(&self) -> IndexBox {
        self.global
    }

    /// Physical length of the global domain along `axis`.
    pub fn global_length(&self, axis: usize) -> f64 {
        self.config.global_cells[axis] as f64 * self.config.dx[axis]
    }

    pub fn cell_volume(&self) -> f64 {
        (0..self.config.ndims).map(|a| self.config.dx[a]).product()
    }

    fn rank_of(&self, block: [usize; 3]) -> usize {
        let b = self.config.blocks;
        (block[0] * b[1] + block[1]) * b[2] + block[2]
    }

    /// Neighbour across `direction`, or `None` when the direction is not
    /// realizable: zero, a component on an unused axis, or a non-periodic
    /// axis at the global extreme.
    pub fn neighbor(&self, direction: Direction) -> Option<Neighbor> {
        if direction.is_zero() {
            return None;
        }
        let mut block = self.block;
        let mut shift = [0.0f64; 3];
        for a in 0..3 {
            let d = direction.component(a) as i64;
            if d == 0 {
                continue;
            }
            if a >= self.config.ndims {
                return None;
            }
            let nblocks = self.config.blocks[a] as i64;
            let mut nb = block[a] as i64 + d;
            if nb < 0 || nb >= nblocks {
                if !self.config.periodic[a] {
                    return None;
                }
                nb = nb.rem_euclid(nblocks);
                shift[a] = -(d as f64) * self.global_length(a);
            }
            block[a] = nb as usize;
        }
        Some(Neighbor {
            rank: self.rank_of(block),
            direction,
            shift,
        })
    }

    /// All realizable neighbour links, in lexicographic direction order.
    pub fn neighbors(&self) -> Vec<Neighbor> {
        if self.config.ghost_width == 0 {
            return Vec::new();
        }
        Direction::all(self.config.ndims)
            .into_iter()
            .filter_map(|d| self.neighbor(d))
            .collect()
    }

    /// Index range whose particles are sent across `direction`: the local
    /// boundary slab facing the neighbour plus the ghost slab beyond it on
    /// every nonzero axis, the full local range on zero axes.
    pub fn send_range(&self, direction: Direction) -> IndexBox {
        let g = self.config.ghost_width as i64;
        let mut out = self.local;
        for a in 0..3 {
            match direction.component(a) {
                1 => {
                    out.lo[a] = self.local.hi[a] - g;
                    out.hi[a] = self.local.hi[a] + g;
                }
                -1 => {
                    out.lo[a] = self.local.lo[a] - g;
                    out.hi[a] = self.local.lo[a] + g;
                }
                _ => {}
            }
        }
        out
    }

    fn classify(&self, c: [i64; 3]) -> Option<Zone> {
        if !self.memory.contains(c) {
            return None;
        }
        if !self.local.contains(c) {
            return Some(Zone::Ghost);
        }
        let g = self.config.ghost_width as i64;
        let near_interface = (0..3).any(|a| {
            (self.halo_sides[a][0] && c[a] < self.local.lo[a] + g)
                || (self.halo_sides[a][1] && c[a] >= self.local.hi[a] - g)
        });
        Some(if near_interface { Zone::Boundary } else { Zone::Center })
    }

    /// Zone of a key's cell; `None` outside the memory box.
    pub fn zone_of(&self, key: EntityKey) -> Option<Zone> {
        self.classify(key.coord())
    }

    /// Cell keys of one zone, row-major.
    #[inline]
    pub fn zone_keys(&self, zone: Zone) -> &[EntityKey] {
        &self.zones[zone.slot()]
    }

    pub fn for_each_boundary<F: FnMut(&[EntityKey])>(&self, mut f: F) {
        f(self.zone_keys(Zone::Boundary))
    }

    pub fn for_each_ghost<F: FnMut(&[EntityKey])>(&self, mut f: F) {
        f(self.zone_keys(Zone::Ghost))
    }

    pub fn for_each_center<F: FnMut(&[EntityKey])>(&self, mut f: F) {
        f(self.zone_keys(Zone::Center))
    }

    /// Key of the cell containing physical point `x`.
    ///
    /// # Errors
    /// `Configuration` for non-finite coordinates or cells beyond the codec
    /// range.
    pub fn id(&self, x: [f64; 3]) -> Result<EntityKey, MeshPicError> {
        let mut c = [0i64; 3];
        for a in 0..self.config.ndims {
            if !x[a].is_finite() {
                return Err(MeshPicError::Configuration(format!(
                    "non-finite coordinate {} on axis {a}",
                    x[a]
                )));
            }
            c[a] = ((x[a] - self.config.origin[a]) / self.config.dx[a]).floor() as i64;
        }
        EntityKey::cell(c)
    }

    /// Physical location of an entity: cell corner for vertices, shifted by
    /// half a cell along each axis the entity extends over.
    pub fn point(&self, key: EntityKey) -> [f64; 3] {
        let (c, tag) = key.decode();
        let mut x = self.config.origin;
        for a in 0..self.config.ndims {
            let half = ((tag.bits() >> a) & 1) as f64 * 0.5;
            x[a] += (c[a] as f64 + half) * self.config.dx[a];
        }
        x
    }

    /// Physical `(lower, upper)` corners of a key's cell.
    pub fn cell_extent(&self, key: EntityKey) -> ([f64; 3], [f64; 3]) {
        let c = key.coord();
        let mut lo = self.config.origin;
        let mut hi = self.config.origin;
        for a in 0..self.config.ndims {
            lo[a] += c[a] as f64 * self.config.dx[a];
            hi[a] = lo[a] + self.config.dx[a];
        }
        (lo, hi)
    }

    /// Dense offset of a key's cell within the memory box.
    pub fn memory_offset(&self, key: EntityKey) -> Option<usize> {
        key.hash(self.memory.lo, self.memory.extent(), [false; 3])
    }
}
