//! The distributed node table.
//!
//! Nodes carry a globally unique id, an owning rank, coordinates, the
//! metric tensor (with its matrix log cached), an age counter and optional
//! auxiliary scalars. Local slots are recycled through a free list; the
//! global id space is shared across ranks and repaired collectively by
//! [`NodeTable::synchronize_globals`] after operator passes retire and
//! mint ids.

use smallvec::SmallVec;

use crate::comm::{Comm, Word};
use crate::error::{Error, Result};
use crate::geometry;
use crate::metric::{self, SymTensor};

pub type Global = i64;

/// Which edge-length formula [`crate::measure::MetricMeasure::ratio`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatioMethod {
    /// Closed-form log-Euclidean interpolation.
    #[default]
    Geometric,
    /// Midpoint quadrature of √(dᵀM(s)d) along the segment.
    Quadrature,
}

/// Which element quality definition is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityMethod {
    /// Pre-scale by the minimum metric determinant over the corners.
    #[default]
    Epic,
    /// Map corners by the Cholesky factor of the log-average metric and
    /// measure in Euclidean space.
    Jac,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub global: Global,
    pub part: usize,
    pub age: i32,
    pub xyz: [f64; 3],
    pub(crate) metric: SymTensor,
    pub(crate) log_metric: SymTensor,
    pub aux: SmallVec<[f64; 4]>,
}

/// Node storage plus the shared-id machinery of one rank.
#[derive(Debug)]
pub struct NodeTable {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    n: usize,
    /// (global, local) pairs ordered by global.
    sorted: Vec<(Global, usize)>,
    /// Retired globals awaiting collective elimination, kept sorted.
    unused: Vec<Global>,
    old_n_global: Global,
    new_n_global: Global,
    naux: usize,
    rank: usize,

    pub ratio_method: RatioMethod,
    pub quality_method: QualityMethod,
    pub min_volume: f64,
    pub min_uv_area: f64,
    pub same_normal_tol: f64,
}

impl NodeTable {
    pub fn new(rank: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            n: 0,
            sorted: Vec::new(),
            unused: Vec::new(),
            old_n_global: 0,
            new_n_global: 0,
            naux: 0,
            rank,
            ratio_method: RatioMethod::default(),
            quality_method: QualityMethod::default(),
            min_volume: 1.0e-15,
            min_uv_area: 0.0,
            same_normal_tol: 1.0 - 1.0e-8,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Upper bound over local indices, blanks included.
    pub fn max(&self) -> usize {
        self.slots.len()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn naux(&self) -> usize {
        self.naux
    }

    pub fn set_naux(&mut self, naux: usize) {
        self.naux = naux;
        for node in self.slots.iter_mut().flatten() {
            node.aux.resize(naux, 0.0);
        }
    }

    pub fn valid(&self, local: usize) -> bool {
        self.slots.get(local).is_some_and(Option::is_some)
    }

    /// Panics on a blank slot; using a retired local is a programmer error.
    pub fn node(&self, local: usize) -> &Node {
        self.slots[local].as_ref().expect("blank node slot")
    }

    pub fn node_mut(&mut self, local: usize) -> &mut Node {
        self.slots[local].as_mut().expect("blank node slot")
    }

    pub fn try_node(&self, local: usize) -> Option<&Node> {
        self.slots.get(local)?.as_ref()
    }

    pub fn xyz(&self, local: usize) -> &[f64; 3] {
        &self.node(local).xyz
    }

    pub fn global(&self, local: usize) -> Global {
        self.node(local).global
    }

    pub fn part(&self, local: usize) -> usize {
        self.node(local).part
    }

    pub fn owned(&self, local: usize) -> bool {
        self.node(local).part == self.rank
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(local, slot)| slot.as_ref().map(|node| (local, node)))
    }

    /// Valid local indices, ascending.
    pub fn locals(&self) -> Vec<usize> {
        self.iter().map(|(local, _)| local).collect()
    }

    // --- creation and removal ---

    /// Insert a node for `global`, or hand back the existing local.
    pub fn add(&mut self, global: Global) -> Result<usize> {
        if global < 0 {
            return Err(Error::Invalid("node global id must be non-negative"));
        }
        if let Some(local) = self.local(global) {
            return Ok(local);
        }
        let node = Node {
            global,
            part: self.rank,
            age: 0,
            xyz: [0.0; 3],
            metric: SymTensor::identity(),
            log_metric: SymTensor::identity().log().expect("identity is SPD"),
            aux: SmallVec::from_elem(0.0, self.naux),
        };
        let local = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        let at = self.sorted.partition_point(|&(g, _)| g < global);
        self.sorted.insert(at, (global, local));
        self.n += 1;
        Ok(local)
    }

    /// Deduplicated bulk insert; already-present globals are left alone.
    pub fn add_many(&mut self, globals: &[Global]) -> Result<()> {
        for &global in globals {
            self.add(global)?;
        }
        Ok(())
    }

    /// Retire a node and queue its global for collective elimination.
    pub fn remove(&mut self, local: usize) -> Result<()> {
        let global = self.remove_core(local)?;
        let at = self.unused.partition_point(|&g| g < global);
        self.unused.insert(at, global);
        Ok(())
    }

    /// Retire a local copy whose global lives on elsewhere (migration).
    pub fn remove_without_global(&mut self, local: usize) -> Result<()> {
        self.remove_core(local)?;
        Ok(())
    }

    fn remove_core(&mut self, local: usize) -> Result<Global> {
        let Some(node) = self.slots.get_mut(local).and_then(Option::take) else {
            return Err(Error::Invalid("remove of a blank node"));
        };
        let at = self
            .sorted
            .binary_search_by_key(&node.global, |&(g, _)| g)
            .map_err(|_| Error::Failure("sorted globals out of step with slots"))?;
        self.sorted.remove(at);
        self.free.push(local);
        self.n -= 1;
        Ok(node.global)
    }

    pub fn local(&self, global: Global) -> Option<usize> {
        self.sorted
            .binary_search_by_key(&global, |&(g, _)| g)
            .ok()
            .map(|at| self.sorted[at].1)
    }

    pub fn rebuild_sorted_global(&mut self) {
        self.sorted = self
            .iter()
            .map(|(local, node)| (node.global, local))
            .collect();
        self.sorted.sort_unstable();
    }

    // --- the shared global id space ---

    pub fn initialize_n_global(&mut self, n_global: Global) {
        self.old_n_global = n_global;
        self.new_n_global = n_global;
    }

    /// Count of globals in the synchronized numbering.
    pub fn n_global(&self) -> Global {
        self.old_n_global
    }

    /// Mint a global id: recycle the largest retired one, else extend.
    pub fn next_global(&mut self) -> Global {
        if let Some(global) = self.unused.pop() {
            return global;
        }
        let global = self.new_n_global;
        self.new_n_global += 1;
        global
    }

    pub fn n_unused(&self) -> usize {
        self.unused.len()
    }

    /// Make the global numbering dense and identical on every rank:
    /// shift this pass's new ids above other ranks' and collapse retired
    /// ids out of the numbering. Collective; idempotent when nothing
    /// changed.
    pub fn synchronize_globals(&mut self, comm: &Comm) -> Result<()> {
        self.shift_new_globals(comm)?;
        self.eliminate_unused_globals(comm)?;
        Ok(())
    }

    fn shift_new_globals(&mut self, comm: &Comm) -> Result<()> {
        let new_nodes = self.new_n_global - self.old_n_global;
        let everyones: Vec<Global> = comm.allgather(&[new_nodes])?;
        let offset: Global = everyones[..comm.rank()].iter().sum();
        let total_new: Global = everyones.iter().sum();

        if offset != 0 {
            let threshold = self.old_n_global;
            for node in self.slots.iter_mut().flatten() {
                if node.global >= threshold {
                    node.global += offset;
                }
            }
            for entry in self.sorted.iter_mut().rev() {
                if entry.0 < threshold {
                    break;
                }
                entry.0 += offset;
            }
            for global in self.unused.iter_mut() {
                if *global >= threshold {
                    *global += offset;
                }
            }
        }
        self.initialize_n_global(self.old_n_global + total_new);
        Ok(())
    }

    fn eliminate_unused_globals(&mut self, comm: &Comm) -> Result<()> {
        let (mut all_unused, _) = comm.allgatherv(&self.unused)?;
        all_unused.sort_unstable();
        let total_unused = all_unused.len() as Global;
        if total_unused == 0 {
            return Ok(());
        }
        self.unused.clear();

        // shift every surviving global down by the retired ids below it
        let mut offset = 0usize;
        for entry in self.sorted.iter_mut() {
            while offset < all_unused.len() && all_unused[offset] < entry.0 {
                offset += 1;
            }
            entry.0 -= offset as Global;
        }
        for &(global, local) in &self.sorted {
            self.slots[local].as_mut().expect("sorted lists blanks").global = global;
        }
        self.initialize_n_global(self.old_n_global - total_unused);
        Ok(())
    }

    /// Renumber globals densely by ownership order across ranks.
    pub fn implicit_global_from_local(&mut self, comm: &Comm) -> Result<()> {
        self.synchronize_globals(comm)?;
        let owned: Global = self.iter().filter(|(l, _)| self.owned(*l)).count() as Global;
        let everyones: Vec<Global> = comm.allgather(&[owned])?;
        let offset: Global = everyones[..comm.rank()].iter().sum();

        let mut fresh = vec![0 as Global; self.max()];
        let mut count = 0;
        for local in self.locals() {
            if self.owned(local) {
                fresh[local] = offset + count;
                count += 1;
            }
        }
        self.ghost(comm, &mut fresh, 1)?;
        for local in self.locals() {
            self.node_mut(local).global = fresh[local];
        }
        self.rebuild_sorted_global();
        self.initialize_n_global(everyones.iter().sum());
        Ok(())
    }

    // --- metric storage ---

    pub fn metric(&self, local: usize) -> SymTensor {
        self.node(local).metric
    }

    pub fn log_metric(&self, local: usize) -> SymTensor {
        self.node(local).log_metric
    }

    /// Store M and refresh the cached log M.
    pub fn metric_set(&mut self, local: usize, m: SymTensor) -> Result<()> {
        let log = m.log()?;
        let node = self.node_mut(local);
        node.metric = m;
        node.log_metric = log;
        Ok(())
    }

    /// Store log M and refresh M by exponentiation.
    pub fn metric_set_log(&mut self, local: usize, log: SymTensor) {
        let node = self.node_mut(local);
        node.log_metric = log;
        node.metric = log.exp();
    }

    pub fn metric_form(
        &mut self,
        local: usize,
        m11: f64,
        m12: f64,
        m13: f64,
        m22: f64,
        m23: f64,
        m33: f64,
    ) -> Result<()> {
        self.metric_set(local, SymTensor([m11, m12, m13, m22, m23, m33]))
    }

    // --- interpolation ---

    /// Place `new_local` on edge `(node0, node1)`: coordinates and aux
    /// linear, metric log-Euclidean at weight `w1` toward `node1`.
    pub fn interpolate_edge(
        &mut self,
        node0: usize,
        node1: usize,
        w1: f64,
        new_local: usize,
    ) -> Result<()> {
        if !self.valid(node0) || !self.valid(node1) {
            return Err(Error::Invalid("interpolate between invalid nodes"));
        }
        let w0 = 1.0 - w1;
        let (xyz0, xyz1) = (self.node(node0).xyz, self.node(node1).xyz);
        let mut xyz = [0.0; 3];
        for i in 0..3 {
            xyz[i] = w0 * xyz0[i] + w1 * xyz1[i];
        }
        let aux: SmallVec<[f64; 4]> = self
            .node(node0)
            .aux
            .iter()
            .zip(&self.node(node1).aux)
            .map(|(a, b)| w0 * a + w1 * b)
            .collect();
        let log = metric::weight(&self.log_metric(node0), &self.log_metric(node1), w1);

        let node = self.node_mut(new_local);
        node.xyz = xyz;
        node.aux = aux;
        self.metric_set_log(new_local, log);
        Ok(())
    }

    /// Place `new_local` at the centroid of a triangle of nodes.
    pub fn interpolate_face(
        &mut self,
        node0: usize,
        node1: usize,
        node2: usize,
        new_local: usize,
    ) -> Result<()> {
        if !self.valid(node0) || !self.valid(node1) || !self.valid(node2) {
            return Err(Error::Invalid("interpolate between invalid nodes"));
        }
        let mut xyz = [0.0; 3];
        for i in 0..3 {
            xyz[i] = (self.node(node0).xyz[i] + self.node(node1).xyz[i] + self.node(node2).xyz[i])
                / 3.0;
        }
        let aux: SmallVec<[f64; 4]> = (0..self.naux)
            .map(|i| {
                (self.node(node0).aux[i] + self.node(node1).aux[i] + self.node(node2).aux[i]) / 3.0
            })
            .collect();
        let log = metric::average_log(&[
            self.log_metric(node0),
            self.log_metric(node1),
            self.log_metric(node2),
        ]);

        let node = self.node_mut(new_local);
        node.xyz = xyz;
        node.aux = aux;
        self.metric_set_log(new_local, log);
        Ok(())
    }

    // --- ghost exchange ---

    /// Refresh coordinates, metric and aux of every ghost from its owner.
    pub fn ghost_real(&mut self, comm: &Comm) -> Result<()> {
        if !comm.para() {
            return Ok(());
        }
        let ldim = 15 + self.naux;
        let mut reals = vec![0.0f64; ldim * self.max()];
        for (local, node) in self.iter() {
            let row = &mut reals[ldim * local..ldim * (local + 1)];
            row[..3].copy_from_slice(&node.xyz);
            row[3..9].copy_from_slice(&node.metric.0);
            row[9..15].copy_from_slice(&node.log_metric.0);
            row[15..].copy_from_slice(&node.aux);
        }
        self.ghost(comm, &mut reals, ldim)?;
        for local in self.locals() {
            if self.owned(local) {
                continue;
            }
            let row: Vec<f64> = reals[ldim * local..ldim * (local + 1)].to_vec();
            let node = self.node_mut(local);
            node.xyz.copy_from_slice(&row[..3]);
            node.metric = SymTensor(row[3..9].try_into().expect("metric width"));
            node.log_metric = SymTensor(row[9..15].try_into().expect("metric width"));
            node.aux.copy_from_slice(&row[15..]);
        }
        Ok(())
    }

    /// Overwrite the ghost rows of `vector` (ldim entries per local) with
    /// the owner's rows. Two-step all-to-all-v: ghost holders announce the
    /// globals they need, owners answer with data. Splits component-wise
    /// when the flat buffer would overflow an i32 count.
    pub fn ghost<T: Word>(&self, comm: &Comm, vector: &mut [T], ldim: usize) -> Result<()> {
        if !comm.para() {
            return Ok(());
        }
        if vector.len() < ldim * self.max() {
            return Err(Error::IncreaseLimit("ghost vector shorter than ldim*max"));
        }
        let mut a_size = vec![0usize; comm.size()];
        for (_, node) in self.iter() {
            if node.part != self.rank {
                a_size[node.part] += 1;
            }
        }
        let b_size: Vec<usize> = {
            let sent: Vec<i64> = a_size.iter().map(|&n| n as i64).collect();
            comm.alltoall(&sent)?.into_iter().map(|n| n as usize).collect()
        };

        let a_total: usize = a_size.iter().sum();
        let b_total: usize = b_size.iter().sum();

        let mut a_next = vec![0usize; comm.size()];
        for part in 1..comm.size() {
            a_next[part] = a_next[part - 1] + a_size[part - 1];
        }
        let mut a_global = vec![0 as Global; a_total];
        let mut a_local = vec![0usize; a_total];
        for (local, node) in self.iter() {
            if node.part != self.rank {
                a_global[a_next[node.part]] = node.global;
                a_local[a_next[node.part]] = local;
                a_next[node.part] += 1;
            }
        }
        let b_global = comm.alltoallv(&a_global, &a_size, &b_size, 1)?;

        let chunks = if ldim * a_total.max(b_total) < i32::MAX as usize {
            vec![(0, ldim)]
        } else {
            (0..ldim).map(|i| (i, 1)).collect()
        };
        for &(first, width) in &chunks {
            let mut b_vector = vec![T::default(); width * b_total];
            for (row, &global) in b_global.iter().enumerate() {
                let local = self
                    .local(global)
                    .ok_or(Error::Failure("ghost request for unknown global"))?;
                for i in 0..width {
                    b_vector[i + width * row] = vector[first + i + ldim * local];
                }
            }
            let a_vector = comm.alltoallv(&b_vector, &b_size, &a_size, width)?;
            for (row, &local) in a_local.iter().enumerate() {
                for i in 0..width {
                    vector[first + i + ldim * local] = a_vector[i + width * row];
                }
            }
        }
        Ok(())
    }

    /// Fold ghost copies' age into the owned node and reset the ghosts,
    /// so the owner sees how often any rank was blocked near the node.
    pub fn collect_ghost_age(&mut self, comm: &Comm) -> Result<()> {
        if !comm.para() {
            return Ok(());
        }
        let mut a_size = vec![0usize; comm.size()];
        for (_, node) in self.iter() {
            if node.part != self.rank && node.age != 0 {
                a_size[node.part] += 1;
            }
        }
        let b_size: Vec<usize> = {
            let sent: Vec<i64> = a_size.iter().map(|&n| n as i64).collect();
            comm.alltoall(&sent)?.into_iter().map(|n| n as usize).collect()
        };
        let mut a_next = vec![0usize; comm.size()];
        for part in 1..comm.size() {
            a_next[part] = a_next[part - 1] + a_size[part - 1];
        }
        let a_total: usize = a_size.iter().sum();
        let mut a_pairs = vec![0 as Global; 2 * a_total];
        let rank = self.rank;
        for local in self.locals() {
            let node = self.node_mut(local);
            if node.part != rank && node.age != 0 {
                let at = a_next[node.part];
                a_pairs[2 * at] = node.global;
                a_pairs[1 + 2 * at] = node.age as Global;
                a_next[node.part] = at + 1;
                node.age = 0;
            }
        }
        let b_pairs = comm.alltoallv(&a_pairs, &a_size, &b_size, 2)?;
        for pair in b_pairs.chunks_exact(2) {
            let local = self
                .local(pair[0])
                .ok_or(Error::Failure("ghost age for unknown global"))?;
            self.node_mut(local).age += pair[1] as i32;
        }
        Ok(())
    }

    // --- compaction ---

    /// Old-to-new and new-to-old maps over valid slots, creation order.
    pub fn compact(&self) -> (Vec<Option<usize>>, Vec<usize>) {
        let mut o2n = vec![None; self.max()];
        let mut n2o = Vec::with_capacity(self.n);
        for (local, _) in self.iter() {
            o2n[local] = Some(n2o.len());
            n2o.push(local);
        }
        (o2n, n2o)
    }

    /// Drop blank slots, renumbering locals to the compact order.
    pub fn pack(&mut self) -> (Vec<Option<usize>>, Vec<usize>) {
        let (o2n, n2o) = self.compact();
        let mut slots = Vec::with_capacity(n2o.len());
        for &old in &n2o {
            slots.push(self.slots[old].take());
        }
        self.slots = slots;
        self.free.clear();
        self.rebuild_sorted_global();
        (o2n, n2o)
    }

    // --- geometric wrappers ---

    fn pt(&self, local: usize) -> &[f64; 3] {
        &self.node(local).xyz
    }

    pub fn tet_vol(&self, nodes: &[usize; 4]) -> Result<f64> {
        if nodes.iter().any(|&n| !self.valid(n)) {
            return Err(Error::Invalid("tet_vol of invalid node"));
        }
        Ok(geometry::tet_vol(
            self.pt(nodes[0]),
            self.pt(nodes[1]),
            self.pt(nodes[2]),
            self.pt(nodes[3]),
        ))
    }

    pub fn tet_dvol_dnode0(&self, nodes: &[usize; 4]) -> Result<(f64, [f64; 3])> {
        if nodes.iter().any(|&n| !self.valid(n)) {
            return Err(Error::Invalid("tet_vol of invalid node"));
        }
        Ok(geometry::tet_dvol_dnode0(
            self.pt(nodes[0]),
            self.pt(nodes[1]),
            self.pt(nodes[2]),
            self.pt(nodes[3]),
        ))
    }

    pub fn tri_normal(&self, nodes: &[usize; 3]) -> Result<[f64; 3]> {
        if nodes.iter().any(|&n| !self.valid(n)) {
            return Err(Error::Invalid("tri_normal of invalid node"));
        }
        Ok(geometry::tri_normal(
            self.pt(nodes[0]),
            self.pt(nodes[1]),
            self.pt(nodes[2]),
        ))
    }

    pub fn tri_area(&self, nodes: &[usize; 3]) -> Result<f64> {
        Ok(0.5 * geometry::norm(&self.tri_normal(nodes)?))
    }

    pub fn tri_centroid(&self, nodes: &[usize; 3]) -> Result<[f64; 3]> {
        if nodes.iter().any(|&n| !self.valid(n)) {
            return Err(Error::Invalid("tri_centroid of invalid node"));
        }
        Ok(geometry::tri_centroid(
            self.pt(nodes[0]),
            self.pt(nodes[1]),
            self.pt(nodes[2]),
        ))
    }

    pub fn seg_normal(&self, nodes: &[usize; 2]) -> Result<[f64; 3]> {
        if nodes.iter().any(|&n| !self.valid(n)) {
            return Err(Error::Invalid("seg_normal of invalid node"));
        }
        geometry::seg_normal(self.pt(nodes[0]), self.pt(nodes[1]))
    }

    /// Positive-orientation check for extruded-2D triangles.
    pub fn tri_twod_orientation(&self, nodes: &[usize; 3]) -> Result<bool> {
        Ok(self.tri_normal(nodes)?[2] > 0.0)
    }

    pub fn bary3(&self, nodes: &[usize; 3], xyz: &[f64; 3]) -> Result<[f64; 3]> {
        geometry::bary3(self.pt(nodes[0]), self.pt(nodes[1]), self.pt(nodes[2]), xyz)
    }

    pub fn bary3d(&self, nodes: &[usize; 3], xyz: &[f64; 3]) -> Result<[f64; 3]> {
        geometry::bary3d(self.pt(nodes[0]), self.pt(nodes[1]), self.pt(nodes[2]), xyz)
    }

    pub fn bary4(&self, nodes: &[usize; 4], xyz: &[f64; 3]) -> (bool, [f64; 4]) {
        geometry::bary4(
            self.pt(nodes[0]),
            self.pt(nodes[1]),
            self.pt(nodes[2]),
            self.pt(nodes[3]),
            xyz,
        )
    }

    /// Diagonal of the axis box around all local nodes (collective).
    pub fn bounding_box_diagonal(&self, comm: &Comm) -> Result<f64> {
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for (_, node) in self.iter() {
            for i in 0..3 {
                lo[i] = lo[i].min(node.xyz[i]);
                hi[i] = hi[i].max(node.xyz[i]);
            }
        }
        let mut d2 = 0.0;
        for i in 0..3 {
            let lo = comm.min(lo[i])?;
            let hi = comm.max(hi[i])?;
            d2 += (hi - lo) * (hi - lo);
        }
        Ok(d2.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::thread;

    fn table_with(globals: &[Global]) -> NodeTable {
        let mut nodes = NodeTable::new(0);
        nodes.add_many(globals).unwrap();
        nodes.initialize_n_global(globals.len() as Global);
        nodes
    }

    #[test]
    fn test_add_is_idempotent_per_global() {
        let mut nodes = NodeTable::new(0);
        let a = nodes.add(10).unwrap();
        let b = nodes.add(10).unwrap();
        assert_eq!(a, b);
        assert_eq!(nodes.n(), 1);
    }

    #[test]
    fn test_add_negative_global_invalid() {
        let mut nodes = NodeTable::new(0);
        assert!(nodes.add(-1).is_err());
    }

    #[test]
    fn test_remove_blank_invalid() {
        let mut nodes = table_with(&[0, 1]);
        nodes.remove(0).unwrap();
        assert!(nodes.remove(0).is_err());
        assert!(nodes.local(0).is_none());
        assert_eq!(nodes.n(), 1);
    }

    #[test]
    fn test_slot_reuse_is_lifo() {
        let mut nodes = table_with(&[0, 1, 2]);
        nodes.remove(1).unwrap();
        let local = nodes.add(7).unwrap();
        assert_eq!(local, 1);
    }

    #[test]
    fn test_sorted_global_invariant() {
        let mut nodes = NodeTable::new(0);
        for global in [5, 1, 9, 3] {
            nodes.add(global).unwrap();
        }
        nodes.remove(nodes.local(9).unwrap()).unwrap();
        for (local, node) in nodes.iter() {
            assert_eq!(nodes.local(node.global), Some(local));
        }
    }

    #[test]
    fn test_next_global_recycles_then_extends() {
        let mut nodes = table_with(&[0, 1, 2]);
        nodes.remove(nodes.local(1).unwrap()).unwrap();
        assert_eq!(nodes.next_global(), 1);
        assert_eq!(nodes.next_global(), 3);
        assert_eq!(nodes.next_global(), 4);
    }

    #[test]
    fn test_metric_round_trip() {
        let mut nodes = table_with(&[0]);
        nodes
            .metric_form(0, 4.0, 0.5, 0.0, 9.0, 0.0, 1.0)
            .unwrap();
        let back = nodes.log_metric(0).exp();
        for i in 0..6 {
            assert_abs_diff_eq!(back.0[i], nodes.metric(0).0[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_interpolate_edge_midpoint() {
        let mut nodes = table_with(&[0, 1, 2]);
        nodes.node_mut(0).xyz = [0.0, 0.0, 0.0];
        nodes.node_mut(1).xyz = [1.0, 2.0, 4.0];
        nodes.metric_set(0, SymTensor::from_h(0.1)).unwrap();
        nodes.metric_set(1, SymTensor::from_h(10.0)).unwrap();
        nodes.interpolate_edge(0, 1, 0.5, 2).unwrap();
        assert_eq!(nodes.xyz(2), &[0.5, 1.0, 2.0]);
        // log-Euclidean midpoint of h=0.1 and h=10 is h=1
        assert_abs_diff_eq!(nodes.metric(2).0[0], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_interpolate_face_centroid() {
        let mut nodes = table_with(&[0, 1, 2, 3]);
        nodes.node_mut(0).xyz = [0.0, 0.0, 0.0];
        nodes.node_mut(1).xyz = [3.0, 0.0, 0.0];
        nodes.node_mut(2).xyz = [0.0, 3.0, 0.0];
        nodes.metric_set(0, SymTensor::from_h(0.1)).unwrap();
        nodes.metric_set(1, SymTensor::from_h(10.0)).unwrap();
        nodes.interpolate_face(0, 1, 2, 3).unwrap();
        assert_eq!(nodes.xyz(3), &[1.0, 1.0, 0.0]);
        // log-average of h = 0.1, 10 and 1 is h = 1
        assert_abs_diff_eq!(nodes.metric(3).0[0], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_implicit_global_from_local_densifies() {
        let comm = Comm::solo();
        let mut nodes = NodeTable::new(0);
        for global in [4, 9, 17] {
            nodes.add(global).unwrap();
        }
        nodes.initialize_n_global(18);
        nodes.implicit_global_from_local(&comm).unwrap();
        assert_eq!(nodes.n_global(), 3);
        let mut globals: Vec<Global> = nodes.iter().map(|(_, node)| node.global).collect();
        globals.sort_unstable();
        assert_eq!(globals, vec![0, 1, 2]);
    }

    #[test]
    fn test_synchronize_globals_shifts_and_eliminates() {
        let comms = Comm::threads(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    // globals 0..6 split three per rank, all owned locally
                    let mine: Vec<Global> = if comm.rank() == 0 {
                        vec![0, 1, 2]
                    } else {
                        vec![3, 4, 5]
                    };
                    let mut nodes = NodeTable::new(comm.rank());
                    nodes.add_many(&mine).unwrap();
                    nodes.initialize_n_global(6);

                    if comm.rank() == 0 {
                        // retire global 1, mint one new local global
                        nodes.remove(nodes.local(1).unwrap()).unwrap();
                        let g = nodes.next_global();
                        assert_eq!(g, 1); // recycled before synchronize
                        nodes.add(g).unwrap();
                    } else {
                        let g = nodes.next_global();
                        assert_eq!(g, 6);
                        nodes.add(g).unwrap();
                    }
                    nodes.synchronize_globals(&comm).unwrap();

                    // rank 0 minted nothing beyond the recycled id, rank 1
                    // minted one: total is 6 + 1 new - 0 eliminated = 7
                    assert_eq!(nodes.n_global(), 7);
                    assert_eq!(nodes.n_unused(), 0);

                    // idempotent
                    let before: Vec<(Global, usize)> = nodes
                        .iter()
                        .map(|(local, node)| (node.global, local))
                        .collect();
                    nodes.synchronize_globals(&comm).unwrap();
                    let after: Vec<(Global, usize)> = nodes
                        .iter()
                        .map(|(local, node)| (node.global, local))
                        .collect();
                    assert_eq!(before, after);
                    assert_eq!(nodes.n_global(), 7);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_synchronize_globals_dense_after_elimination() {
        let comm = Comm::solo();
        let mut nodes = table_with(&[0, 1, 2, 3, 4]);
        nodes.remove(nodes.local(1).unwrap()).unwrap();
        nodes.remove(nodes.local(3).unwrap()).unwrap();
        nodes.synchronize_globals(&comm).unwrap();
        assert_eq!(nodes.n_global(), 3);
        let mut globals: Vec<Global> = nodes.iter().map(|(_, node)| node.global).collect();
        globals.sort_unstable();
        assert_eq!(globals, vec![0, 1, 2]);
    }

    #[test]
    fn test_ghost_real_refreshes_ghost_copies() {
        let comms = Comm::threads(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    // node 0 owned by rank 0, node 1 owned by rank 1,
                    // each rank ghosts the other's node
                    let mut nodes = NodeTable::new(comm.rank());
                    nodes.add_many(&[0, 1]).unwrap();
                    nodes.initialize_n_global(2);
                    nodes.node_mut(0).part = 0;
                    nodes.node_mut(1).part = 1;
                    let mine = comm.rank();
                    nodes.node_mut(mine).xyz = [comm.rank() as f64 + 1.0; 3];
                    nodes
                        .metric_set(mine, SymTensor::from_h(comm.rank() as f64 + 1.0))
                        .unwrap();

                    nodes.ghost_real(&comm).unwrap();

                    assert_eq!(nodes.xyz(0), &[1.0, 1.0, 1.0]);
                    assert_eq!(nodes.xyz(1), &[2.0, 2.0, 2.0]);
                    assert_abs_diff_eq!(nodes.metric(1).0[0], 0.25, epsilon = 1e-12);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_collect_ghost_age() {
        let comms = Comm::threads(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut nodes = NodeTable::new(comm.rank());
                    nodes.add_many(&[0]).unwrap();
                    nodes.initialize_n_global(1);
                    nodes.node_mut(0).part = 0;
                    if comm.rank() == 1 {
                        nodes.node_mut(0).age = 3;
                    }
                    nodes.collect_ghost_age(&comm).unwrap();
                    if comm.rank() == 0 {
                        assert_eq!(nodes.node(0).age, 3);
                    } else {
                        assert_eq!(nodes.node(0).age, 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_pack_compacts_locals() {
        let mut nodes = table_with(&[0, 1, 2, 3]);
        nodes.remove(1).unwrap();
        let (o2n, n2o) = nodes.pack();
        assert_eq!(nodes.max(), 3);
        assert_eq!(n2o, vec![0, 2, 3]);
        assert_eq!(o2n[1], None);
        assert_eq!(o2n[2], Some(1));
        for (local, node) in nodes.iter() {
            assert_eq!(nodes.local(node.global), Some(local));
        }
    }
}
