//! Generic HNSW graph, monomorphized per [`DistanceSpace`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use crate::config::HnswConfig;
use crate::distance::DistanceSpace;
use crate::error::{Error, Result};
use crate::util::OrderedFloat;

/// A single node's per-level neighbor lists, together with its assigned
/// level. Guarded by one [`Mutex`] per node so the lists across all of a
/// node's levels are protected by a single lock, per the crate's
/// concurrency model.
struct NodeLinks {
    /// `neighbors[l]` holds this node's neighbor ids at level `l`, for
    /// `l` in `0..=level`.
    neighbors: Vec<Vec<u32>>,
}

impl NodeLinks {
    fn new(level: usize) -> Self {
        Self {
            neighbors: vec![Vec::new(); level + 1],
        }
    }

    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

struct GlobalState {
    entry_point: Option<u32>,
    max_level: usize,
}

/// One result of a [`Hnsw::search_knn`] call: a node id and its distance
/// to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Internal (dense) node id.
    pub id: u32,
    /// Squared L2 distance (or the space's analogous ordering scalar) to
    /// the query.
    pub distance: f32,
}

/// A hierarchical navigable small world graph over elements of `D::Elem`.
///
/// `D` is monomorphized at compile time (see `crate::distance`), so the
/// inner search loop never pays virtual-dispatch overhead.
pub struct Hnsw<D: DistanceSpace> {
    space: D,
    payloads: RwLock<Vec<D::Elem>>,
    labels: RwLock<Vec<u64>>,
    links: RwLock<Vec<Mutex<NodeLinks>>>,
    global: Mutex<GlobalState>,
    rng_state: AtomicU64,
    m: usize,
    m0: usize,
    ef_construction: usize,
    level_mult: f64,
}

impl<D: DistanceSpace> Hnsw<D> {
    /// Creates an empty graph with the given distance space and
    /// construction parameters.
    #[must_use]
    pub fn new(space: D, config: &HnswConfig) -> Self {
        let m = config.m;
        Self {
            space,
            payloads: RwLock::new(Vec::new()),
            labels: RwLock::new(Vec::new()),
            links: RwLock::new(Vec::new()),
            global: Mutex::new(GlobalState {
                entry_point: None,
                max_level: 0,
            }),
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            m,
            m0: m * 2,
            ef_construction: config.ef_construction,
            level_mult: 1.0 / (m as f64).ln(),
        }
    }

    /// Reconstructs a graph whose topology is already known (used by
    /// [`super::persistence`] on load): `payloads[i]` and `labels[i]` give
    /// node `i`'s stored element and external label; `neighbors[i][l]`
    /// gives node `i`'s neighbor list at level `l`.
    pub(super) fn from_parts(
        space: D,
        config: &HnswConfig,
        payloads: Vec<D::Elem>,
        labels: Vec<u64>,
        neighbors: Vec<Vec<Vec<u32>>>,
        entry_point: Option<u32>,
        max_level: usize,
    ) -> Self {
        let m = config.m;
        let links = neighbors
            .into_iter()
            .map(|levels| Mutex::new(NodeLinks { neighbors: levels }))
            .collect();
        Self {
            space,
            payloads: RwLock::new(payloads),
            labels: RwLock::new(labels),
            links: RwLock::new(links),
            global: Mutex::new(GlobalState {
                entry_point,
                max_level,
            }),
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            m,
            m0: m * 2,
            ef_construction: config.ef_construction,
            level_mult: 1.0 / (m as f64).ln(),
        }
    }

    /// Number of nodes currently in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.read().len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The distance space backing this graph.
    #[must_use]
    pub fn space(&self) -> &D {
        &self.space
    }

    /// Returns a clone of node `id`'s stored element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if `id` is out of range.
    pub fn element(&self, id: u32) -> Result<D::Elem> {
        self.payloads
            .read()
            .get(id as usize)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("hnsw node {id} does not exist")))
    }

    /// Returns node `id`'s external label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if `id` is out of range.
    pub fn label(&self, id: u32) -> Result<u64> {
        self.labels
            .read()
            .get(id as usize)
            .copied()
            .ok_or_else(|| Error::Invariant(format!("hnsw node {id} does not exist")))
    }

    /// Current entry point and max level, for persistence.
    pub(super) fn entry_state(&self) -> (Option<u32>, usize) {
        let global = self.global.lock();
        (global.entry_point, global.max_level)
    }

    /// Snapshots every node's level and per-level neighbor lists, in id
    /// order, for persistence.
    pub(super) fn snapshot_links(&self) -> Vec<Vec<Vec<u32>>> {
        self.links
            .read()
            .iter()
            .map(|lock| lock.lock().neighbors.clone())
            .collect()
    }

    /// Snapshots every node's payload and external label, in id order,
    /// for persistence.
    pub(super) fn snapshot_payloads(&self) -> (Vec<D::Elem>, Vec<u64>) {
        (self.payloads.read().clone(), self.labels.read().clone())
    }

    /// Inserts `element` with an external label equal to its internal id,
    /// returning that id.
    pub fn add_point(&self, element: D::Elem) -> u32 {
        let next_id = self.payloads.read().len() as u32;
        self.add_point_with_label(element, u64::from(next_id))
    }

    /// Inserts `element` with an explicit external `label`, returning the
    /// newly assigned internal id.
    pub fn add_point_with_label(&self, element: D::Elem, label: u64) -> u32 {
        let id = {
            let mut payloads = self.payloads.write();
            let mut labels = self.labels.write();
            let id = payloads.len() as u32;
            payloads.push(element.clone());
            labels.push(label);
            id
        };

        let level = self.random_level();
        {
            let mut links = self.links.write();
            debug_assert_eq!(links.len() as u32, id);
            links.push(Mutex::new(NodeLinks::new(level)));
        }

        let (entry_point, max_level) = {
            let global = self.global.lock();
            (global.entry_point, global.max_level)
        };

        if let Some(ep) = entry_point {
            let mut current_ep = ep;
            for layer in (level + 1..=max_level).rev() {
                current_ep = self.search_layer_single(&element, current_ep, layer);
            }

            // Link only through min(level, max_level): layers above the
            // graph's current max_level have no other node yet, so the new
            // node's entry there is the promotion below, not a linking pass.
            for layer in (0..=level.min(max_level)).rev() {
                let candidates = self.search_layer(&element, &[current_ep], self.ef_construction, layer, None);
                let max_conn = if layer == 0 { self.m0 } else { self.m };
                let selected = self.select_neighbors(&candidates, max_conn);

                self.links.read()[id as usize].lock().neighbors[layer] = selected.clone();

                for &neighbor in &selected {
                    self.add_bidirectional_connection(id, neighbor, layer, max_conn);
                }

                if let Some(&(best_id, _)) = candidates.first() {
                    current_ep = best_id;
                }
            }
        } else {
            let mut global = self.global.lock();
            global.entry_point = Some(id);
        }

        if level > max_level {
            let mut global = self.global.lock();
            if level > global.max_level || global.entry_point.is_none() {
                global.max_level = level;
                global.entry_point = Some(id);
            }
        }

        id
    }

    /// Searches for the `k` nearest neighbors of `query`.
    ///
    /// `ef` is the dynamic candidate list size; if `ef < k` it is silently
    /// raised to `k`. Returns fewer than `k` results if the graph holds
    /// fewer than `k` nodes.
    #[must_use]
    pub fn search_knn(&self, query: &D::Elem, k: usize, ef: usize) -> Vec<SearchResult> {
        self.search_knn_filtered(query, k, ef, None)
    }

    /// As [`Self::search_knn`], but restricts the result set to ids in
    /// `allowed`. Used when this graph indexes a superset of the ids a
    /// caller is currently interested in (e.g. the coarse quantizer is
    /// queried in the context of a partial rebuild).
    #[must_use]
    pub fn search_knn_filtered(
        &self,
        query: &D::Elem,
        k: usize,
        ef: usize,
        allowed: Option<&FxHashSet<u32>>,
    ) -> Vec<SearchResult> {
        let ef = ef.max(k);

        let (entry_point, max_level) = {
            let global = self.global.lock();
            (global.entry_point, global.max_level)
        };
        let Some(ep) = entry_point else {
            return Vec::new();
        };

        let mut current_ep = ep;
        for layer in (1..=max_level).rev() {
            current_ep = self.search_layer_single(query, current_ep, layer);
        }

        let candidates = self.search_layer(query, &[current_ep], ef, 0, allowed);
        candidates
            .into_iter()
            .take(k)
            .map(|(id, distance)| SearchResult { id, distance })
            .collect()
    }

    fn random_level(&self) -> usize {
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);

        let uniform = (state as f64) / (u64::MAX as f64);
        let level = (-uniform.ln() * self.level_mult).floor();
        if level.is_finite() {
            (level as usize).min(15)
        } else {
            0
        }
    }

    fn search_layer_single(&self, query: &D::Elem, entry: u32, layer: usize) -> u32 {
        let mut best = entry;
        let mut best_dist = self.space.distance(query, &self.element_unchecked(entry));

        loop {
            let neighbors = self.neighbors_at(best, layer);
            let mut improved = false;
            for neighbor in neighbors {
                let dist = self.space.distance(query, &self.element_unchecked(neighbor));
                if dist < best_dist {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        best
    }

    /// Bounded best-first search of one layer, starting from
    /// `entry_points`, keeping up to `ef` results.
    fn search_layer(
        &self,
        query: &D::Elem,
        entry_points: &[u32],
        ef: usize,
        layer: usize,
        allowed: Option<&FxHashSet<u32>>,
    ) -> Vec<(u32, f32)> {
        let mut visited: FxHashSet<u32> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, u32)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, u32)> = BinaryHeap::new();

        let payloads = self.payloads.read();

        let is_allowed = |id: u32| allowed.is_none_or(|set| set.contains(&id));

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            let dist = self.space.distance(query, &payloads[ep as usize]);
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            if is_allowed(ep) {
                results.push((OrderedFloat(dist), ep));
            }
        }

        while let Some(Reverse((OrderedFloat(c_dist), c_node))) = candidates.pop() {
            let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if c_dist > furthest && results.len() >= ef {
                break;
            }

            for neighbor in self.neighbors_at(c_node, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.space.distance(query, &payloads[neighbor as usize]);
                let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);

                if dist < furthest || results.len() < ef {
                    candidates.push(Reverse((OrderedFloat(dist), neighbor)));
                    if is_allowed(neighbor) {
                        results.push((OrderedFloat(dist), neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(u32, f32)> = results.into_iter().map(|(d, n)| (n, d.0)).collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        out
    }

    /// Diversity-preserving neighbor selection (§4.3): iterate candidates
    /// in increasing distance order, keep a candidate only if it is
    /// strictly closer to the query than to every neighbor already kept.
    /// If the quota isn't filled this way, pad with the closest remaining
    /// candidates so neighbor lists don't end up needlessly sparse.
    fn select_neighbors(&self, candidates: &[(u32, f32)], max_neighbors: usize) -> Vec<u32> {
        if candidates.len() <= max_neighbors {
            return candidates.iter().map(|&(id, _)| id).collect();
        }

        let mut selected: Vec<u32> = Vec::with_capacity(max_neighbors);
        let mut selected_elems: Vec<D::Elem> = Vec::with_capacity(max_neighbors);

        for &(id, dist_to_query) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let elem = self.element_unchecked(id);
            let diverse = selected_elems
                .iter()
                .all(|s| self.space.distance(&elem, s) > dist_to_query);
            if diverse || selected.is_empty() {
                selected.push(id);
                selected_elems.push(elem);
            }
        }

        if selected.len() < max_neighbors {
            for &(id, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&id) {
                    selected.push(id);
                }
            }
        }

        selected
    }

    /// Links `neighbor -> new_node` at `layer`, re-pruning `neighbor`'s list
    /// back down to `max_conn` via the same diversity-preserving heuristic
    /// (`select_neighbors`, §4.3) used for the new node's own forward links,
    /// if it overflows.
    ///
    /// Never holds two node locks at once: the new node's list is written
    /// by the caller before this runs, and here only `neighbor`'s lock is
    /// taken, so lock order reduces to "new node, then each neighbor in
    /// turn" without any pair held simultaneously.
    fn add_bidirectional_connection(&self, new_node: u32, neighbor: u32, layer: usize, max_conn: usize) {
        let links = self.links.read();
        let mut neighbor_links = links[neighbor as usize].lock();
        let list = &mut neighbor_links.neighbors[layer];

        if list.len() < max_conn {
            list.push(new_node);
            return;
        }

        let neighbor_elem = self.element_unchecked(neighbor);
        let mut all = list.clone();
        all.push(new_node);
        drop(list);

        let mut with_dist: Vec<(u32, f32)> = all
            .iter()
            .map(|&n| (n, self.space.distance(&neighbor_elem, &self.element_unchecked(n))))
            .collect();
        with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
        let pruned = self.select_neighbors(&with_dist, max_conn);

        neighbor_links.neighbors[layer] = pruned;
    }

    fn neighbors_at(&self, node: u32, layer: usize) -> Vec<u32> {
        let links = self.links.read();
        let node_links = links[node as usize].lock();
        if layer <= node_links.level() {
            node_links.neighbors[layer].clone()
        } else {
            Vec::new()
        }
    }

    fn element_unchecked(&self, id: u32) -> D::Elem {
        self.payloads.read()[id as usize].clone()
    }
}
