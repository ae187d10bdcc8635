use std::collections::VecDeque;

use log::{debug, info};
use nalgebra::{Matrix3, UnitQuaternion};

use crate::analysis::structure::StructureAnalysis;
use crate::core::cluster::{ClusterGraph, ClusterId, TransitionId};
use crate::core::structures::structure_disorientation;

/// Angular tolerances (degrees) for grain growth and supergrain merging.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorParams {
    /// Two bonded atoms join the same cluster below this disorientation.
    pub misorientation_tolerance: f64,
    /// Two clusters fold into one supergrain below this disorientation.
    pub supergrain_tolerance: f64,
}

impl Default for ConnectorParams {
    fn default() -> Self {
        Self {
            misorientation_tolerance: 3.0,
            supergrain_tolerance: 8.0,
        }
    }
}

/// Groups structurally compatible atoms into clusters, connects adjacent
/// clusters with rotation transitions, and folds misorientation-compatible
/// clusters into supergrains.
pub struct ClusterConnector<'a> {
    sa: &'a mut StructureAnalysis,
    graph: &'a mut ClusterGraph,
    params: ConnectorParams,
}

impl<'a> ClusterConnector<'a> {
    pub fn new(
        sa: &'a mut StructureAnalysis,
        graph: &'a mut ClusterGraph,
        params: ConnectorParams,
    ) -> Self {
        Self { sa, graph, params }
    }

    /// Runs all connector phases in order.
    pub fn run(mut self) {
        self.build_clusters();
        self.connect_clusters();
        self.form_supergrains();

        let orientations: Vec<Matrix3<f64>> = self
            .graph
            .clusters()
            .iter()
            .map(|c| c.orientation)
            .collect();
        self.sa.assign_lattice_vectors(&orientations);

        info!(
            "cluster connector: {} clusters, {} transitions",
            self.graph.clusters().len() - 1,
            self.graph.transitions().len()
        );
    }

    /// Seed-and-grow phase: every unassigned crystalline atom starts a new
    /// cluster; a breadth-first flood joins orientation-compatible
    /// template neighbors.
    fn build_clusters(&mut self) {
        let atom_count = self.sa.atom_count();
        let mut queue = VecDeque::new();

        for seed in 0..atom_count {
            let structure = self.sa.structure_types[seed];
            if !structure.is_crystalline() || self.sa.atom_clusters[seed] != 0 {
                continue;
            }

            let cluster = self.graph.create_cluster(structure);
            {
                let c = self.graph.cluster_mut(cluster);
                c.orientation = self.sa.atom_rotation(seed) * self.sa.scales[seed];
                c.center_of_mass = self.sa.positions[seed];
            }
            self.sa.atom_clusters[seed] = cluster;
            let seed_pos = self.sa.positions[seed];
            let seed_orientation = self.sa.orientations[seed];
            let mut com_accum = seed_pos.coords;
            let mut atom_count_in_cluster = 1usize;

            queue.clear();
            queue.push_back(seed);
            while let Some(atom) = queue.pop_front() {
                for slot in 0..self.sa.number_of_neighbors(atom) {
                    let neighbor = self.sa.get_neighbor(atom, slot);
                    if self.sa.atom_clusters[neighbor] != 0 {
                        continue;
                    }
                    if self.sa.structure_types[neighbor] != structure {
                        continue;
                    }
                    let angle = structure_disorientation(
                        structure,
                        structure,
                        &self.sa.orientations[atom],
                        &self.sa.orientations[neighbor],
                    );
                    if angle > self.params.misorientation_tolerance {
                        continue;
                    }
                    // Guard against orientation drift: the bond-level test
                    // alone lets a gradual gradient chain two misoriented
                    // grains together; every member must also stay aligned
                    // with the cluster's reference orientation.
                    let drift = structure_disorientation(
                        structure,
                        structure,
                        &seed_orientation,
                        &self.sa.orientations[neighbor],
                    );
                    if drift > self.params.misorientation_tolerance {
                        continue;
                    }
                    self.sa.atom_clusters[neighbor] = cluster;
                    atom_count_in_cluster += 1;
                    let wrapped = seed_pos.coords
                        + self
                            .sa
                            .cell
                            .wrap_vector(&(self.sa.positions[neighbor] - seed_pos));
                    com_accum += wrapped;
                    queue.push_back(neighbor);
                }
            }

            let c = self.graph.cluster_mut(cluster);
            c.atom_count = atom_count_in_cluster;
            c.center_of_mass = (com_accum / atom_count_in_cluster as f64).into();
        }

        debug!(
            "cluster growth: {} clusters seeded",
            self.graph.clusters().len() - 1
        );
    }

    /// Records a distance-1 transition (weighted by interface bond count)
    /// for every bond crossing a cluster boundary, and gives every cluster
    /// its self-transition.
    fn connect_clusters(&mut self) {
        for cluster in 1..self.graph.clusters().len() {
            self.graph.create_self_transition(cluster);
        }

        for atom in 0..self.sa.atom_count() {
            let c1 = self.sa.atom_clusters[atom];
            if c1 == 0 {
                continue;
            }
            for slot in 0..self.sa.number_of_neighbors(atom) {
                let neighbor = self.sa.get_neighbor(atom, slot);
                // Count each interface bond once.
                if neighbor <= atom {
                    continue;
                }
                let c2 = self.sa.atom_clusters[neighbor];
                if c2 == 0 || c2 == c1 {
                    continue;
                }
                let tm = self.cluster_misorientation(c1, c2);
                let t = self.graph.create_transition(c1, c2, &tm, 1);
                self.graph.increment_area(t);
            }
        }
    }

    /// Rotation mapping vectors from cluster `c1`'s lattice frame into
    /// cluster `c2`'s.
    fn cluster_misorientation(&self, c1: ClusterId, c2: ClusterId) -> Matrix3<f64> {
        let r1 = StructureAnalysis::rotation_part(&self.graph.cluster(c1).orientation);
        let r2 = StructureAnalysis::rotation_part(&self.graph.cluster(c2).orientation);
        r2.transpose() * r1
    }

    /// Folds orientation-compatible clusters into supergrains: union-find
    /// over compatible transitions, parent representative is the lowest
    /// cluster id of each class, and each member records the composed
    /// transition into its parent.
    fn form_supergrains(&mut self) {
        let cluster_count = self.graph.clusters().len();
        let mut parent: Vec<ClusterId> = (0..cluster_count).collect();

        fn find(parent: &mut [ClusterId], mut x: ClusterId) -> ClusterId {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        // Compatible union edges, kept for composing parent transitions.
        let mut union_edges: Vec<(ClusterId, ClusterId, TransitionId)> = Vec::new();
        for t in 0..self.graph.transitions().len() {
            let transition = self.graph.transition(t);
            if transition.reverse <= t {
                continue; // self-transitions and reverse halves
            }
            let (c1, c2) = (transition.cluster1, transition.cluster2);
            if transition.distance > crate::core::cluster::MAXIMUM_CLUSTER_DISTANCE {
                continue;
            }
            let s1 = self.graph.cluster(c1).structure;
            let s2 = self.graph.cluster(c2).structure;
            if s1 != s2 {
                continue;
            }
            let q = UnitQuaternion::from_matrix(&transition.tm).into_inner();
            let identity = nalgebra::Quaternion::new(1.0, 0.0, 0.0, 0.0);
            let angle = structure_disorientation(s1, s2, &q, &identity);
            if angle <= self.params.supergrain_tolerance {
                union_edges.push((c1, c2, t));
                let (lo, hi) = {
                    let r1 = find(&mut parent, c1);
                    let r2 = find(&mut parent, c2);
                    if r1 < r2 {
                        (r1, r2)
                    } else {
                        (r2, r1)
                    }
                };
                // Lowest id becomes the representative.
                parent[hi] = lo;
            }
        }

        // Walk every supergrain tree from its representative, composing
        // transitions into the parent along the way.
        let mut adjacency: Vec<Vec<(ClusterId, TransitionId)>> = vec![Vec::new(); cluster_count];
        for &(c1, c2, t) in &union_edges {
            let reverse = self.graph.transition(t).reverse;
            adjacency[c1].push((c2, reverse)); // c2 -> c1 direction
            adjacency[c2].push((c1, t)); // c1 -> c2 direction
        }

        let mut supergrains = 0usize;
        for root in 1..cluster_count {
            if find(&mut parent, root) != root {
                continue;
            }
            supergrains += 1;
            // BFS outward; each visited member stores its transition to root.
            let mut queue = VecDeque::new();
            let mut into_root: Vec<Option<TransitionId>> = vec![None; cluster_count];
            let root_self = self.graph.create_self_transition(root);
            into_root[root] = Some(root_self);
            queue.push_back(root);
            while let Some(current) = queue.pop_front() {
                let current_to_root = into_root[current].unwrap();
                for &(member, member_to_current) in &adjacency[current] {
                    if into_root[member].is_some() {
                        continue;
                    }
                    let composed = self
                        .graph
                        .concatenate_transitions(member_to_current, current_to_root);
                    into_root[member] = Some(composed);
                    self.graph.cluster_mut(member).parent_transition = Some(composed);
                    queue.push_back(member);
                }
            }
        }

        debug!("supergrain formation: {} supergrains", supergrains);
    }
}
