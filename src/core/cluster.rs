use std::collections::HashSet;

use nalgebra::{Matrix3, Point3, Vector3};

use crate::core::structures::StructureType;
use crate::core::TRANSITION_MATRIX_EPSILON;

/// Stable index of a cluster in the graph. Id 0 is the sentinel
/// "amorphous" cluster that owns all unclassified atoms.
pub type ClusterId = usize;

/// Stable index of a transition in the graph's transition arena.
pub type TransitionId = usize;

/// A grain: a maximal set of structurally compatible atoms sharing one
/// local lattice orientation.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub structure: StructureType,
    pub atom_count: usize,
    /// Maps local lattice vectors (in units of the lattice constant) into
    /// spatial vectors; carries both the rotation and the scale.
    pub orientation: Matrix3<f64>,
    pub center_of_mass: Point3<f64>,
    /// Outgoing transitions, kept sorted ascending by distance.
    transitions: Vec<TransitionId>,
    /// Set during supergrain formation: the transition into this cluster's
    /// parent representative.
    pub parent_transition: Option<TransitionId>,
}

impl Cluster {
    pub fn transitions(&self) -> &[TransitionId] {
        &self.transitions
    }
}

/// A directed edge of the cluster graph carrying the rotation that maps
/// vectors from `cluster1`'s lattice frame into `cluster2`'s.
#[derive(Debug, Clone)]
pub struct ClusterTransition {
    pub cluster1: ClusterId,
    pub cluster2: ClusterId,
    pub tm: Matrix3<f64>,
    /// The paired opposite transition; a self-transition points at itself.
    pub reverse: TransitionId,
    /// Small integer ranking: 0 for self, 1 for direct neighbors, higher
    /// for composed paths.
    pub distance: u32,
    /// Number of interface bonds that contributed this transition.
    pub area: u32,
}

impl ClusterTransition {
    pub fn is_self_transition(&self, own_id: TransitionId) -> bool {
        self.reverse == own_id
    }
}

fn matrices_equal(a: &Matrix3<f64>, b: &Matrix3<f64>, epsilon: f64) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= epsilon)
}

/// Manages the clusters (grains) found in the input and the misorientation
/// transitions between them. Transitions always exist as forward/reverse
/// pairs; lookups beyond direct edges compose two-step paths.
#[derive(Debug)]
pub struct ClusterGraph {
    clusters: Vec<Cluster>,
    transitions: Vec<ClusterTransition>,
    /// Negative cache of cluster pairs known to be unreachable within the
    /// maximum path length, keyed in canonical (min, max) order.
    disconnected: HashSet<(ClusterId, ClusterId)>,
}

pub const MAXIMUM_CLUSTER_DISTANCE: u32 = 2;

impl ClusterGraph {
    pub fn new() -> Self {
        let mut graph = Self {
            clusters: Vec::new(),
            transitions: Vec::new(),
            disconnected: HashSet::new(),
        };
        // Reserve id 0 for the amorphous cluster.
        graph.create_cluster(StructureType::Other);
        graph
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, id: ClusterId) -> &Cluster {
        &self.clusters[id]
    }

    pub fn cluster_mut(&mut self, id: ClusterId) -> &mut Cluster {
        &mut self.clusters[id]
    }

    pub fn transitions(&self) -> &[ClusterTransition] {
        &self.transitions
    }

    pub fn transition(&self, id: TransitionId) -> &ClusterTransition {
        &self.transitions[id]
    }

    pub fn is_self_transition(&self, id: TransitionId) -> bool {
        self.transitions[id].reverse == id
    }

    /// Applies the transition to a vector in `cluster1`'s frame, yielding
    /// the vector in `cluster2`'s frame.
    pub fn transform(&self, id: TransitionId, v: &Vector3<f64>) -> Vector3<f64> {
        let t = &self.transitions[id];
        if t.reverse == id {
            *v
        } else {
            t.tm * v
        }
    }

    /// Applies the reverse transition: maps from `cluster2`'s frame back
    /// into `cluster1`'s.
    pub fn reverse_transform(&self, id: TransitionId, v: &Vector3<f64>) -> Vector3<f64> {
        let t = &self.transitions[id];
        if t.reverse == id {
            *v
        } else {
            self.transitions[t.reverse].tm * v
        }
    }

    /// Creates a new cluster node with the given structure type and a
    /// sequentially assigned id.
    pub fn create_cluster(&mut self, structure: StructureType) -> ClusterId {
        let id = self.clusters.len();
        self.clusters.push(Cluster {
            id,
            structure,
            atom_count: 0,
            orientation: Matrix3::identity(),
            center_of_mass: Point3::origin(),
            transitions: Vec::new(),
            parent_transition: None,
        });
        id
    }

    pub fn find_cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id)
    }

    /// Returns the direct transition A -> B if one exists.
    pub fn find_transition(&self, a: ClusterId, b: ClusterId) -> Option<TransitionId> {
        self.clusters[a]
            .transitions
            .iter()
            .copied()
            .find(|&t| self.transitions[t].cluster2 == b)
    }

    /// Creates the trivial identity transition on a cluster (distance 0),
    /// or returns the existing one. Self-transitions always sort first in
    /// the cluster's list.
    pub fn create_self_transition(&mut self, cluster: ClusterId) -> TransitionId {
        debug_assert_ne!(cluster, 0);
        if let Some(&first) = self.clusters[cluster].transitions.first() {
            if self.transitions[first].reverse == first {
                return first;
            }
        }

        let id = self.transitions.len();
        self.transitions.push(ClusterTransition {
            cluster1: cluster,
            cluster2: cluster,
            tm: Matrix3::identity(),
            reverse: id,
            distance: 0,
            area: 0,
        });
        self.clusters[cluster].transitions.insert(0, id);
        id
    }

    /// Defines a transition A -> B with rotation `tm`, creating the
    /// reverse pair B -> A as well. Reuses any semantically equal existing
    /// transition. An identity transition of a cluster onto itself reduces
    /// to the self-transition.
    pub fn create_transition(
        &mut self,
        a: ClusterId,
        b: ClusterId,
        tm: &Matrix3<f64>,
        distance: u32,
    ) -> TransitionId {
        if a == b && matrices_equal(tm, &Matrix3::identity(), TRANSITION_MATRIX_EPSILON) {
            return self.create_self_transition(a);
        }
        debug_assert!(distance >= 1);

        for &t in &self.clusters[a].transitions {
            let existing = &self.transitions[t];
            if existing.cluster2 == b && matrices_equal(&existing.tm, tm, TRANSITION_MATRIX_EPSILON)
            {
                return t;
            }
        }

        let forward = self.transitions.len();
        let backward = forward + 1;
        let inverse = tm
            .try_inverse()
            .unwrap_or_else(|| tm.transpose());
        self.transitions.push(ClusterTransition {
            cluster1: a,
            cluster2: b,
            tm: *tm,
            reverse: backward,
            distance,
            area: 0,
        });
        self.transitions.push(ClusterTransition {
            cluster1: b,
            cluster2: a,
            tm: inverse,
            reverse: forward,
            distance,
            area: 0,
        });

        self.insert_sorted(a, forward);
        self.insert_sorted(b, backward);

        if distance == 1 {
            // A new direct link invalidates cached unreachability.
            self.disconnected.clear();
        }

        forward
    }

    fn insert_sorted(&mut self, cluster: ClusterId, transition: TransitionId) {
        let Self {
            clusters,
            transitions,
            ..
        } = self;
        let distance = transitions[transition].distance;
        let list = &mut clusters[cluster].transitions;
        let pos = list
            .iter()
            .position(|&t| transitions[t].distance > distance)
            .unwrap_or(list.len());
        list.insert(pos, transition);
    }

    /// Finds or builds the shortest known transition A -> B, exploring
    /// two-step paths A -> X -> B when no direct edge exists. Records the
    /// pair as disconnected on failure.
    pub fn determine_transition(&mut self, a: ClusterId, b: ClusterId) -> Option<TransitionId> {
        if a == b {
            return Some(self.create_self_transition(a));
        }

        if let Some(t) = self.find_transition(a, b) {
            return Some(t);
        }

        // Bail out if either endpoint has no non-self links yet.
        if !self.has_real_transitions(a) || !self.has_real_transitions(b) {
            return None;
        }

        // Canonical search order so the disconnected cache holds each pair once.
        let (lo, hi, reversed) = if a <= b { (a, b, false) } else { (b, a, true) };

        if self.disconnected.contains(&(lo, hi)) {
            return None;
        }

        let mut shortest: Option<(TransitionId, TransitionId, u32)> = None;
        for &t1 in &self.clusters[lo].transitions {
            let mid = self.transitions[t1].cluster2;
            if mid == lo {
                continue;
            }
            for &t2 in &self.clusters[mid].transitions {
                if self.transitions[t2].cluster2 == hi {
                    let distance = self.transitions[t1].distance + self.transitions[t2].distance;
                    if shortest.map_or(true, |(_, _, d)| distance < d) {
                        shortest = Some((t1, t2, distance));
                    }
                    break;
                }
            }
        }

        match shortest {
            Some((t1, t2, distance)) if distance <= MAXIMUM_CLUSTER_DISTANCE => {
                let tm = self.transitions[t2].tm * self.transitions[t1].tm;
                let forward = self.create_transition(lo, hi, &tm, distance);
                Some(if reversed {
                    self.transitions[forward].reverse
                } else {
                    forward
                })
            }
            _ => {
                self.disconnected.insert((lo, hi));
                None
            }
        }
    }

    /// Counts one more interface bond on a transition and its reverse.
    pub fn increment_area(&mut self, id: TransitionId) {
        let reverse = self.transitions[id].reverse;
        self.transitions[id].area += 1;
        if reverse != id {
            self.transitions[reverse].area += 1;
        }
    }

    fn has_real_transitions(&self, cluster: ClusterId) -> bool {
        self.clusters[cluster]
            .transitions
            .iter()
            .any(|&t| self.transitions[t].reverse != t)
    }

    /// Splices two transitions A -> B and B -> C into a single A -> C
    /// edge. Self-transitions act as identities; a transition followed by
    /// its own reverse collapses to a self-transition.
    pub fn concatenate_transitions(
        &mut self,
        t_ab: TransitionId,
        t_bc: TransitionId,
    ) -> TransitionId {
        debug_assert_eq!(self.transitions[t_ab].cluster2, self.transitions[t_bc].cluster1);

        if self.is_self_transition(t_bc) {
            return t_ab;
        }
        if self.is_self_transition(t_ab) {
            return t_bc;
        }
        if self.transitions[t_ab].reverse == t_bc {
            let cluster = self.transitions[t_ab].cluster1;
            return self.create_self_transition(cluster);
        }

        let a = self.transitions[t_ab].cluster1;
        let c = self.transitions[t_bc].cluster2;
        let tm = self.transitions[t_bc].tm * self.transitions[t_ab].tm;
        let distance = self.transitions[t_ab].distance + self.transitions[t_bc].distance;
        self.create_transition(a, c, &tm, distance)
    }
}

impl Default for ClusterGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// A vector expressed in a specific cluster's local lattice frame. The
/// zero vector may carry no cluster at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterVector {
    pub vec: Vector3<f64>,
    pub cluster: Option<ClusterId>,
}

impl ClusterVector {
    pub fn new(vec: Vector3<f64>, cluster: ClusterId) -> Self {
        Self {
            vec,
            cluster: Some(cluster),
        }
    }

    pub fn zero() -> Self {
        Self {
            vec: Vector3::zeros(),
            cluster: None,
        }
    }

    pub fn negated(&self) -> Self {
        Self {
            vec: -self.vec,
            cluster: self.cluster,
        }
    }

    /// Expresses the vector in world space through its cluster's
    /// orientation matrix.
    pub fn to_spatial(&self, graph: &ClusterGraph) -> Vector3<f64> {
        let cluster = self.cluster.expect("spatial conversion requires a cluster");
        graph.cluster(cluster).orientation * self.vec
    }

    /// Re-expresses the vector in another cluster's frame via the graph.
    /// Returns false if the two clusters are not connected.
    pub fn transform_to_cluster(&mut self, target: ClusterId, graph: &mut ClusterGraph) -> bool {
        let Some(current) = self.cluster else {
            return false;
        };
        if current == target {
            return true;
        }
        match graph.determine_transition(current, target) {
            Some(t) => {
                self.vec = graph.transform(t, &self.vec);
                self.cluster = Some(target);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;

    fn rotation(angle_deg: f64) -> Matrix3<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle_deg.to_radians())
            .to_rotation_matrix()
            .into_inner()
    }

    #[test]
    fn transition_pair_invariants() {
        let mut graph = ClusterGraph::new();
        let a = graph.create_cluster(StructureType::Fcc);
        let b = graph.create_cluster(StructureType::Fcc);
        let t = graph.create_transition(a, b, &rotation(10.0), 1);
        let r = graph.transition(t).reverse;

        assert_eq!(graph.transition(r).reverse, t);
        let product = graph.transition(t).tm * graph.transition(r).tm;
        assert!(matrices_equal(&product, &Matrix3::identity(), 1e-6));
        assert_eq!(graph.transition(t).distance, 1);
    }

    #[test]
    fn self_transition_is_identity_distance_zero() {
        let mut graph = ClusterGraph::new();
        let a = graph.create_cluster(StructureType::Bcc);
        let s = graph.create_self_transition(a);
        assert!(graph.is_self_transition(s));
        assert_eq!(graph.transition(s).distance, 0);
        assert!(matrices_equal(&graph.transition(s).tm, &Matrix3::identity(), 0.0));
        // Identity create_transition reduces to the same self-transition.
        let again = graph.create_transition(a, a, &Matrix3::identity(), 1);
        assert_eq!(again, s);
    }

    #[test]
    fn duplicate_transitions_are_reused() {
        let mut graph = ClusterGraph::new();
        let a = graph.create_cluster(StructureType::Fcc);
        let b = graph.create_cluster(StructureType::Fcc);
        let tm = rotation(7.0);
        let t1 = graph.create_transition(a, b, &tm, 1);
        let t2 = graph.create_transition(a, b, &tm, 1);
        assert_eq!(t1, t2);
    }

    #[test]
    fn two_step_path_is_materialized() {
        let mut graph = ClusterGraph::new();
        let a = graph.create_cluster(StructureType::Fcc);
        let b = graph.create_cluster(StructureType::Fcc);
        let c = graph.create_cluster(StructureType::Fcc);
        graph.create_transition(a, b, &rotation(5.0), 1);
        graph.create_transition(b, c, &rotation(3.0), 1);

        let t = graph.determine_transition(a, c).expect("2-step path exists");
        assert_eq!(graph.transition(t).cluster1, a);
        assert_eq!(graph.transition(t).cluster2, c);
        assert_eq!(graph.transition(t).distance, 2);
        assert!(matrices_equal(&graph.transition(t).tm, &rotation(8.0), 1e-9));
    }

    #[test]
    fn disconnected_pairs_are_cached_and_invalidated() {
        let mut graph = ClusterGraph::new();
        let a = graph.create_cluster(StructureType::Fcc);
        let b = graph.create_cluster(StructureType::Fcc);
        let c = graph.create_cluster(StructureType::Fcc);
        let d = graph.create_cluster(StructureType::Fcc);
        graph.create_transition(a, b, &rotation(5.0), 1);
        graph.create_transition(c, d, &rotation(5.0), 1);

        assert!(graph.determine_transition(a, c).is_none());
        // A new direct link re-opens the search.
        graph.create_transition(b, c, &rotation(1.0), 1);
        assert!(graph.determine_transition(a, c).is_some());
    }

    #[test]
    fn concatenation_matches_matrix_product() {
        let mut graph = ClusterGraph::new();
        let a = graph.create_cluster(StructureType::Fcc);
        let b = graph.create_cluster(StructureType::Fcc);
        let c = graph.create_cluster(StructureType::Fcc);
        let t_ab = graph.create_transition(a, b, &rotation(4.0), 1);
        let t_bc = graph.create_transition(b, c, &rotation(6.0), 1);

        let t_ac = graph.concatenate_transitions(t_ab, t_bc);
        let expected = graph.transition(t_bc).tm * graph.transition(t_ab).tm;
        assert!(matrices_equal(&graph.transition(t_ac).tm, &expected, 1e-9));
        assert_eq!(graph.transition(t_ac).distance, 2);

        // A transition followed by its reverse is a self-transition.
        let r = graph.transition(t_ab).reverse;
        let s = graph.concatenate_transitions(t_ab, r);
        assert!(graph.is_self_transition(s));
    }

    #[test]
    fn transition_lists_stay_sorted_by_distance() {
        let mut graph = ClusterGraph::new();
        let a = graph.create_cluster(StructureType::Fcc);
        let b = graph.create_cluster(StructureType::Fcc);
        let c = graph.create_cluster(StructureType::Fcc);
        graph.create_transition(a, b, &rotation(5.0), 1);
        graph.create_transition(b, c, &rotation(3.0), 1);
        graph.determine_transition(a, c);
        graph.create_self_transition(a);

        let distances: Vec<u32> = graph
            .cluster(a)
            .transitions()
            .iter()
            .map(|&t| graph.transition(t).distance)
            .collect();
        let mut sorted = distances.clone();
        sorted.sort_unstable();
        assert_eq!(distances, sorted);
    }
}
