use std::collections::VecDeque;

use crate::analysis::structure::StructureAnalysis;
use crate::core::cluster::{ClusterGraph, ClusterVector};

/// Finds an atom-to-atom path between two atoms that lies entirely in good
/// crystal, composing the ideal lattice vectors of each hop. Used to
/// assign ideal vectors to tessellation edges whose endpoints are not
/// direct template neighbors.
pub struct CrystalPathFinder<'a> {
    sa: &'a StructureAnalysis,
    max_path_length: usize,
    visited: Vec<bool>,
}

struct PathNode {
    atom: usize,
    ideal: ClusterVector,
    distance: usize,
}

impl<'a> CrystalPathFinder<'a> {
    pub fn new(sa: &'a StructureAnalysis, max_path_length: usize) -> Self {
        assert!(max_path_length >= 1);
        Self {
            visited: vec![false; sa.atom_count()],
            sa,
            max_path_length,
        }
    }

    /// Returns the ideal displacement from `atom1` to `atom2` expressed in
    /// some cluster's frame, or `None` when no crystal path exists within
    /// the step budget.
    pub fn find_path(
        &mut self,
        atom1: usize,
        atom2: usize,
        graph: &mut ClusterGraph,
    ) -> Option<ClusterVector> {
        debug_assert_ne!(atom1, atom2);
        let cluster1 = self.sa.atom_clusters[atom1];
        let cluster2 = self.sa.atom_clusters[atom2];

        // Direct template neighbors short-circuit the search.
        if cluster1 != 0 {
            if let Some(slot) = self.sa.find_neighbor(atom1, atom2) {
                if slot < self.sa.lattice_vectors[atom1].len() {
                    let v = self.sa.neighbor_lattice_vector(atom1, slot);
                    return Some(ClusterVector::new(v, cluster1));
                }
            }
        } else if cluster2 != 0 {
            if let Some(slot) = self.sa.find_neighbor(atom2, atom1) {
                if slot < self.sa.lattice_vectors[atom2].len() {
                    let v = self.sa.neighbor_lattice_vector(atom2, slot);
                    return Some(ClusterVector::new(-v, cluster2));
                }
            }
        }

        if self.max_path_length == 1 {
            return None;
        }

        // Breadth-first walk over the bond graph, accumulating the ideal
        // vector hop by hop.
        let mut queue: VecDeque<PathNode> = VecDeque::new();
        let mut touched = vec![atom1];
        self.visited[atom1] = true;
        queue.push_back(PathNode {
            atom: atom1,
            ideal: ClusterVector::zero(),
            distance: 0,
        });

        let mut result = None;
        'search: while let Some(node) = queue.pop_front() {
            let atom = node.atom;
            let atom_cluster = self.sa.atom_clusters[atom];

            for slot in 0..self.sa.number_of_neighbors(atom) {
                let neighbor = self.sa.get_neighbor(atom, slot);
                if self.visited[neighbor] {
                    continue;
                }
                if node.distance >= self.max_path_length - 1 && neighbor != atom2 {
                    continue;
                }

                // The lattice vector of this hop, in some cluster's frame.
                let step = if atom_cluster != 0 && slot < self.sa.lattice_vectors[atom].len() {
                    ClusterVector::new(self.sa.neighbor_lattice_vector(atom, slot), atom_cluster)
                } else {
                    // Hop out of amorphous material: usable only if the
                    // neighbor is crystalline and lists this atom back.
                    let nb_cluster = self.sa.atom_clusters[neighbor];
                    if nb_cluster == 0 {
                        continue;
                    }
                    let Some(back) = self.sa.find_neighbor(neighbor, atom) else {
                        continue;
                    };
                    if back >= self.sa.lattice_vectors[neighbor].len() {
                        continue;
                    }
                    ClusterVector::new(
                        -self.sa.neighbor_lattice_vector(neighbor, back),
                        nb_cluster,
                    )
                };

                // Compose with the path so far, moving frames as needed.
                let mut path_vec = node.ideal;
                match (path_vec.cluster, step.cluster) {
                    (Some(pc), Some(sc)) if pc == sc => {
                        path_vec.vec += step.vec;
                    }
                    (Some(pc), Some(sc)) => match graph.determine_transition(sc, pc) {
                        Some(t) => path_vec.vec += graph.transform(t, &step.vec),
                        None => continue,
                    },
                    (None, _) => path_vec = step,
                    (Some(_), None) => continue,
                }

                if neighbor == atom2 {
                    result = Some(path_vec);
                    break 'search;
                }

                if node.distance < self.max_path_length - 1 {
                    self.visited[neighbor] = true;
                    touched.push(neighbor);
                    queue.push_back(PathNode {
                        atom: neighbor,
                        ideal: path_vec,
                        distance: node.distance + 1,
                    });
                }
            }
        }

        for atom in touched {
            self.visited[atom] = false;
        }
        result
    }
}
