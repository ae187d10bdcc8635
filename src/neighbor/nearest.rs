use nalgebra::{Point3, Vector3};

use crate::core::cell::SimulationCell;
use crate::engine::error::AnalysisError;
use crate::util::bpq::BoundedPriorityQueue;

/// Upper bound on kd-tree depth; below this the tree degenerates into
/// larger buckets rather than deeper splits.
const TREE_DEPTH_LIMIT: usize = 17;

/// One result of a k-nearest query.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub index: usize,
    /// Displacement from the query point to the neighbor image.
    pub delta: Vector3<f64>,
    pub distance_sq: f64,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.distance_sq == other.distance_sq && self.index == other.index
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        // Deterministic tie-break on the particle index.
        (self.distance_sq, self.index).partial_cmp(&(other.distance_sq, other.index))
    }
}

#[derive(Debug)]
enum TreeNode {
    Leaf {
        start: usize,
        end: usize,
    },
    Inner {
        split_dim: usize,
        split_pos: f64,
        children: [usize; 2],
    },
}

/// Kd-tree k-nearest-neighbor finder with axis-aligned median splits and
/// bucketed leaves. Periodic neighbors are found by visiting the tree once
/// per relevant periodic image of the query point.
#[derive(Debug)]
pub struct NearestNeighborFinder {
    cell: SimulationCell,
    positions: Vec<Point3<f64>>,
    /// Particle indices, reordered so each leaf owns a contiguous range.
    order: Vec<u32>,
    nodes: Vec<TreeNode>,
    bucket_size: usize,
    num_neighbors: usize,
    pbc_images: Vec<Vector3<f64>>,
}

impl NearestNeighborFinder {
    pub fn prepare(
        num_neighbors: usize,
        positions: &[Point3<f64>],
        cell: &SimulationCell,
    ) -> Result<Self, AnalysisError> {
        if cell.volume() <= 0.0 {
            return Err(AnalysisError::InvalidCell);
        }

        let wrapped: Vec<Point3<f64>> = positions.iter().map(|p| cell.wrap_point(p)).collect();

        // Zero shift first so the primary image is visited before ghosts.
        let mut pbc_images = vec![Vector3::zeros()];
        let range = |dim: usize| if cell.has_pbc(dim) { -1..=1 } else { 0..=0 };
        for ix in range(0) {
            for iy in range(1) {
                for iz in range(2) {
                    if ix == 0 && iy == 0 && iz == 0 {
                        continue;
                    }
                    pbc_images.push(cell.reduced_to_absolute(&Vector3::new(
                        ix as f64, iy as f64, iz as f64,
                    )));
                }
            }
        }

        let bucket_size = (num_neighbors / 2).max(8);
        let mut finder = Self {
            cell: cell.clone(),
            positions: wrapped,
            order: (0..positions.len() as u32).collect(),
            nodes: Vec::new(),
            bucket_size,
            num_neighbors,
            pbc_images,
        };
        if !finder.positions.is_empty() {
            finder.build(0, finder.positions.len(), 0);
        }
        Ok(finder)
    }

    pub fn particle_count(&self) -> usize {
        self.positions.len()
    }

    pub fn particle_pos(&self, index: usize) -> &Point3<f64> {
        &self.positions[index]
    }

    /// Builds the subtree over `order[start..end]`, returning its node id.
    fn build(&mut self, start: usize, end: usize, depth: usize) -> usize {
        let id = self.nodes.len();
        if end - start <= self.bucket_size || depth >= TREE_DEPTH_LIMIT {
            self.nodes.push(TreeNode::Leaf { start, end });
            return id;
        }

        // Split along the widest extent of the bucket.
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for &i in &self.order[start..end] {
            let p = &self.positions[i as usize];
            for d in 0..3 {
                lo[d] = lo[d].min(p[d]);
                hi[d] = hi[d].max(p[d]);
            }
        }
        let split_dim = (0..3)
            .max_by(|&a, &b| {
                (hi[a] - lo[a])
                    .partial_cmp(&(hi[b] - lo[b]))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();

        let mid = (start + end) / 2;
        let positions = &self.positions;
        self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            positions[a as usize][split_dim]
                .partial_cmp(&positions[b as usize][split_dim])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let split_pos = positions[self.order[mid] as usize][split_dim];

        self.nodes.push(TreeNode::Leaf { start, end }); // placeholder
        let left = self.build(start, mid, depth + 1);
        let right = self.build(mid, end, depth + 1);
        self.nodes[id] = TreeNode::Inner {
            split_dim,
            split_pos,
            children: [left, right],
        };
        id
    }

    /// Returns the `k` nearest neighbor images around particle `index`,
    /// ascending by squared distance.
    pub fn query_particle(&self, index: usize, include_self: bool) -> Vec<Neighbor> {
        self.query_point_impl(&self.positions[index], Some(index), include_self, self.num_neighbors)
    }

    /// Returns the `k` nearest neighbor images around an arbitrary point.
    pub fn query_point(&self, point: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        self.query_point_impl(&self.cell.wrap_point(point), None, true, k)
    }

    fn query_point_impl(
        &self,
        point: &Point3<f64>,
        self_index: Option<usize>,
        include_self: bool,
        k: usize,
    ) -> Vec<Neighbor> {
        let mut queue: BoundedPriorityQueue<Neighbor> = BoundedPriorityQueue::new(k);
        if self.positions.is_empty() {
            return Vec::new();
        }
        for shift in &self.pbc_images {
            let q = point + shift;
            self.visit(0, &q, shift, self_index, include_self, &mut queue);
        }
        queue.into_sorted()
    }

    fn visit(
        &self,
        node: usize,
        q: &Point3<f64>,
        shift: &Vector3<f64>,
        self_index: Option<usize>,
        include_self: bool,
        queue: &mut BoundedPriorityQueue<Neighbor>,
    ) {
        match &self.nodes[node] {
            TreeNode::Leaf { start, end } => {
                for &i in &self.order[*start..*end] {
                    let i = i as usize;
                    if !include_self && self_index == Some(i) && *shift == Vector3::zeros() {
                        continue;
                    }
                    let delta = self.positions[i] - q;
                    queue.insert(Neighbor {
                        index: i,
                        delta,
                        distance_sq: delta.norm_squared(),
                    });
                }
            }
            TreeNode::Inner {
                split_dim,
                split_pos,
                children,
            } => {
                let diff = q[*split_dim] - split_pos;
                let (near, far) = if diff < 0.0 {
                    (children[0], children[1])
                } else {
                    (children[1], children[0])
                };
                self.visit(near, q, shift, self_index, include_self, queue);
                if !queue.is_full() || diff * diff < queue.top().distance_sq {
                    self.visit(far, q, shift, self_index, include_self, queue);
                }
            }
        }
    }
}
