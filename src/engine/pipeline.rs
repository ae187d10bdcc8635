use log::{debug, info};
use nalgebra::{Point3, Quaternion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::analysis::connector::{ClusterConnector, ConnectorParams};
use crate::analysis::elastic::ElasticMapping;
use crate::analysis::ptm::DEFAULT_RMSD_CUTOFF;
use crate::analysis::smoothing::{smooth_dislocation_lines, SmoothingParams};
use crate::analysis::structure::StructureAnalysis;
use crate::analysis::tracer::BurgersCircuitTracer;
use crate::core::cell::SimulationCell;
use crate::core::cluster::{ClusterGraph, ClusterId};
use crate::core::dislocations::DislocationNetwork;
use crate::core::structures::StructureType;
use crate::engine::error::AnalysisError;
use crate::geometry::delaunay::DelaunayTessellation;
use crate::geometry::halfedge::HalfEdgeMesh;
use crate::geometry::interface_mesh::{build_defect_mesh, DefectMesh, InterfaceMesh};

/// Which identifier drives the per-atom classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentificationMode {
    /// Polyhedral template matching over the close-packed templates.
    Ptm,
    /// The common-neighbor subset (fcc/hcp/bcc only).
    Cna,
    /// Diamond lattices (cubic and hexagonal).
    Diamond,
}

/// Recognized analysis options with their documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Expected lattice; biases the candidate order during
    /// identification.
    pub input_crystal_type: Option<StructureType>,
    pub max_burgers_circuit_size: usize,
    pub max_extended_burgers_circuit_size: usize,
    pub surface_smoothing_level: usize,
    pub line_smoothing_level: usize,
    pub line_coarsening_level: usize,
    /// Stacking-fault flattening weight; recognized for compatibility
    /// with the stacking-fault analyzer, which is not part of this core.
    pub sf_flatten_level: f64,
    pub rmsd_threshold: f64,
    pub crystal_path_steps: usize,
    pub identification_mode: IdentificationMode,
    /// Single worker and fixed seeds; two runs on identical input give
    /// byte-identical networks.
    pub deterministic: bool,
    /// Worker threads; `None` uses the host's core count.
    pub thread_count: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            input_crystal_type: None,
            max_burgers_circuit_size: 3,
            max_extended_burgers_circuit_size: 16,
            surface_smoothing_level: 8,
            line_smoothing_level: 4,
            line_coarsening_level: 4,
            sf_flatten_level: 0.2,
            rmsd_threshold: DEFAULT_RMSD_CUTOFF,
            crystal_path_steps: 2,
            identification_mode: IdentificationMode::Ptm,
            deterministic: false,
            thread_count: None,
        }
    }
}

/// Everything one frame of analysis produces.
pub struct FrameOutput {
    pub network: DislocationNetwork,
    pub cluster_graph: ClusterGraph,
    pub interface_mesh: InterfaceMesh,
    pub defect_mesh: DefectMesh,
    /// Per-atom structure types.
    pub structure_types: Vec<StructureType>,
    /// Per-atom orientation quaternions.
    pub orientations: Vec<Quaternion<f64>>,
    /// Per-atom cluster map; 0 is the amorphous cluster.
    pub atom_clusters: Vec<ClusterId>,
}

impl FrameOutput {
    fn empty(graph: ClusterGraph, atom_count: usize, completely_good: bool) -> Self {
        Self {
            network: DislocationNetwork::new(),
            cluster_graph: graph,
            interface_mesh: InterfaceMesh {
                mesh: HalfEdgeMesh::new(),
                cell_regions: Vec::new(),
                is_completely_good: completely_good,
                is_completely_bad: true,
            },
            defect_mesh: DefectMesh::default(),
            structure_types: vec![StructureType::Other; atom_count],
            orientations: vec![Quaternion::new(1.0, 0.0, 0.0, 0.0); atom_count],
            atom_clusters: vec![0; atom_count],
        }
    }
}

/// Runs the full dislocation extraction pipeline on one snapshot. The
/// analysis is a pure function of its inputs; all owned state is released
/// when the returned output is dropped.
pub fn analyze(
    positions: &[Point3<f64>],
    cell: &SimulationCell,
    options: &Options,
) -> Result<FrameOutput, AnalysisError> {
    if positions
        .iter()
        .any(|p| p.coords.iter().any(|c| !c.is_finite()))
    {
        return Err(AnalysisError::InternalConsistency {
            location: "input positions contain non-finite coordinates",
        });
    }

    let threads = if options.deterministic {
        1
    } else {
        options.thread_count.unwrap_or(0) // 0 lets rayon pick the core count
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|_| AnalysisError::InternalConsistency {
            location: "thread pool construction",
        })?;

    pool.install(|| analyze_in_pool(positions, cell, options))
}

fn analyze_in_pool(
    positions: &[Point3<f64>],
    cell: &SimulationCell,
    options: &Options,
) -> Result<FrameOutput, AnalysisError> {
    let mut graph = ClusterGraph::new();

    if positions.is_empty() {
        // Nothing to analyze: trivially both all-good and all-bad.
        return Ok(FrameOutput::empty(graph, 0, true));
    }

    // 1. Per-atom structure identification.
    let candidates = candidate_types(options);
    info!(
        "structure identification: {} atoms, candidates {:?}",
        positions.len(),
        candidates
    );
    let mut sa = StructureAnalysis::identify(positions, cell, &candidates, options.rmsd_threshold)?;

    let crystalline = sa
        .structure_types
        .iter()
        .filter(|t| t.is_crystalline())
        .count();
    debug!(
        "identification: {} / {} crystalline atoms",
        crystalline,
        positions.len()
    );

    if crystalline == 0 {
        // Not an error: the frame is simply all defect.
        let mut output = FrameOutput::empty(graph, positions.len(), false);
        output.structure_types = sa.structure_types;
        output.orientations = sa.orientations;
        return Ok(output);
    }

    // 2. Grain formation on the bond graph.
    ClusterConnector::new(&mut sa, &mut graph, ConnectorParams::default()).run();

    // Guard the minimum-image arithmetic of everything downstream.
    let cutoff = sa.max_neighbor_distance;
    for dim in 0..3 {
        if cell.has_pbc(dim) {
            let width = cell.cell_normal_vector(dim).dot(&cell.matrix().column(dim));
            if width < 2.0 * cutoff {
                return Err(AnalysisError::CellTooSmall { axis: dim });
            }
        }
    }

    // 3. Delaunay tessellation with a periodic ghost layer.
    let tessellation = DelaunayTessellation::generate(cell, positions, 2.0 * cutoff)?;

    // 4. Elastic mapping of the tessellation edges. Graph lookups from
    // the parallel edge scan go through a coarse lock.
    let mut elastic = ElasticMapping::generate_edges(&sa, &tessellation);
    elastic.assign_vertices_to_clusters();
    let graph_lock = parking_lot::Mutex::new(graph);
    elastic.assign_ideal_vectors(options.crystal_path_steps, &graph_lock);
    let mut graph = graph_lock.into_inner();

    // 5. Interface mesh between good and bad tetrahedra.
    let mut interface_mesh =
        InterfaceMesh::create(&sa, &tessellation, &elastic, &graph, cutoff)?;

    // 6. Burgers circuit tracing.
    let mut rng = if options.deterministic {
        ChaCha8Rng::seed_from_u64(4)
    } else {
        ChaCha8Rng::from_entropy()
    };
    let tracer = BurgersCircuitTracer::new(
        &mut interface_mesh.mesh,
        &mut graph,
        options.max_burgers_circuit_size,
        options.max_extended_burgers_circuit_size,
    );
    let mut traced = tracer.trace(&mut rng);

    // 7. Line coarsening and smoothing.
    smooth_dislocation_lines(
        &mut traced.network,
        SmoothingParams {
            smoothing_level: options.line_smoothing_level,
            coarsening_interval: options.line_coarsening_level as f64,
        },
    );
    traced.network.compact();

    // 8. Defect mesh: drop circuit-swept faces, cap dangling ends, relax.
    let mesh_ref = &interface_mesh.mesh;
    let mut defect_mesh = build_defect_mesh(
        mesh_ref,
        |face| mesh_ref.faces[face].circuit.is_none(),
        &traced.caps,
    );
    smooth_defect_mesh(&mut defect_mesh, options.surface_smoothing_level);

    info!(
        "analysis complete: {} segments, total line length {:.3}",
        traced.network.segments.len(),
        traced.network.total_line_length()
    );

    Ok(FrameOutput {
        network: traced.network,
        cluster_graph: graph,
        interface_mesh,
        defect_mesh,
        structure_types: sa.structure_types,
        orientations: sa.orientations,
        atom_clusters: sa.atom_clusters,
    })
}

/// Candidate templates for the chosen identification mode; the expected
/// input lattice, when given, is tried first.
fn candidate_types(options: &Options) -> Vec<StructureType> {
    let mut candidates: Vec<StructureType> = match options.identification_mode {
        IdentificationMode::Ptm => vec![
            StructureType::Fcc,
            StructureType::Hcp,
            StructureType::Bcc,
            StructureType::Sc,
        ],
        IdentificationMode::Cna => vec![
            StructureType::Fcc,
            StructureType::Hcp,
            StructureType::Bcc,
        ],
        IdentificationMode::Diamond => {
            vec![StructureType::CubicDiamond, StructureType::HexDiamond]
        }
    };
    if let Some(expected) = options.input_crystal_type {
        candidates.retain(|&t| t != expected);
        candidates.insert(0, expected);
    }
    candidates
}

/// Taubin relaxation of the defect mesh vertices over the triangle graph.
fn smooth_defect_mesh(mesh: &mut DefectMesh, smoothing_level: usize) {
    use crate::core::{TAUBIN_K_PB, TAUBIN_LAMBDA};

    if smoothing_level == 0 || mesh.vertices.is_empty() {
        return;
    }
    let n = mesh.vertices.len();
    let mut adjacency: Vec<Vec<u32>> = vec![Vec::new(); n];
    for tri in &mesh.triangles {
        for i in 0..3 {
            let a = tri[i] as usize;
            let b = tri[(i + 1) % 3];
            if !adjacency[a].contains(&b) {
                adjacency[a].push(b);
            }
        }
    }

    let lambda = TAUBIN_LAMBDA;
    let mu = 1.0 / (TAUBIN_K_PB - 1.0 / lambda);
    let mut laplacian = vec![nalgebra::Vector3::zeros(); n];
    for _ in 0..smoothing_level {
        for weight in [lambda, mu] {
            for (i, lap) in laplacian.iter_mut().enumerate() {
                *lap = nalgebra::Vector3::zeros();
                if adjacency[i].is_empty() {
                    continue;
                }
                for &j in &adjacency[i] {
                    *lap += mesh.vertices[j as usize] - mesh.vertices[i];
                }
                *lap /= adjacency[i].len() as f64;
            }
            for (v, lap) in mesh.vertices.iter_mut().zip(&laplacian) {
                *v += weight * lap;
            }
        }
    }
}
