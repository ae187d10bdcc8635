use std::collections::VecDeque;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::core::dislocations::DislocationNetwork;
use crate::core::{TAUBIN_K_PB, TAUBIN_LAMBDA};

/// Two endpoints closer than this are treated as a closed line during
/// smoothing. Empirical constant, reproduced literally for bit-identical
/// deterministic output.
const CLOSED_LINE_TOLERANCE: f64 = 1e-4;

/// Parameters of the line post-processing stage.
#[derive(Debug, Clone, Copy)]
pub struct SmoothingParams {
    /// Taubin iterations; 0 disables smoothing.
    pub smoothing_level: usize,
    /// Point-merging interval; 0 disables coarsening.
    pub coarsening_interval: f64,
}

/// Coarsens and smooths every segment line of the network in place.
/// `core_size` arrays are consumed by coarsening and cleared afterwards.
pub fn smooth_dislocation_lines(network: &mut DislocationNetwork, params: SmoothingParams) {
    if params.smoothing_level == 0 && params.coarsening_interval <= 0.0 {
        // Still uphold the post-condition on core sizes.
        for segment in &mut network.segments {
            segment.core_size.clear();
        }
        return;
    }

    let loop_flags: Vec<(bool, bool)> = (0..network.segments.len())
        .map(|s| (network.is_closed_loop(s), network.is_infinite_line(s)))
        .collect();

    network
        .segments
        .par_iter_mut()
        .zip(loop_flags)
        .for_each(|(segment, (is_loop, is_infinite))| {
            if segment.line.len() < 2 || segment.core_size.is_empty() {
                segment.core_size.clear();
                return;
            }

            let mut line = VecDeque::new();
            let mut core_size = VecDeque::new();
            coarsen_dislocation_line(
                params.coarsening_interval,
                &segment.line,
                &segment.core_size,
                &mut line,
                &mut core_size,
                is_loop,
                is_infinite,
            );
            smooth_dislocation_line(params.smoothing_level, &mut line, is_loop);

            segment.line = line;
            segment.core_size.clear();
        });
}

/// Merges runs of short steps into single averaged points, weighted by the
/// per-point core size. Loops keep at least three points; an infinite line
/// that is effectively straight degenerates to its average fold.
pub fn coarsen_dislocation_line(
    interval: f64,
    input: &VecDeque<Point3<f64>>,
    core_size: &VecDeque<u32>,
    output: &mut VecDeque<Point3<f64>>,
    output_core_size: &mut VecDeque<u32>,
    is_closed_loop: bool,
    is_infinite_line: bool,
) {
    debug_assert!(input.len() >= 2);
    debug_assert_eq!(input.len(), core_size.len());

    if interval <= 0.0 {
        *output = input.clone();
        *output_core_size = core_size.clone();
        return;
    }

    // A periodic line so short that the whole polyline fits within one
    // interval collapses to two points displaced by the average fold.
    if is_infinite_line && input.len() >= 3 {
        let sum_core: u64 = core_size.iter().take(core_size.len() - 1).map(|&c| c as u64).sum();
        let count = input.len() - 1;
        if sum_core as f64 * interval > (count * count) as f64 {
            let front = input[0];
            let mut com = Vector3::zeros();
            for p in input.iter().take(count) {
                com += p - front;
            }
            com /= count as f64;
            output.push_back(front + com);
            output_core_size.push_back((sum_core / count as u64) as u32);
            output.push_back(*input.back().unwrap() + com);
            output_core_size.push_back((sum_core / count as u64) as u32);
            return;
        }
    }

    if input.len() < 4 {
        *output = input.clone();
        *output_core_size = core_size.clone();
        return;
    }

    if !is_closed_loop {
        output.push_back(input[0]);
        output_core_size.push_back(core_size[0]);
    }

    // Nearly closed open lines keep more points so the shape survives.
    let min_num_points: usize =
        if (input[0] - input[input.len() - 1]).norm() <= CLOSED_LINE_TOLERANCE {
            4
        } else {
            2
        };

    let front = input[0];
    let back = input[input.len() - 1];

    // Leading run.
    let mut head = 0usize;
    let mut sum: u64 = 0;
    let mut cnt = 0usize;
    let mut com = Vector3::zeros();
    loop {
        sum += core_size[head] as u64;
        com += input[head] - front;
        cnt += 1;
        head += 1;
        if !(2 * cnt * cnt < (interval * sum as f64) as usize
            && cnt + 1 < input.len() / min_num_points / 2)
        {
            break;
        }
    }

    // Trailing run.
    let mut tail = input.len() - 1;
    while cnt * cnt < (interval * sum as f64) as usize && cnt < input.len() / min_num_points {
        sum += core_size[tail] as u64;
        com += input[tail] - back;
        cnt += 1;
        tail -= 1;
    }

    if is_closed_loop {
        output.push_back(front + com / cnt as f64);
        output_core_size.push_back((sum / cnt as u64) as u32);
    }

    // Interior runs.
    let mut i = head;
    while i < tail {
        let mut sum2: u64 = 0;
        let mut cnt2 = 0usize;
        let mut com2 = Vector3::zeros();
        loop {
            sum2 += core_size[i] as u64;
            com2 += input[i].coords;
            cnt2 += 1;
            i += 1;
            if !(cnt2 * cnt2 < (interval * sum2 as f64) as usize
                && cnt2 < input.len() / min_num_points - 1
                && i != tail)
            {
                break;
            }
        }
        output.push_back(Point3::from(com2 / cnt2 as f64));
        output_core_size.push_back((sum2 / cnt2 as u64) as u32);
    }

    if !is_closed_loop {
        output.push_back(back);
        output_core_size.push_back(*core_size.back().unwrap());
    } else {
        output.push_back(back + com / cnt as f64);
        output_core_size.push_back((sum / cnt as u64) as u32);
    }

    debug_assert!(output.len() >= 2);
}

/// Two-pass lambda/mu Taubin filter. Endpoints of open lines are pinned;
/// loops wrap around. Short nearly-closed lines are left untouched.
pub fn smooth_dislocation_line(
    smoothing_level: usize,
    line: &mut VecDeque<Point3<f64>>,
    is_loop: bool,
) {
    if smoothing_level == 0 || line.len() <= 2 {
        return;
    }
    if line.len() <= 4 && (line[0] - line[line.len() - 1]).norm() <= CLOSED_LINE_TOLERANCE {
        return;
    }

    let lambda = TAUBIN_LAMBDA;
    let mu = 1.0 / (TAUBIN_K_PB - 1.0 / lambda);
    let passes = [lambda, mu];

    let mut laplacian = vec![Vector3::zeros(); line.len()];
    for _ in 0..smoothing_level {
        for weight in passes {
            compute_laplacian(&mut laplacian, line, is_loop);
            for (p, l) in line.iter_mut().zip(&laplacian) {
                *p += weight * l;
            }
        }
    }
}

fn compute_laplacian(
    laplacian: &mut [Vector3<f64>],
    line: &VecDeque<Point3<f64>>,
    is_loop: bool,
) {
    let n = line.len();
    for i in 0..n {
        let prev = (i + n - 1) % n;
        let next = (i + 1) % n;
        laplacian[i] = ((line[prev] - line[i]) + (line[next] - line[i])) * 0.5;
    }
    if !is_loop {
        laplacian[0] = Vector3::zeros();
        laplacian[n - 1] = Vector3::zeros();
    }
}
