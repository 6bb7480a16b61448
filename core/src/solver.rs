//! Least-squares multilateration of a 2D position from anchor distances.
//!
//! Given at least three anchor coordinates and one fused distance per anchor, the
//! solver minimizes the sum of squared differences between the modeled and measured
//! anchor distances. The objective is smooth but non-convex, so a deterministic
//! two-stage approach is used: a weighted-centroid initial guess that lands inside the
//! intersection region of the distance circles, refined by a derivative-free downhill
//! simplex (Nelder-Mead) search. No random restarts are attempted; a poor optimum
//! under degenerate anchor geometry is a normal outcome left to outlier
//! classification downstream.

use crate::ConfigError;
use nalgebra::Vector2;

/// Result of one multilateration solve.
///
/// Computed fresh per solve and never mutated afterwards. The residual and iteration
/// diagnostics describe the simplex run; downstream consumers only need `position`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionEstimate {
    /// Estimated 2D position in the anchor coordinate frame.
    pub position: Vector2<f64>,
    /// Objective value at convergence (sum of squared distance residuals, m^2).
    pub residual: f64,
    /// Simplex iterations taken.
    pub iterations: usize,
    /// Whether the simplex spread fell below tolerance before the iteration cap.
    pub converged: bool,
}

/// Downhill-simplex multilateration solver.
///
/// The tolerances are deliberately tight: with noise-free distances and
/// non-degenerate geometry the solve recovers the true position to well under a
/// micrometer, which the accuracy evaluation relies on as its floor.
#[derive(Debug, Clone, Copy)]
pub struct MultilaterationSolver {
    /// Iteration cap for the simplex search.
    pub max_iterations: usize,
    /// Termination threshold on the simplex vertex spread.
    pub position_tolerance: f64,
    /// Termination threshold on the objective spread across the simplex.
    pub residual_tolerance: f64,
}

impl Default for MultilaterationSolver {
    fn default() -> Self {
        MultilaterationSolver {
            max_iterations: 2000,
            position_tolerance: 1e-10,
            residual_tolerance: 1e-14,
        }
    }
}

// Standard Nelder-Mead coefficients.
const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

// Initial simplex displacement: 5% per nonzero coordinate, small absolute step at zero.
const INITIAL_STEP: f64 = 0.05;
const INITIAL_STEP_ZERO: f64 = 0.00025;

impl MultilaterationSolver {
    /// Solve for the position that best explains the measured anchor distances.
    ///
    /// # Arguments
    /// * `distances` - Fused distance estimate per anchor, in meters.
    /// * `anchors` - Anchor coordinates, in the same Cartesian frame as the output.
    ///
    /// # Returns
    /// * `Ok(PositionEstimate)` on any completed solve, converged or not.
    /// * `Err(ConfigError)` if fewer than three anchors are supplied or the counts
    ///   disagree; the solve is underdetermined and no numeric work is attempted.
    pub fn solve(
        &self,
        distances: &[f64],
        anchors: &[Vector2<f64>],
    ) -> Result<PositionEstimate, ConfigError> {
        if distances.len() != anchors.len() {
            return Err(ConfigError::DistanceCountMismatch {
                distances: distances.len(),
                anchors: anchors.len(),
            });
        }
        if anchors.len() < 3 {
            return Err(ConfigError::TooFewAnchors(anchors.len()));
        }
        let start = initial_guess(distances, anchors);
        Ok(self.nelder_mead(start, |x| objective(x, distances, anchors)))
    }

    /// Minimize `f` from `start` with the downhill simplex method.
    fn nelder_mead<F: Fn(&Vector2<f64>) -> f64>(
        &self,
        start: Vector2<f64>,
        f: F,
    ) -> PositionEstimate {
        // Initial simplex: the start point plus one per-coordinate displacement.
        let mut simplex: Vec<(Vector2<f64>, f64)> = Vec::with_capacity(3);
        simplex.push((start, f(&start)));
        for axis in 0..2 {
            let mut vertex = start;
            if vertex[axis] != 0.0 {
                vertex[axis] *= 1.0 + INITIAL_STEP;
            } else {
                vertex[axis] = INITIAL_STEP_ZERO;
            }
            simplex.push((vertex, f(&vertex)));
        }

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            let best = simplex[0];
            let spread = simplex[1..]
                .iter()
                .map(|(v, _)| (v - best.0).abs().max())
                .fold(0.0_f64, f64::max);
            let value_spread = simplex[1..]
                .iter()
                .map(|(_, fv)| (fv - best.1).abs())
                .fold(0.0_f64, f64::max);
            if spread <= self.position_tolerance && value_spread <= self.residual_tolerance {
                converged = true;
                break;
            }
            iterations += 1;

            let worst = simplex[2];
            let centroid = (simplex[0].0 + simplex[1].0) / 2.0;
            let reflected = centroid + REFLECTION * (centroid - worst.0);
            let f_reflected = f(&reflected);

            if f_reflected < simplex[0].1 {
                // Reflection found a new best; try to expand further.
                let expanded = centroid + EXPANSION * (reflected - centroid);
                let f_expanded = f(&expanded);
                simplex[2] = if f_expanded < f_reflected {
                    (expanded, f_expanded)
                } else {
                    (reflected, f_reflected)
                };
            } else if f_reflected < simplex[1].1 {
                simplex[2] = (reflected, f_reflected);
            } else {
                // Contract toward the better of the worst vertex and its reflection.
                let (toward, f_toward) = if f_reflected < worst.1 {
                    (reflected, f_reflected)
                } else {
                    (worst.0, worst.1)
                };
                let contracted = centroid + CONTRACTION * (toward - centroid);
                let f_contracted = f(&contracted);
                if f_contracted < f_toward {
                    simplex[2] = (contracted, f_contracted);
                } else {
                    // Shrink everything toward the best vertex.
                    for vertex in simplex.iter_mut().skip(1) {
                        vertex.0 = best.0 + SHRINK * (vertex.0 - best.0);
                        vertex.1 = f(&vertex.0);
                    }
                }
            }
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        PositionEstimate {
            position: simplex[0].0,
            residual: simplex[0].1,
            iterations,
            converged,
        }
    }
}

/// Solve with the default solver configuration.
pub fn multilaterate(
    distances: &[f64],
    anchors: &[Vector2<f64>],
) -> Result<PositionEstimate, ConfigError> {
    MultilaterationSolver::default().solve(distances, anchors)
}

/// Sum of squared differences between modeled and measured anchor distances.
fn objective(x: &Vector2<f64>, distances: &[f64], anchors: &[Vector2<f64>]) -> f64 {
    anchors
        .iter()
        .zip(distances)
        .map(|(anchor, d)| {
            let residual = (x - anchor).norm() - d;
            residual * residual
        })
        .sum()
}

/// Weighted centroid of the anchors approximating the circle-intersection region.
///
/// Anchor `i` gets weight `((n-1) * S) / (S - d_i)` with `S` the distance total; the
/// weight grows with the reported distance. The weighted sum is used as-is, without
/// normalization.
fn initial_guess(distances: &[f64], anchors: &[Vector2<f64>]) -> Vector2<f64> {
    let n = anchors.len() as f64;
    let total: f64 = distances.iter().sum();
    anchors
        .iter()
        .zip(distances)
        .map(|(anchor, d)| anchor * ((n - 1.0) * total) / (total - d))
        .sum()
}
