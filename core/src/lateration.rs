//! Positioning-accuracy evaluation toolbox for FTM-style distance ranging
//!
//! This crate provides the numeric estimation pipeline used to evaluate how accurately a
//! round-trip-time (RTT) ranging protocol can localize a mobile node from a set of fixed
//! anchors. The pipeline has three independent stages plus a classification step:
//!
//! - [`errormap`]: synthesizes a spatially-correlated ranging-error field ("wireless error
//!   map") that emulates multipath propagation over a bounded 2D area. The field is an
//!   input to the external network simulator that produces the raw measurement files; it
//!   is not consumed by the other stages.
//! - [`fusion`]: fuses a batch of repeated RTT/signal-strength samples for one anchor into
//!   a single distance estimate, optionally correcting a signal-strength-dependent bias or
//!   weighting samples by their link quality.
//! - [`solver`]: solves the 2D position of the mobile node from anchor coordinates and
//!   fused distances by nonlinear least squares (downhill simplex).
//! - [`results`]: computes the Euclidean position error against the ground truth (the
//!   coordinate-frame origin by construction of the measurement scenarios) and flags
//!   outlier solves for separate diagnostic handling.
//!
//! The [`sim`] module ties the stages together for batch evaluation: it loads raw
//! measurement files produced by the simulator and sweeps anchor-count and sample-count
//! combinations through fusion, solving, and classification.
//!
//! Primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra) for the vector
//! and grid math, with [`rand`](https://crates.io/crates/rand) /
//! [`rand_distr`](https://crates.io/crates/rand_distr) supplying the statistical sampling.
//! All randomized operations take a caller-provided `Rng` so that a seeded generator
//! reproduces a field or correction table exactly.
//!
//! Raw RTT samples are in picoseconds throughout; distances are meters. The fixed
//! propagation speed constant ([`PROPAGATION_SPEED`]) converts between the two domains.

pub mod errormap;
pub mod fusion;
pub mod results;
pub mod sim;
pub mod solver;

use std::fmt::Display;

/// Propagation speed used for the RTT-to-distance conversion, in meters per nanosecond.
pub const PROPAGATION_SPEED: f64 = 0.3;

/// Round a value to two decimal places (centimeter resolution for distances in meters).
#[inline]
pub fn round_cm(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Configuration errors detected before any numeric work is performed.
///
/// These cover the precondition violations of the pipeline: degenerate field bounds,
/// an underdetermined solve, and malformed measurement batches. Numeric degeneracy
/// (e.g. a poor optimum under near-collinear anchor geometry) is deliberately *not* an
/// error; it is a normal outcome handled by outlier classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Both extents of the named axis are unset; the field bounds are degenerate.
    DegenerateBounds(&'static str),
    /// Fewer than three anchors were supplied; a 2D solve is underdetermined.
    TooFewAnchors(usize),
    /// The number of fused distances does not match the number of anchors.
    DistanceCountMismatch { distances: usize, anchors: usize },
    /// The RTT and signal-strength sample sequences differ in length.
    BatchLengthMismatch { rtt: usize, rssi: usize },
    /// A measurement batch contained no samples.
    EmptyBatch,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::DegenerateBounds(axis) => {
                write!(f, "no extent provided for the {axis} axis; both axes are required")
            }
            ConfigError::TooFewAnchors(n) => {
                write!(f, "multilateration requires at least 3 anchors, got {n}")
            }
            ConfigError::DistanceCountMismatch { distances, anchors } => {
                write!(f, "got {distances} distances for {anchors} anchors")
            }
            ConfigError::BatchLengthMismatch { rtt, rssi } => {
                write!(f, "batch has {rtt} RTT samples but {rssi} signal-strength samples")
            }
            ConfigError::EmptyBatch => write!(f, "measurement batch is empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A batch of raw ranging samples between the mobile node and one anchor.
///
/// Holds two equal-length sample sequences in sampling order: round-trip times in
/// picoseconds and the signal strength (RSSI, dB) observed for each exchange. The
/// constructor enforces the batch invariants so the fusion step can assume a
/// well-formed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementBatch {
    rtt: Vec<f64>,
    rssi: Vec<f64>,
}

impl MeasurementBatch {
    /// Create a batch from RTT and signal-strength sample sequences.
    ///
    /// # Arguments
    /// * `rtt` - Round-trip-time samples in picoseconds.
    /// * `rssi` - Signal-strength samples in dB, one per RTT sample.
    ///
    /// # Returns
    /// * `Ok(MeasurementBatch)` if both sequences are non-empty and equal in length.
    /// * `Err(ConfigError)` otherwise.
    pub fn new(rtt: Vec<f64>, rssi: Vec<f64>) -> Result<Self, ConfigError> {
        if rtt.len() != rssi.len() {
            return Err(ConfigError::BatchLengthMismatch {
                rtt: rtt.len(),
                rssi: rssi.len(),
            });
        }
        if rtt.is_empty() {
            return Err(ConfigError::EmptyBatch);
        }
        Ok(MeasurementBatch { rtt, rssi })
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.rtt.len()
    }

    /// Whether the batch is empty. Always false for a constructed batch; provided for
    /// API completeness.
    pub fn is_empty(&self) -> bool {
        self.rtt.is_empty()
    }

    /// Round-trip-time samples in picoseconds.
    pub fn rtt(&self) -> &[f64] {
        &self.rtt
    }

    /// Signal-strength samples in dB.
    pub fn rssi(&self) -> &[f64] {
        &self.rssi
    }

    /// A new batch containing the first `count` samples (clamped to the batch length).
    ///
    /// The evaluation sweep uses this to measure accuracy as a function of how many
    /// FTM exchanges are fused per anchor.
    pub fn prefix(&self, count: usize) -> MeasurementBatch {
        let n = count.clamp(1, self.rtt.len());
        MeasurementBatch {
            rtt: self.rtt[..n].to_vec(),
            rssi: self.rssi[..n].to_vec(),
        }
    }
}

impl Display for MeasurementBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MeasurementBatch {{ samples: {}, mean rtt: {:.1} ps, mean rssi: {:.1} dB }}",
            self.len(),
            self.rtt.iter().sum::<f64>() / self.rtt.len() as f64,
            self.rssi.iter().sum::<f64>() / self.rssi.len() as f64,
        )
    }
}
