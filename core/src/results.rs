//! Classification and aggregate output of localization results.
//!
//! Every solve is scored against the ground truth, which is the coordinate-frame
//! origin by construction of the measurement scenarios: the mobile node sits at the
//! origin and the anchor coordinates are expressed relative to it. A solve whose
//! Euclidean error exceeds the outlier threshold is flagged rather than dropped, so
//! downstream reporting can route it to diagnostic handling (e.g. plotting the
//! distance circles) instead of letting a few degenerate solves skew the summary
//! distributions.

use crate::round_cm;
use crate::solver::PositionEstimate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Position error above which a solve is routed to diagnostics, in meters.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 2.0;

/// One classified localization attempt.
///
/// Field names mirror the aggregate CSV columns consumed by the external reporting
/// tools: `positions` is the anchor count used for the solve and `ftms` the number of
/// ranging samples fused per anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Configuration tag (error model / channel bandwidth).
    pub bandwidth: String,
    /// Number of anchors used in the solve.
    pub positions: usize,
    /// Euclidean distance from the estimate to the origin, centimeter resolution.
    pub euclidean_error: f64,
    /// Ranging samples fused per anchor.
    pub ftms: usize,
    /// Trial identifier (the simulator seed of the run).
    pub seed: u32,
    /// Estimated x coordinate, meters.
    pub x_calculated: f64,
    /// Estimated y coordinate, meters.
    pub y_calculated: f64,
    /// Whether the error exceeds the outlier threshold (strictly).
    pub outlier: bool,
}

/// Classify one solve against the outlier threshold.
///
/// The position error is `round(||estimate||, 2)`; a record is an outlier iff the
/// error is strictly greater than the threshold, so a result exactly on the
/// threshold stays in the primary statistics.
pub fn classify(
    tag: &str,
    ftms: usize,
    trial: u32,
    anchors: usize,
    estimate: &PositionEstimate,
    outlier_threshold: f64,
) -> ResultRecord {
    let error = round_cm(estimate.position.norm());
    ResultRecord {
        bandwidth: tag.to_string(),
        positions: anchors,
        euclidean_error: error,
        ftms,
        seed: trial,
        x_calculated: round5(estimate.position.x),
        y_calculated: round5(estimate.position.y),
        outlier: error > outlier_threshold,
    }
}

/// Round to five decimal places, the resolution of the reported coordinates.
#[inline]
fn round5(value: f64) -> f64 {
    (value * 1e5).round() / 1e5
}

impl ResultRecord {
    /// Write records as the semicolon-delimited aggregate CSV.
    ///
    /// # Arguments
    /// * `records` - Records to write, one row each.
    /// * `path` - Destination path; overwritten if present.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read records back from the aggregate CSV.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .from_path(path)?;
        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    fn estimate_at(x: f64, y: f64) -> PositionEstimate {
        PositionEstimate {
            position: Vector2::new(x, y),
            residual: 0.0,
            iterations: 0,
            converged: true,
        }
    }

    /// A record is flagged iff its error strictly exceeds the threshold.
    #[test]
    fn test_outlier_strict_inequality() {
        let inside = classify("wireless_20MHz", 8, 1, 4, &estimate_at(0.3, 0.4), 2.0);
        assert_eq!(inside.euclidean_error, 0.5);
        assert!(!inside.outlier);

        // Error exactly on the threshold is not an outlier.
        let boundary = classify("wireless_20MHz", 8, 1, 4, &estimate_at(2.0, 0.0), 2.0);
        assert_eq!(boundary.euclidean_error, 2.0);
        assert!(!boundary.outlier);

        let outside = classify("wireless_20MHz", 8, 1, 4, &estimate_at(2.01, 0.0), 2.0);
        assert!(outside.outlier);
    }

    /// Classification carries the configuration tag and rounds coordinates.
    #[test]
    fn test_classify_fields() {
        let record = classify("wired_40MHz", 16, 7, 5, &estimate_at(1.234567, -0.765432), 2.0);
        assert_eq!(record.bandwidth, "wired_40MHz");
        assert_eq!(record.positions, 5);
        assert_eq!(record.ftms, 16);
        assert_eq!(record.seed, 7);
        assert_eq!(record.x_calculated, 1.23457);
        assert_eq!(record.y_calculated, -0.76543);
    }

    /// Records round-trip through the semicolon-delimited CSV encoding.
    #[test]
    fn test_result_csv_round_trip() {
        let records = vec![
            classify("wireless_20MHz", 2, 1, 3, &estimate_at(0.1, -0.2), 2.0),
            classify("wireless_20MHz", 39, 2, 10, &estimate_at(3.5, 1.0), 2.0),
        ];
        let path = std::env::temp_dir().join("lateration_test_results.csv");
        ResultRecord::to_csv(&records, &path).expect("failed to write results");
        let read = ResultRecord::from_csv(&path).expect("failed to read results");
        let _ = std::fs::remove_file(&path);
        assert_eq!(read, records);
        assert!(read[1].outlier);
    }
}
