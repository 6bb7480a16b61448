//! Measurement-file loading and the batch evaluation sweep.
//!
//! The external network simulator writes one file per trial: whitespace-delimited rows
//! of `rtt rssi anchor_x anchor_y`, grouped into fixed-size blocks of consecutive
//! samples against one anchor position. This module parses those files into
//! [`PositionBlock`]s and drives the estimation pipeline over them, sweeping the
//! number of anchors and the number of fused samples per anchor to measure how
//! localization accuracy scales with both.
//!
//! Trials are independent work items: `evaluate_trial` is a pure function of its
//! inputs, so a caller may fan trials out across threads without coordination. The
//! bundled driver binary runs them sequentially.

use crate::fusion::{CorrectionTable, FusionMode, JohnsonSu, fuse};
use crate::results::{ResultRecord, classify};
use crate::solver::MultilaterationSolver;
use crate::{ConfigError, MeasurementBatch};
use nalgebra::Vector2;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Ranging samples recorded per anchor position in the simulator runs.
pub const SAMPLES_PER_POSITION: usize = 39;
/// Sample-count prefixes swept by the evaluation.
pub const DEFAULT_SAMPLE_COUNTS: [usize; 6] = [1, 2, 4, 8, 16, 39];

/// Raw measurements against one anchor: its coordinate plus the sample batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionBlock {
    pub anchor: Vector2<f64>,
    pub batch: MeasurementBatch,
}

/// Parse one trial file into position blocks.
///
/// Rows are `rtt rssi anchor_x anchor_y`; every `samples_per_position` consecutive
/// rows form one block, whose anchor coordinate is read from the block's first row.
/// A trailing partial block is kept with the samples it has; rows that fail to
/// parse are an error.
///
/// # Arguments
/// * `path` - Trial file to read.
/// * `samples_per_position` - Block size in rows; [`SAMPLES_PER_POSITION`] for the
///   standard runs.
pub fn load_measurement_file<P: AsRef<Path>>(
    path: P,
    samples_per_position: usize,
) -> Result<Vec<PositionBlock>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows: Vec<[f64; 4]> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<f64>, _>>()?;
        if fields.len() < 4 {
            return Err(format!("measurement row has {} columns, expected 4", fields.len()).into());
        }
        rows.push([fields[0], fields[1], fields[2], fields[3]]);
    }

    let mut blocks = Vec::new();
    for chunk in rows.chunks(samples_per_position) {
        let anchor = Vector2::new(chunk[0][2], chunk[0][3]);
        let rtt: Vec<f64> = chunk.iter().map(|row| row[0]).collect();
        let rssi: Vec<f64> = chunk.iter().map(|row| row[1]).collect();
        blocks.push(PositionBlock {
            anchor,
            batch: MeasurementBatch::new(rtt, rssi)?,
        });
    }
    Ok(blocks)
}

/// Load the fitted Johnson SU parameter table for the correction buckets.
///
/// One row per signal-strength bucket: column 0 is the integer bucket key and
/// columns 2 through 5 are the distribution parameters (a, b, location, scale).
pub fn load_johnsonsu_params<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<JohnsonSu>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<f64>, _>>()?;
        if fields.len() < 6 {
            return Err(format!("parameter row has {} columns, expected 6", fields.len()).into());
        }
        rows.push(JohnsonSu {
            bucket: fields[0] as i32,
            a: fields[2],
            b: fields[3],
            location: fields[4],
            scale: fields[5],
        });
    }
    Ok(rows)
}

/// Run the estimation pipeline over one trial's blocks.
///
/// For every anchor-count prefix from 3 up to the full block list, and every
/// sample-count in `sample_counts`, the blocks' batches are fused into distances,
/// multilaterated, and classified, yielding one [`ResultRecord`] per combination.
///
/// # Arguments
/// * `blocks` - The trial's position blocks, in file order.
/// * `sample_counts` - Sample prefixes to fuse per anchor (clamped to batch length).
/// * `mode` - Fusion strategy for this error model.
/// * `table` - Bias corrections, used by [`FusionMode::BiasCorrected`].
/// * `tag` - Configuration tag copied into each record.
/// * `trial` - Trial identifier copied into each record.
/// * `outlier_threshold` - Classification threshold in meters.
///
/// # Returns
/// * `Ok(Vec<ResultRecord>)` with `(len(blocks) - 2) * len(sample_counts)` records.
/// * `Err(ConfigError)` if fewer than three blocks are available.
pub fn evaluate_trial(
    blocks: &[PositionBlock],
    sample_counts: &[usize],
    mode: FusionMode,
    table: Option<&CorrectionTable>,
    tag: &str,
    trial: u32,
    outlier_threshold: f64,
) -> Result<Vec<ResultRecord>, ConfigError> {
    if blocks.len() < 3 {
        return Err(ConfigError::TooFewAnchors(blocks.len()));
    }
    let solver = MultilaterationSolver::default();
    let mut records = Vec::with_capacity((blocks.len() - 2) * sample_counts.len());
    for anchors_used in 3..=blocks.len() {
        let subset = &blocks[..anchors_used];
        let anchors: Vec<Vector2<f64>> = subset.iter().map(|block| block.anchor).collect();
        for &count in sample_counts {
            let distances: Vec<f64> = subset
                .iter()
                .map(|block| fuse(&block.batch.prefix(count), mode, table))
                .collect();
            let estimate = solver.solve(&distances, &anchors)?;
            records.push(classify(
                tag,
                count,
                trial,
                anchors_used,
                &estimate,
                outlier_threshold,
            ));
        }
    }
    Ok(records)
}
