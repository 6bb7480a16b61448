//! End-to-end integration tests for the ranging evaluation pipeline.
//!
//! These tests exercise the full path the driver binary takes: synthesize an error
//! map and round-trip it through the on-disk encoding, write a raw measurement file
//! and load it back, and run fusion, multilateration, and classification together on
//! analytically constructed scenarios with a known ground truth. Tolerances on the
//! noise-free solves reflect the solver's convergence floor, not measurement physics.

use assert_approx_eq::assert_approx_eq;
use nalgebra::Vector2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::io::Write;

use lateration::errormap::{Bounds, ErrorField, FieldMode};
use lateration::fusion::{FusionMode, fuse};
use lateration::results::classify;
use lateration::sim::{PositionBlock, evaluate_trial, load_measurement_file};
use lateration::solver::multilaterate;
use lateration::{MeasurementBatch, PROPAGATION_SPEED};

/// Round-trip RTT in picoseconds for a one-way distance in meters.
fn meters_to_rtt(meters: f64) -> f64 {
    meters * 2.0 * 1000.0 / PROPAGATION_SPEED
}

/// Four anchors on the axes at 5 m, true position (1, 1), noise-free distances:
/// the solver recovers the true point to numerical tolerance.
#[test]
fn test_square_anchor_scenario() {
    let anchors = vec![
        Vector2::new(5.0, 0.0),
        Vector2::new(-5.0, 0.0),
        Vector2::new(0.0, 5.0),
        Vector2::new(0.0, -5.0),
    ];
    let truth = Vector2::new(1.0, 1.0);
    let distances: Vec<f64> = anchors.iter().map(|a| (truth - a).norm()).collect();

    let estimate = multilaterate(&distances, &anchors).expect("solve failed");
    assert!(estimate.converged);
    assert_approx_eq!(estimate.position.x, 1.0, 1e-6);
    assert_approx_eq!(estimate.position.y, 1.0, 1e-6);

    // The same scenario classified against the standard threshold: sqrt(2) < 2.
    let record = classify("wired_20MHz", 39, 1, anchors.len(), &estimate, 2.0);
    assert_eq!(record.euclidean_error, 1.41);
    assert!(!record.outlier);
}

/// An identical-sample batch fuses to the fixed-constant conversion of one sample:
/// rtt 100 ps gives round(100/2000 * 0.3, 2) = 0.02 m.
#[test]
fn test_baseline_fusion_constant() {
    let batch = MeasurementBatch::new(vec![100.0, 100.0, 100.0], vec![-40.0, -45.0, -50.0])
        .expect("valid batch");
    assert_eq!(fuse(&batch, FusionMode::Mean, None), 0.02);
}

/// Field generation is reproducible under an explicit seed and survives the map
/// encoding, including through a consumer's nearest-cell lookup.
#[test]
fn test_error_map_generation_and_encoding() {
    let bounds = Bounds::new(Some((-10.0, 10.0)), Some((-10.0, 10.0))).expect("valid bounds");
    let mode = FieldMode::Uniform { amplitude: 10_000.0 };
    let field = ErrorField::generate(bounds, 0.25, 0.05, mode, &mut StdRng::seed_from_u64(17));
    let again = ErrorField::generate(bounds, 0.25, 0.05, mode, &mut StdRng::seed_from_u64(17));
    assert_eq!(field.values, again.values);

    // 20 m extent: 81 coarse nodes at 0.25 m, 401 fine bins at 0.05 m.
    assert_eq!(field.values.nrows(), 401);
    assert_eq!(field.values.ncols(), 401);

    let path = std::env::temp_dir().join("lateration_integration.map");
    field.to_file(&path).expect("failed to write map");
    let read = ErrorField::from_file(&path).expect("failed to read map");
    let _ = std::fs::remove_file(&path);

    assert_eq!(read.bounds, field.bounds);
    for (a, b) in read.values.iter().zip(field.values.iter()) {
        assert_approx_eq!(a, b, 1e-12);
    }
    assert_approx_eq!(read.value_at(-3.35, 4.6), field.value_at(-3.35, 4.6), 1e-12);
}

/// A measurement file written in the simulator's format feeds the whole sweep and
/// localizes the noise-free mobile node at the origin.
#[test]
fn test_measurement_file_to_records() {
    let anchors = [
        Vector2::new(6.0, 2.0),
        Vector2::new(-4.0, 3.0),
        Vector2::new(1.0, -5.0),
        Vector2::new(-2.0, -6.0),
    ];
    let samples_per_position = 5;
    let mut contents = String::new();
    for anchor in &anchors {
        let rtt = meters_to_rtt(anchor.norm());
        for sample in 0..samples_per_position {
            // small zero-mean perturbation so samples are not all identical
            let jitter = (sample as f64 - 2.0) * 10.0;
            contents.push_str(&format!(
                "{} {} {} {}\n",
                rtt + jitter,
                -45.0 - sample as f64,
                anchor.x,
                anchor.y
            ));
        }
    }
    let path = std::env::temp_dir().join("lateration_integration_trial.txt");
    let mut file = std::fs::File::create(&path).expect("failed to create trial file");
    file.write_all(contents.as_bytes()).expect("failed to write trial file");
    drop(file);

    let blocks = load_measurement_file(&path, samples_per_position).expect("failed to load");
    let _ = std::fs::remove_file(&path);
    assert_eq!(blocks.len(), anchors.len());
    assert_eq!(blocks[2].anchor, anchors[2]);

    let records = evaluate_trial(
        &blocks,
        &[1, 5],
        FusionMode::Mean,
        None,
        "wireless_40MHz",
        3,
        2.0,
    )
    .expect("sweep failed");
    // anchor counts 3 and 4, sample counts 1 and 5
    assert_eq!(records.len(), 4);
    for record in &records {
        assert_eq!(record.bandwidth, "wireless_40MHz");
        assert_eq!(record.seed, 3);
        // centimeter-level rounding plus the +/- 20 ps jitter keeps errors small
        assert!(record.euclidean_error < 0.1, "error {}", record.euclidean_error);
        assert!(!record.outlier);
    }
}

/// Signal-strength weighting shifts the fused distance toward the strong samples in
/// an end-to-end solve, without breaking the origin recovery.
#[test]
fn test_weighted_fusion_end_to_end() {
    let anchors = [
        Vector2::new(5.0, 0.0),
        Vector2::new(0.0, 5.0),
        Vector2::new(-5.0, -5.0),
    ];
    let blocks: Vec<PositionBlock> = anchors
        .iter()
        .map(|anchor| {
            let rtt_true = meters_to_rtt(anchor.norm());
            // One strong accurate sample, one weak sample with a large bias.
            let batch = MeasurementBatch::new(
                vec![rtt_true, rtt_true + 5000.0],
                vec![-35.0, -70.0],
            )
            .expect("valid batch");
            PositionBlock { anchor: *anchor, batch }
        })
        .collect();

    let weighted = evaluate_trial(
        &blocks,
        &[2],
        FusionMode::SignalWeighted,
        None,
        "sig_str_fading",
        1,
        2.0,
    )
    .expect("weighted sweep failed");
    let plain = evaluate_trial(&blocks, &[2], FusionMode::Mean, None, "sig_str_fading", 1, 2.0)
        .expect("mean sweep failed");

    // The weak samples are 5 ns off (0.75 m one-way); weighting suppresses them.
    assert!(weighted[0].euclidean_error < 0.05);
    assert!(plain[0].euclidean_error > weighted[0].euclidean_error);
}
