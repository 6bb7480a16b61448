//! Driver binary for the ranging-accuracy evaluation pipeline.
//!
//! Two subcommands wrap the library:
//! - `generate-map` synthesizes a wireless-error map for the network simulator.
//! - `evaluate` runs the fusion/multilateration/classification sweep over a
//!   directory of raw measurement files and writes the aggregate result CSV.

use clap::{Parser, Subcommand, ValueEnum};
use lateration::errormap::{
    Bounds, DEFAULT_BIAS, DEFAULT_DECORRELATION, DEFAULT_RESOLUTION, ErrorField, FieldMode,
};
use lateration::fusion::{CorrectionTable, FusionMode};
use lateration::results::{DEFAULT_OUTLIER_THRESHOLD, ResultRecord};
use lateration::sim::{
    DEFAULT_SAMPLE_COUNTS, SAMPLES_PER_POSITION, evaluate_trial, load_johnsonsu_params,
    load_measurement_file,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lateration", about = "FTM ranging accuracy evaluation", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a wireless-error map for the simulator.
    GenerateMap {
        /// Minimum and maximum value for the x axis.
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], conflicts_with = "x")]
        xminmax: Option<Vec<f64>>,
        /// Symmetrical x axis [-x/2, x/2].
        #[arg(long)]
        x: Option<f64>,
        /// Minimum and maximum value for the y axis.
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], conflicts_with = "y")]
        yminmax: Option<Vec<f64>>,
        /// Symmetrical y axis [-y/2, y/2].
        #[arg(long)]
        y: Option<f64>,
        /// Both axes symmetrical: [-dim/2, dim/2]. Overrides the per-axis options.
        #[arg(long)]
        dim: Option<f64>,
        /// Peak-to-peak bias amplitude in picoseconds (uniform mode).
        #[arg(long, default_value_t = DEFAULT_BIAS)]
        bias: f64,
        /// Decorrelation distance between two points, meters.
        #[arg(long, default_value_t = DEFAULT_DECORRELATION)]
        dcorr: f64,
        /// Fine grid resolution, meters.
        #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
        resolution: f64,
        /// Draw the bias from the heavy-multipath distribution instead of the
        /// uniform envelope; the bias amplitude is ignored.
        #[arg(long)]
        heavy_multipath: bool,
        /// Seed for the field draws; omit for a fresh field every run.
        #[arg(long)]
        seed: Option<u64>,
        /// Output map file.
        #[arg(short, long, default_value = "FTM_Wireless_Error.map")]
        output: PathBuf,
    },
    /// Evaluate measurement files and write the aggregate result CSV.
    Evaluate {
        /// Directory of trial measurement files (one file per trial).
        input: PathBuf,
        /// Configuration tag recorded with every result row.
        #[arg(long, default_value = "wireless_20MHz")]
        tag: String,
        /// Fusion strategy.
        #[arg(long, value_enum, default_value_t = ModeArg::Mean)]
        mode: ModeArg,
        /// Johnson SU parameter table for the bias-corrected mode.
        #[arg(long)]
        johnsonsu: Option<PathBuf>,
        /// Samples recorded per anchor position in the input files.
        #[arg(long, default_value_t = SAMPLES_PER_POSITION)]
        samples_per_position: usize,
        /// Outlier threshold in meters.
        #[arg(long, default_value_t = DEFAULT_OUTLIER_THRESHOLD)]
        threshold: f64,
        /// Seed for the correction-table sampling.
        #[arg(long)]
        seed: Option<u64>,
        /// Output CSV path.
        #[arg(short, long, default_value = "results.csv")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Arithmetic mean of the RTT samples.
    Mean,
    /// Mean RTT with the Johnson SU bias correction.
    Corrected,
    /// Signal-strength weighted fusion.
    Weighted,
}

impl From<ModeArg> for FusionMode {
    fn from(mode: ModeArg) -> FusionMode {
        match mode {
            ModeArg::Mean => FusionMode::Mean,
            ModeArg::Corrected => FusionMode::BiasCorrected,
            ModeArg::Weighted => FusionMode::SignalWeighted,
        }
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn generate_map(
    xminmax: Option<Vec<f64>>,
    x: Option<f64>,
    yminmax: Option<Vec<f64>>,
    y: Option<f64>,
    dim: Option<f64>,
    bias: f64,
    dcorr: f64,
    resolution: f64,
    heavy_multipath: bool,
    seed: Option<u64>,
    output: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let extent = |pair: Option<Vec<f64>>, sym: Option<f64>| -> Option<(f64, f64)> {
        if let Some(dim) = dim {
            return Some((-dim / 2.0, dim / 2.0));
        }
        if let Some(sym) = sym {
            return Some((-sym / 2.0, sym / 2.0));
        }
        pair.map(|p| (p[0], p[1]))
    };
    let bounds = Bounds::new(extent(xminmax, x), extent(yminmax, y))?;

    let mode = if heavy_multipath {
        FieldMode::HeavyMultipath
    } else {
        FieldMode::Uniform { amplitude: bias }
    };
    let mut rng = seeded_rng(seed);
    let field = ErrorField::generate(bounds, dcorr, resolution, mode, &mut rng);
    field.to_file(&output)?;
    println!(
        "Wrote {}x{} map to {}",
        field.values.nrows(),
        field.values.ncols(),
        output.display()
    );
    Ok(())
}

fn evaluate(
    input: PathBuf,
    tag: String,
    mode: ModeArg,
    johnsonsu: Option<PathBuf>,
    samples_per_position: usize,
    threshold: f64,
    seed: Option<u64>,
    output: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let table = match johnsonsu {
        Some(path) => {
            let params = load_johnsonsu_params(path)?;
            let mut rng = seeded_rng(seed);
            Some(CorrectionTable::from_distributions(&params, &mut rng))
        }
        None => None,
    };

    let mut trial_files: Vec<PathBuf> = std::fs::read_dir(&input)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    trial_files.sort();

    let mut records: Vec<ResultRecord> = Vec::new();
    for (index, path) in trial_files.iter().enumerate() {
        let trial = index as u32 + 1;
        let blocks = load_measurement_file(path, samples_per_position)?;
        match evaluate_trial(
            &blocks,
            &DEFAULT_SAMPLE_COUNTS,
            mode.into(),
            table.as_ref(),
            &tag,
            trial,
            threshold,
        ) {
            Ok(trial_records) => records.extend(trial_records),
            Err(err) => {
                eprintln!("skipping {}: {}", path.display(), err);
            }
        }
    }

    let outliers = records.iter().filter(|record| record.outlier).count();
    ResultRecord::to_csv(&records, &output)?;
    println!(
        "Evaluated {} trials: {} records ({} outliers) written to {}",
        trial_files.len(),
        records.len(),
        outliers,
        output.display()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::GenerateMap {
            xminmax,
            x,
            yminmax,
            y,
            dim,
            bias,
            dcorr,
            resolution,
            heavy_multipath,
            seed,
            output,
        } => generate_map(
            xminmax,
            x,
            yminmax,
            y,
            dim,
            bias,
            dcorr,
            resolution,
            heavy_multipath,
            seed,
            output,
        ),
        Command::Evaluate {
            input,
            tag,
            mode,
            johnsonsu,
            samples_per_position,
            threshold,
            seed,
            output,
        } => evaluate(
            input,
            tag,
            mode,
            johnsonsu,
            samples_per_position,
            threshold,
            seed,
            output,
        ),
    }
}
