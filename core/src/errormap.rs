//! Spatially-correlated ranging-error field synthesis ("wireless error map").
//!
//! The external network simulator models multipath propagation as a per-location timing
//! bias added to every raw RTT sample. This module generates that bias field: independent
//! random draws on a coarse grid whose spacing is the decorrelation distance, upsampled to
//! a fine evaluation grid by bicubic interpolation. Points closer than the decorrelation
//! distance share interpolation support and are therefore correlated; points much further
//! apart are effectively independent draws.
//!
//! The module also owns the on-disk map encoding: a single `key=value` header line
//! followed by the fine grid as a whitespace-delimited matrix (rows = y bins, columns =
//! x bins). Cell `(i, j)` maps to the coordinate `(xmin + j*resolution, ymin +
//! i*resolution)`; any consumer must parse the header to recover this mapping before
//! indexing the matrix.

use crate::ConfigError;
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Exp, Normal};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Default peak-to-peak bias amplitude for the uniform mode, in picoseconds.
pub const DEFAULT_BIAS: f64 = 10_000.0;
/// Default decorrelation distance between coarse grid nodes, in meters.
pub const DEFAULT_DECORRELATION: f64 = 0.25;
/// Default fine-grid resolution, in meters.
pub const DEFAULT_RESOLUTION: f64 = 0.01;

// Exponentially-modified Gaussian fitted offline to measured ranging errors in a heavy
// multipath environment. Shape K, location, and scale are in the distance domain; the
// unit factor rescales draws to picosecond RTT bias.
const EMG_SHAPE: f64 = 1.9422496573694217;
const EMG_LOCATION: f64 = -1.6435585024441102;
const EMG_SCALE: f64 = 0.8462059922427465;
const EMG_UNIT_FACTOR: f64 = 100.0 / 0.03;

/// Rectangular field domain `[xmin, xmax] x [ymin, ymax]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Bounds {
    /// Build bounds from optional per-axis extents.
    ///
    /// Both axes must be supplied; a missing axis is a configuration error, not a
    /// silently-applied default.
    pub fn new(x: Option<(f64, f64)>, y: Option<(f64, f64)>) -> Result<Bounds, ConfigError> {
        let (xmin, xmax) = x.ok_or(ConfigError::DegenerateBounds("x"))?;
        let (ymin, ymax) = y.ok_or(ConfigError::DegenerateBounds("y"))?;
        Ok(Bounds { xmin, xmax, ymin, ymax })
    }

    /// Square bounds `[-dim/2, dim/2]` on both axes.
    pub fn square(dim: f64) -> Bounds {
        Bounds {
            xmin: -dim / 2.0,
            xmax: dim / 2.0,
            ymin: -dim / 2.0,
            ymax: dim / 2.0,
        }
    }

    /// Extent of the x axis.
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Extent of the y axis.
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }
}

/// Statistical model used for the per-node coarse-grid draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldMode {
    /// Bias uniform in `[-amplitude/2, +amplitude/2]` picoseconds.
    Uniform { amplitude: f64 },
    /// Exponentially-modified Gaussian calibrated from heavy-multipath measurements.
    /// The uniform amplitude is ignored in this mode.
    HeavyMultipath,
}

/// A generated ranging-error field over a rectangular domain.
///
/// Immutable after generation. `values` is the fine grid with rows indexed by y bin and
/// columns by x bin; `bias`, `decorrelation`, and `resolution` record the generation
/// parameters so the coordinate-to-cell mapping can be reconstructed by consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorField {
    pub bounds: Bounds,
    pub bias: f64,
    pub decorrelation: f64,
    pub resolution: f64,
    pub values: DMatrix<f64>,
}

/// Number of grid nodes covering `extent` at the given spacing: `round(extent/spacing)+1`.
#[inline]
pub fn grid_nodes(extent: f64, spacing: f64) -> usize {
    (extent / spacing).round() as usize + 1
}

/// One draw from the fitted exponentially-modified Gaussian, in picoseconds.
///
/// An EMG variate is a Gaussian plus an independent exponential tail:
/// `location + scale * (Z + K * E)` with `Z ~ N(0,1)` and `E ~ Exp(1)`.
fn emg_sample<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let normal = Normal::new(EMG_LOCATION, EMG_SCALE).unwrap();
    let exp = Exp::new(1.0).unwrap();
    (normal.sample(rng) + EMG_SCALE * EMG_SHAPE * exp.sample(rng)) * EMG_UNIT_FACTOR
}

/// Catmull-Rom cubic through four equally spaced samples, evaluated at `u` in `[0, 1]`
/// between `p1` and `p2`. Passes through the samples exactly at `u = 0` and `u = 1`.
fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, u: f64) -> f64 {
    0.5 * (2.0 * p1
        + (p2 - p0) * u
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * u * u
        + (3.0 * p1 - p0 - 3.0 * p2 + p3) * u * u * u)
}

impl ErrorField {
    /// Generate a field by drawing the coarse grid and upsampling to the fine grid.
    ///
    /// The coarse grid spans the bounds with node spacing `decorrelation`; every node
    /// gets an independent draw from the mode's distribution. The fine grid (spacing
    /// `resolution`) is produced by separable bicubic interpolation over the coarse
    /// nodes, so it passes through the coarse samples at coarse-aligned coordinates.
    ///
    /// # Arguments
    /// * `bounds` - Field domain (validated at construction).
    /// * `decorrelation` - Coarse node spacing in meters.
    /// * `resolution` - Fine grid spacing in meters.
    /// * `mode` - Per-node draw distribution.
    /// * `rng` - Random source; pass a seeded generator for a reproducible field.
    pub fn generate<R: Rng + ?Sized>(
        bounds: Bounds,
        decorrelation: f64,
        resolution: f64,
        mode: FieldMode,
        rng: &mut R,
    ) -> ErrorField {
        let coarse_cols = grid_nodes(bounds.width(), decorrelation);
        let coarse_rows = grid_nodes(bounds.height(), decorrelation);
        let mut coarse = DMatrix::zeros(coarse_rows, coarse_cols);
        for row in 0..coarse_rows {
            for col in 0..coarse_cols {
                coarse[(row, col)] = match mode {
                    FieldMode::Uniform { amplitude } => {
                        rng.random_range(-amplitude / 2.0..amplitude / 2.0)
                    }
                    FieldMode::HeavyMultipath => emg_sample(rng),
                };
            }
        }

        let fine_cols = grid_nodes(bounds.width(), resolution);
        let fine_rows = grid_nodes(bounds.height(), resolution);
        let values = upsample_bicubic(&coarse, fine_rows, fine_cols);

        let bias = match mode {
            FieldMode::Uniform { amplitude } => amplitude,
            FieldMode::HeavyMultipath => DEFAULT_BIAS,
        };
        ErrorField {
            bounds,
            bias,
            decorrelation,
            resolution,
            values,
        }
    }

    /// Bias value at the fine-grid cell nearest to `(x, y)`, clamped to the domain.
    pub fn value_at(&self, x: f64, y: f64) -> f64 {
        let cols = self.values.ncols();
        let rows = self.values.nrows();
        let col_spacing = if cols > 1 {
            self.bounds.width() / (cols - 1) as f64
        } else {
            1.0
        };
        let row_spacing = if rows > 1 {
            self.bounds.height() / (rows - 1) as f64
        } else {
            1.0
        };
        let col = (((x - self.bounds.xmin) / col_spacing).round() as isize)
            .clamp(0, cols as isize - 1) as usize;
        let row = (((y - self.bounds.ymin) / row_spacing).round() as isize)
            .clamp(0, rows as isize - 1) as usize;
        self.values[(row, col)]
    }

    /// Write the field in the map encoding: one `# key=value,...` header line followed
    /// by the fine grid, one y bin per row.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(
            file,
            "# xmin={},xmax={},ymin={},ymax={},bias={},dcorr={},resolution={}",
            self.bounds.xmin,
            self.bounds.xmax,
            self.bounds.ymin,
            self.bounds.ymax,
            self.bias,
            self.decorrelation,
            self.resolution
        )?;
        for row in 0..self.values.nrows() {
            let line = (0..self.values.ncols())
                .map(|col| format!("{:.18e}", self.values[(row, col)]))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    /// Read a field back from the map encoding.
    ///
    /// The header is required; the matrix shape must agree with the grid geometry the
    /// header describes.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ErrorField, Box<dyn std::error::Error>> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        let header = lines
            .next()
            .ok_or("map file is empty")??;
        let header = header
            .strip_prefix('#')
            .ok_or("map file is missing its header line")?
            .trim();

        let keys = ["xmin", "xmax", "ymin", "ymax", "bias", "dcorr", "resolution"];
        let parts: Vec<&str> = header.split(',').collect();
        if parts.len() != keys.len() {
            return Err(format!("header has {} fields, expected {}", parts.len(), keys.len()).into());
        }
        let mut fields = [0.0_f64; 7];
        for ((slot, expected), part) in fields.iter_mut().zip(keys).zip(parts) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("malformed header field: {part}"))?;
            if key.trim() != expected {
                return Err(format!("unexpected header key: {key}").into());
            }
            *slot = value.trim().parse::<f64>()?;
        }
        let bounds = Bounds {
            xmin: fields[0],
            xmax: fields[1],
            ymin: fields[2],
            ymax: fields[3],
        };
        let (bias, decorrelation, resolution) = (fields[4], fields[5], fields[6]);

        let mut rows: Vec<Vec<f64>> = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<f64>, _>>()?;
            rows.push(row);
        }

        let expected_rows = grid_nodes(bounds.height(), resolution);
        let expected_cols = grid_nodes(bounds.width(), resolution);
        if rows.len() != expected_rows || rows.iter().any(|r| r.len() != expected_cols) {
            return Err(format!(
                "map grid does not match its header: expected {expected_rows}x{expected_cols}"
            )
            .into());
        }
        let values = DMatrix::from_fn(expected_rows, expected_cols, |r, c| rows[r][c]);
        Ok(ErrorField {
            bounds,
            bias,
            decorrelation,
            resolution,
            values,
        })
    }
}

/// Upsample a coarse grid to `rows x cols` by separable Catmull-Rom bicubic
/// interpolation. Border neighborhoods clamp to the edge nodes.
fn upsample_bicubic(coarse: &DMatrix<f64>, rows: usize, cols: usize) -> DMatrix<f64> {
    let coarse_rows = coarse.nrows() as isize;
    let coarse_cols = coarse.ncols() as isize;
    let node = |row: isize, col: isize| -> f64 {
        coarse[(
            row.clamp(0, coarse_rows - 1) as usize,
            col.clamp(0, coarse_cols - 1) as usize,
        )]
    };

    // Fractional coarse index of a fine bin; both grids span the same interval, so the
    // mapping is a pure index rescale.
    let fractional = |bin: usize, bins: usize, nodes: isize| -> (isize, f64) {
        if bins <= 1 || nodes <= 1 {
            return (0, 0.0);
        }
        let t = bin as f64 * (nodes - 1) as f64 / (bins - 1) as f64;
        let base = t.floor();
        (base as isize, t - base)
    };

    DMatrix::from_fn(rows, cols, |row, col| {
        let (row_base, v) = fractional(row, rows, coarse_rows);
        let (col_base, u) = fractional(col, cols, coarse_cols);
        let mut column_samples = [0.0; 4];
        for (k, sample) in column_samples.iter_mut().enumerate() {
            let r = row_base + k as isize - 1;
            *sample = catmull_rom(
                node(r, col_base - 1),
                node(r, col_base),
                node(r, col_base + 1),
                node(r, col_base + 2),
                u,
            );
        }
        catmull_rom(
            column_samples[0],
            column_samples[1],
            column_samples[2],
            column_samples[3],
            v,
        )
    })
}
