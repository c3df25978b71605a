//! Streaming amplitude statistics
//!
//! One pass over every trace yields the global value range and a bounded
//! sample of traces for quantile estimation. An optional second pass buckets
//! each trace into a fixed histogram and derives per-cell mean/std matrices
//! analytically from the histogram, so no third pass over raw values is
//! needed. Results persist to the sidecar store; restoring never recomputes.

use crate::error::{CubeError, Result};
use crate::sidecar::SidecarStore;
use crate::utils::{bin_edges, bin_index, find_min_max, sorted_quantile};
use ndarray::{Array2, Array3};

/// Collection parameters
#[derive(Debug, Clone, Copy)]
pub struct StatsConfig {
    /// Number of histogram bins
    pub bins: usize,
    /// Upper bound on the number of retained sample traces
    pub num_keep: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bins: 25,
            num_keep: 5000,
        }
    }
}

/// Per-cell statistics derived during the spatial pass
#[derive(Debug, Clone)]
pub struct SpatialStatistics {
    /// Shared histogram bin edges, `bins + 1` values
    pub bins: Vec<f32>,
    pub min_matrix: Array2<f32>,
    pub max_matrix: Array2<f32>,
    pub mean_matrix: Array2<f32>,
    pub std_matrix: Array2<f32>,
    /// Amplitude histogram per spatial cell
    pub hist_matrix: Array3<u64>,
    /// 1 where the trace is degenerate (min == max) or missing
    pub zero_traces: Array2<u8>,
}

/// Global and optional spatial amplitude statistics for one cube
#[derive(Debug, Clone)]
pub struct StatisticsSummary {
    pub value_min: f32,
    pub value_max: f32,
    pub q001: f32,
    pub q01: f32,
    pub q99: f32,
    pub q999: f32,
    /// Retained amplitude sample used for the quantiles
    pub trace_sample: Vec<f32>,
    pub spatial: Option<SpatialStatistics>,
}

/// Derive mean and std matrices purely from the histogram and bin edges.
/// Cells with an empty histogram come out as zero; callers consult
/// `zero_traces` to tell them apart from real values.
pub fn matrices_from_histogram(bins: &[f32], hist: &Array3<u64>) -> (Array2<f32>, Array2<f32>) {
    let (i_len, x_len, n_bins) = hist.dim();
    let midpoints: Vec<f64> = (0..n_bins)
        .map(|b| (bins[b] as f64 + bins[b + 1] as f64) / 2.0)
        .collect();

    let mut mean_matrix = Array2::<f32>::zeros((i_len, x_len));
    let mut std_matrix = Array2::<f32>::zeros((i_len, x_len));
    for i in 0..i_len {
        for x in 0..x_len {
            let total: u64 = (0..n_bins).map(|b| hist[[i, x, b]]).sum();
            if total == 0 {
                continue;
            }
            let mut mean = 0.0f64;
            for b in 0..n_bins {
                mean += midpoints[b] * hist[[i, x, b]] as f64;
            }
            mean /= total as f64;

            let mut var = 0.0f64;
            for b in 0..n_bins {
                let delta = midpoints[b] - mean;
                var += delta * delta * hist[[i, x, b]] as f64;
            }
            var /= total as f64;

            mean_matrix[[i, x]] = mean as f32;
            std_matrix[[i, x]] = var.sqrt() as f32;
        }
    }
    (mean_matrix, std_matrix)
}

/// Collect statistics by streaming every trace of a `(lens[0], lens[1])`
/// grid through `load_trace`. With `spatial`, a second pass fills the
/// per-cell matrices.
pub fn collect<F>(
    lens: [usize; 2],
    mut load_trace: F,
    spatial: bool,
    config: &StatsConfig,
) -> Result<StatisticsSummary>
where
    F: FnMut(usize, usize) -> Result<Vec<f32>>,
{
    let n_traces = lens[0] * lens[1];
    if n_traces == 0 {
        return Err(CubeError::InvalidDimensions(
            "cannot collect statistics over an empty grid".to_string(),
        ));
    }

    // Pass 1: global range plus a deterministic decimated sample
    let keep_step = (n_traces / config.num_keep.max(1)).max(1);
    let mut value_min = f32::INFINITY;
    let mut value_max = f32::NEG_INFINITY;
    let mut trace_sample: Vec<f32> = Vec::new();

    log::info!("statistics pass 1/{}: scanning {} traces", if spatial { 2 } else { 1 }, n_traces);
    for index in 0..n_traces {
        let (i, x) = (index / lens[1], index % lens[1]);
        let trace = load_trace(i, x)?;
        let (trace_min, trace_max) = find_min_max(&trace);
        if trace_min < value_min {
            value_min = trace_min;
        }
        if trace_max > value_max {
            value_max = trace_max;
        }
        if index % keep_step == 0 && trace_min != trace_max {
            trace_sample.extend_from_slice(&trace);
        }
    }
    if !value_min.is_finite() || !value_max.is_finite() {
        return Err(CubeError::Format(
            "cube holds no finite amplitudes".to_string(),
        ));
    }

    let mut sorted = trace_sample.clone();
    sorted.retain(|v| !v.is_nan());
    sorted.sort_unstable_by(f32::total_cmp);
    // A fully constant cube leaves no sample; fall back to the range
    let (q001, q01, q99, q999) = if sorted.is_empty() {
        (value_min, value_min, value_max, value_max)
    } else {
        (
            sorted_quantile(&sorted, 0.001),
            sorted_quantile(&sorted, 0.01),
            sorted_quantile(&sorted, 0.99),
            sorted_quantile(&sorted, 0.999),
        )
    };

    // Pass 2: per-cell matrices bucketed into a fixed histogram
    let spatial_stats = if spatial {
        let bins = bin_edges(value_min, value_max, config.bins);
        let mut min_matrix = Array2::<f32>::zeros(lens);
        let mut max_matrix = Array2::<f32>::zeros(lens);
        let mut hist_matrix = Array3::<u64>::zeros((lens[0], lens[1], config.bins));
        let mut zero_traces = Array2::<u8>::zeros(lens);

        log::info!("statistics pass 2/2: histogram over {} traces", n_traces);
        for i in 0..lens[0] {
            for x in 0..lens[1] {
                let trace = load_trace(i, x)?;
                let (trace_min, trace_max) = find_min_max(&trace);
                if !trace_min.is_finite() || trace_min == trace_max {
                    zero_traces[[i, x]] = 1;
                    continue;
                }
                min_matrix[[i, x]] = trace_min;
                max_matrix[[i, x]] = trace_max;
                for &value in &trace {
                    if value.is_nan() {
                        continue;
                    }
                    hist_matrix[[i, x, bin_index(value, &bins)]] += 1;
                }
            }
        }

        let (mean_matrix, std_matrix) = matrices_from_histogram(&bins, &hist_matrix);
        Some(SpatialStatistics {
            bins,
            min_matrix,
            max_matrix,
            mean_matrix,
            std_matrix,
            hist_matrix,
            zero_traces,
        })
    } else {
        None
    };

    Ok(StatisticsSummary {
        value_min,
        value_max,
        q001,
        q01,
        q99,
        q999,
        trace_sample,
        spatial: spatial_stats,
    })
}

fn flatten_f32(matrix: &Array2<f32>) -> Vec<f32> {
    matrix.iter().copied().collect()
}

/// Persist a summary to the sidecar store and write it out. Calling this
/// repeatedly is safe: last write wins.
pub fn store_statistics(store: &mut SidecarStore, summary: &StatisticsSummary) -> Result<()> {
    store.set("value_min", &summary.value_min)?;
    store.set("value_max", &summary.value_max)?;
    store.set("q001", &summary.q001)?;
    store.set("q01", &summary.q01)?;
    store.set("q99", &summary.q99)?;
    store.set("q999", &summary.q999)?;
    store.set("trace_sample", &summary.trace_sample)?;

    if let Some(spatial) = &summary.spatial {
        store.set("bins", &spatial.bins)?;
        store.set("min_matrix", &flatten_f32(&spatial.min_matrix))?;
        store.set("max_matrix", &flatten_f32(&spatial.max_matrix))?;
        store.set(
            "hist_matrix",
            &spatial.hist_matrix.iter().copied().collect::<Vec<u64>>(),
        )?;
        store.set(
            "zero_traces",
            &spatial.zero_traces.iter().copied().collect::<Vec<u8>>(),
        )?;
    }
    store.save()
}

/// Restore a summary from the sidecar store for a cube with spatial shape
/// `lens`. Returns `None` when the essential entries are absent or corrupt;
/// the mean/std matrices are always rebuilt from the stored histogram.
pub fn restore_statistics(store: &SidecarStore, lens: [usize; 2]) -> Option<StatisticsSummary> {
    let value_min = store.get::<f32>("value_min")?;
    let value_max = store.get::<f32>("value_max")?;
    let q001 = store.get::<f32>("q001")?;
    let q01 = store.get::<f32>("q01")?;
    let q99 = store.get::<f32>("q99")?;
    let q999 = store.get::<f32>("q999")?;
    let trace_sample = store.get::<Vec<f32>>("trace_sample").unwrap_or_default();

    let spatial = (|| {
        let bins = store.get::<Vec<f32>>("bins")?;
        let n_bins = bins.len().checked_sub(1)?;
        let cells = lens[0] * lens[1];

        let min_flat = store.get::<Vec<f32>>("min_matrix")?;
        let max_flat = store.get::<Vec<f32>>("max_matrix")?;
        let hist_flat = store.get::<Vec<u64>>("hist_matrix")?;
        let zero_flat = store.get::<Vec<u8>>("zero_traces")?;
        if min_flat.len() != cells
            || max_flat.len() != cells
            || zero_flat.len() != cells
            || hist_flat.len() != cells * n_bins
        {
            log::warn!("sidecar spatial matrices do not match cube shape; ignoring");
            return None;
        }

        let min_matrix = Array2::from_shape_vec(lens, min_flat).ok()?;
        let max_matrix = Array2::from_shape_vec(lens, max_flat).ok()?;
        let zero_traces = Array2::from_shape_vec(lens, zero_flat).ok()?;
        let hist_matrix = Array3::from_shape_vec((lens[0], lens[1], n_bins), hist_flat).ok()?;

        let (mean_matrix, std_matrix) = matrices_from_histogram(&bins, &hist_matrix);
        Some(SpatialStatistics {
            bins,
            min_matrix,
            max_matrix,
            mean_matrix,
            std_matrix,
            hist_matrix,
            zero_traces,
        })
    })();

    Some(StatisticsSummary {
        value_min,
        value_max,
        q001,
        q01,
        q99,
        q999,
        trace_sample,
        spatial,
    })
}
