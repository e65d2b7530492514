//! Histogram rectangles and inspector rows
//!
//! Converts a step's aggregated [`StepHistogram`] into plot-space geometry:
//! one rectangle per bin, a subset-overlay rectangle when a highlight
//! predicate applies, a fine-grained unit-width overlay, and the
//! deduplicated inspector rows shown in the hover box.

use smc_scope_core::aggregate::{StepHistogram, SubsetKind};
use smc_scope_core::genealogy::Forest;
use smc_scope_core::selection::ParticleFlags;
use smc_scope_core::trace::normalize::ExprId;

/// Plot width of one step's histogram, in drawing units.
pub const GRAPH_WIDTH: f64 = 500.0;
/// Plot height; relative mass 1 spans the full height.
pub const GRAPH_HEIGHT: f64 = 150.0;

/// Axis-aligned rectangle in plot coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One inspector row: a deduplicated expression group within a bin.
#[derive(Debug, Clone)]
pub struct InspectorRow {
    pub expr_id: ExprId,
    pub copies: usize,
    /// Group mass relative to the tempered step total, scaled by `N`
    /// (expected survivor count under resampling).
    pub scaled_mass: f64,
    pub log2_posterior: f64,
    pub log2_prior: f64,
    pub log2_likelihood: f64,
    /// Tempered group log-weight in base 2.
    pub log2_weight: f64,
    pub prefix: String,
    pub modified: Option<String>,
    pub suffix: Option<String>,
    pub likelihood_zero: bool,
    pub flags: ParticleFlags,
}

/// One drawable bin.
#[derive(Debug, Clone)]
pub struct BinView {
    /// Edges in `log2(likelihood)` units.
    pub x0: f64,
    pub x1: f64,
    pub rect: Rect,
    pub subset_rect: Rect,
    pub subset_kind: Option<SubsetKind>,
    pub count: usize,
    pub subset_count: usize,
    pub relative_weight: f64,
    pub subset_relative_weight: f64,
    /// Inspector rows, heaviest expression first.
    pub rows: Vec<InspectorRow>,
}

/// One step's histogram, in plot coordinates.
#[derive(Debug, Clone)]
pub struct HistogramView {
    pub logweight_total: f64,
    pub xmin: f64,
    pub xmax: f64,
    pub bins: Vec<BinView>,
    /// Unit-width overlay bars (mass only, no subsets or rows).
    pub fine_bins: Vec<Rect>,
}

impl HistogramView {
    /// Project a step's coarse and fine histograms into plot space.
    pub fn build(
        forest: &Forest,
        flags: &[ParticleFlags],
        coarse: &StepHistogram,
        fine: &StepHistogram,
        xmin: f64,
        xmax: f64,
    ) -> HistogramView {
        let n = forest.num_particles() as f64;
        let x = |v: f64| (v - xmin) / (xmax - xmin) * GRAPH_WIDTH;
        let y = |rel: f64| GRAPH_HEIGHT * (1.0 - rel.clamp(0.0, 1.0));

        let bins = coarse
            .bins
            .iter()
            .map(|bin| {
                let rect = Rect {
                    x: x(bin.x0),
                    y: y(bin.relative_weight),
                    width: x(bin.x1) - x(bin.x0),
                    height: GRAPH_HEIGHT - y(bin.relative_weight),
                };
                let subset_rect = Rect {
                    x: x(bin.x0),
                    y: y(bin.subset_relative_weight),
                    width: x(bin.x1) - x(bin.x0),
                    height: GRAPH_HEIGHT - y(bin.subset_relative_weight),
                };
                let rows = bin
                    .subbins
                    .iter()
                    .map(|subbin| {
                        let first = forest.particle(subbin.first);
                        InspectorRow {
                            expr_id: subbin.expr_id,
                            copies: subbin.copies.len(),
                            scaled_mass: subbin.relative_weight * n,
                            log2_posterior: log2_or_neginf(first.posterior),
                            log2_prior: log2_or_neginf(first.prior),
                            log2_likelihood: log2_or_neginf(first.likelihood),
                            log2_weight: subbin.logweight / std::f64::consts::LN_2,
                            prefix: first.prefix.clone(),
                            modified: first.modified.clone(),
                            suffix: first.suffix.clone(),
                            likelihood_zero: !(first.likelihood > 0.0),
                            flags: flags[subbin.first.0],
                        }
                    })
                    .collect();
                BinView {
                    x0: bin.x0,
                    x1: bin.x1,
                    rect,
                    subset_rect,
                    subset_kind: bin.subset_kind,
                    count: bin.particles.len(),
                    subset_count: bin.subset_count,
                    relative_weight: bin.relative_weight,
                    subset_relative_weight: bin.subset_relative_weight,
                    rows,
                }
            })
            .collect();

        let fine_bins = fine
            .bins
            .iter()
            .map(|bin| Rect {
                x: x(bin.x0),
                y: y(bin.relative_weight),
                width: x(bin.x1) - x(bin.x0),
                height: GRAPH_HEIGHT - y(bin.relative_weight),
            })
            .collect();

        HistogramView {
            logweight_total: coarse.logweight_total,
            xmin,
            xmax,
            bins,
            fine_bins,
        }
    }

    /// A histogram with no bins, for layouts built without aggregation.
    pub fn empty() -> HistogramView {
        HistogramView {
            logweight_total: f64::NEG_INFINITY,
            xmin: 0.0,
            xmax: 0.0,
            bins: Vec::new(),
            fine_bins: Vec::new(),
        }
    }
}

fn log2_or_neginf(v: f64) -> f64 {
    if v > 0.0 && v.is_finite() {
        v.log2()
    } else {
        f64::NEG_INFINITY
    }
}
