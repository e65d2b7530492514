//! Temperature-adjusted weight aggregation and likelihood histograms
//!
//! All masses are accumulated in log space via [`crate::logmath`]. The
//! temperature divisor is applied to each particle's log-weight *before*
//! aggregation, for the bin numerators and the per-step normalizer alike:
//! the histogram shows the distribution at temperature `T`, not a rescaled
//! drawing of the untempered one.

use thiserror::Error;

use crate::genealogy::{Forest, ParticleHandle};
use crate::logmath::{log_add_exp, log_sum_exp};
use crate::selection::ParticleFlags;
use crate::trace::normalize::{ExprId, Particle};

/// Errors raised while aggregating a step.
#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    /// Copies of one expression inside a bin disagree on likelihood.
    /// Resampled duplicates must be physically identical, so this means the
    /// trace itself is inconsistent.
    #[error("step {step}: copies of expression {expr_id} report different likelihoods ({a} vs {b})")]
    LikelihoodMismatch {
        step: usize,
        expr_id: ExprId,
        a: f64,
        b: f64,
    },
    #[error("temperature {0} is not a positive finite number")]
    InvalidTemperature(f64),
    #[error("histogram bin count must be at least 1")]
    InvalidBinCount,
}

/// Untempered per-step totals, for particle drawing.
#[derive(Debug, Clone)]
pub struct StepAggregate {
    /// `log_sum_exp` of the step's raw log-weights.
    pub logweight_total: f64,
    /// `exp(logweight - logweight_total)` per slot; 0 when the whole step
    /// has zero mass.
    pub relative_weights: Vec<f64>,
}

/// Aggregate one step's raw (temperature-free) weights.
pub fn step_aggregate(particles: &[Particle]) -> StepAggregate {
    let total = log_sum_exp(particles.iter().map(|p| p.logweight));
    let relative_weights = particles
        .iter()
        .map(|p| relative_mass(p.logweight, total))
        .collect();
    StepAggregate {
        logweight_total: total,
        relative_weights,
    }
}

/// `exp(lw - total)`, defined as 0 when the step carries no mass at all.
fn relative_mass(logweight: f64, total: f64) -> f64 {
    if total == f64::NEG_INFINITY {
        0.0
    } else {
        (logweight - total).exp()
    }
}

/// Histogram configuration shared by every step of one render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSpec {
    /// Temperature divisor applied to every log-weight before aggregation.
    pub temperature: f64,
    pub bin_count: usize,
    /// Inclusive lower edge of the `log2(likelihood)` domain; values below
    /// (including zero/absent likelihoods) are clamped onto it.
    pub min_log2_likelihood: f64,
    /// Upper edge of the domain, 0 for probabilities.
    pub max_log2_likelihood: f64,
}

/// Domain floor used when the anchor likelihood gives no finite edge.
const FALLBACK_MIN_LOG2: f64 = -20.0;

impl HistogramSpec {
    /// Derive the domain the way the viewer anchors it: one unit below
    /// `floor(log2)` of the first particle's likelihood, up to 0.
    pub fn from_forest(forest: &Forest, temperature: f64, bin_count: usize) -> Self {
        let anchor = forest
            .step_particles(0)
            .first()
            .map(|p| p.likelihood)
            .unwrap_or(0.0);
        let min = if anchor > 0.0 && anchor.is_finite() {
            anchor.log2().floor() - 1.0
        } else {
            FALLBACK_MIN_LOG2
        };
        HistogramSpec {
            temperature,
            bin_count,
            min_log2_likelihood: min,
            max_log2_likelihood: 0.0,
        }
    }

    /// Number of integer-width bins spanning the same domain, for the
    /// fine-grained overlay histogram.
    pub fn unit_bin_count(&self) -> usize {
        (self.max_log2_likelihood - self.min_log2_likelihood).ceil().max(1.0) as usize
    }

    fn validate(&self) -> Result<(), AggregateError> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(AggregateError::InvalidTemperature(self.temperature));
        }
        if self.bin_count == 0 {
            return Err(AggregateError::InvalidBinCount);
        }
        Ok(())
    }

    /// Bin index for one particle's likelihood, clamping out-of-domain and
    /// non-positive values onto the edge bins.
    fn bin_index(&self, likelihood: f64) -> usize {
        let v = if likelihood > 0.0 && likelihood.is_finite() {
            likelihood.log2()
        } else {
            f64::NEG_INFINITY
        };
        let v = v.clamp(self.min_log2_likelihood, self.max_log2_likelihood);
        let width =
            (self.max_log2_likelihood - self.min_log2_likelihood) / self.bin_count as f64;
        let ix = ((v - self.min_log2_likelihood) / width).floor() as usize;
        ix.min(self.bin_count - 1)
    }
}

/// Which highlight predicate supplied a bin's subset mass.
///
/// Priority is first-non-empty-wins: selected, then ancestor, then
/// descendant, then (whenever a search is active) search hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetKind {
    Selected,
    Ancestor,
    Descendant,
    SearchHit,
}

impl SubsetKind {
    fn matches(self, flags: ParticleFlags) -> bool {
        match self {
            SubsetKind::Selected => flags.selected,
            SubsetKind::Ancestor => flags.selected_ancestor,
            SubsetKind::Descendant => flags.selected_descendant,
            SubsetKind::SearchHit => flags.search_hit,
        }
    }
}

/// A group of particle instances sharing one expression within a bin.
#[derive(Debug, Clone)]
pub struct Subbin {
    pub expr_id: ExprId,
    /// Representative instance (all copies are verified identical in
    /// likelihood).
    pub first: ParticleHandle,
    pub copies: Vec<ParticleHandle>,
    /// Temperature-adjusted `log_sum_exp` over the copies.
    pub logweight: f64,
    /// Copies' mass relative to the step's tempered total.
    pub relative_weight: f64,
}

/// One histogram bin of a step, ready for mass/subset drawing.
#[derive(Debug, Clone)]
pub struct Bin {
    /// Bin edges in `log2(likelihood)` units.
    pub x0: f64,
    pub x1: f64,
    pub particles: Vec<ParticleHandle>,
    /// Temperature-adjusted `log_sum_exp` over the bin.
    pub logweight: f64,
    /// Bin mass relative to the step's tempered total.
    pub relative_weight: f64,
    pub subset_kind: Option<SubsetKind>,
    pub subset_logweight: f64,
    pub subset_relative_weight: f64,
    pub subset_count: usize,
    /// Deduplicated expression groups, descending by tempered mass.
    pub subbins: Vec<Subbin>,
}

/// One step's histogram at the spec's temperature.
#[derive(Debug, Clone)]
pub struct StepHistogram {
    /// Temperature-adjusted total over the whole step, the normalizer for
    /// every bin and subset mass.
    pub logweight_total: f64,
    pub bins: Vec<Bin>,
}

/// Build the weighted histogram for one retained step.
///
/// `flags` is the arena-wide classification from
/// [`crate::selection::SelectionState::classify`] (with search hits filled
/// in); `search_active` gates the search-hit subset predicate so an empty
/// search box never paints subset bars.
pub fn step_histogram(
    forest: &Forest,
    step: usize,
    flags: &[ParticleFlags],
    spec: &HistogramSpec,
    search_active: bool,
) -> Result<StepHistogram, AggregateError> {
    spec.validate()?;
    let n = forest.num_particles();
    let temperature = spec.temperature;

    let logweight_total = log_sum_exp(
        forest
            .step_particles(step)
            .iter()
            .map(|p| p.logweight / temperature),
    );

    let width = (spec.max_log2_likelihood - spec.min_log2_likelihood) / spec.bin_count as f64;
    let mut members: Vec<Vec<ParticleHandle>> = vec![Vec::new(); spec.bin_count];
    for slot in 0..n {
        let handle = forest.handle(step, slot);
        members[spec.bin_index(forest.particle(handle).likelihood)].push(handle);
    }

    let mut bins = Vec::with_capacity(spec.bin_count);
    for (bin_ix, particles) in members.into_iter().enumerate() {
        let logweight = log_sum_exp(
            particles
                .iter()
                .map(|&h| forest.particle(h).logweight / temperature),
        );

        let subset_kind = choose_subset_kind(&particles, flags, search_active);
        let (subset_logweight, subset_count) = match subset_kind {
            None => (f64::NEG_INFINITY, 0),
            Some(kind) => {
                let matching: Vec<f64> = particles
                    .iter()
                    .filter(|&&h| kind.matches(flags[h.0]))
                    .map(|&h| forest.particle(h).logweight / temperature)
                    .collect();
                (log_sum_exp(matching.iter().copied()), matching.len())
            }
        };

        let subbins = dedup_subbins(forest, step, &particles, logweight_total, temperature)?;

        bins.push(Bin {
            x0: spec.min_log2_likelihood + bin_ix as f64 * width,
            x1: spec.min_log2_likelihood + (bin_ix + 1) as f64 * width,
            logweight,
            relative_weight: relative_mass(logweight, logweight_total),
            subset_kind,
            subset_logweight,
            subset_relative_weight: relative_mass(subset_logweight, logweight_total),
            subset_count,
            subbins,
            particles,
        });
    }

    Ok(StepHistogram {
        logweight_total,
        bins,
    })
}

/// First highlight predicate with at least one match in the bin.
fn choose_subset_kind(
    particles: &[ParticleHandle],
    flags: &[ParticleFlags],
    search_active: bool,
) -> Option<SubsetKind> {
    let candidates = [
        SubsetKind::Selected,
        SubsetKind::Ancestor,
        SubsetKind::Descendant,
    ];
    for kind in candidates {
        if particles.iter().any(|&h| kind.matches(flags[h.0])) {
            return Some(kind);
        }
    }
    // Search applies whenever active, even if this bin has no hits, so an
    // empty (zero-height) subset bar is still classified as a search bar.
    if search_active {
        return Some(SubsetKind::SearchHit);
    }
    None
}

/// Group a bin's particles by expression, verifying copies agree.
fn dedup_subbins(
    forest: &Forest,
    step: usize,
    particles: &[ParticleHandle],
    logweight_total: f64,
    temperature: f64,
) -> Result<Vec<Subbin>, AggregateError> {
    let mut by_id: Vec<ParticleHandle> = particles.to_vec();
    by_id.sort_by_key(|&h| forest.particle(h).expr_id);

    let mut subbins: Vec<Subbin> = Vec::new();
    for handle in by_id {
        let particle = forest.particle(handle);
        match subbins.last_mut() {
            Some(subbin) if subbin.expr_id == particle.expr_id => {
                let first = forest.particle(subbin.first);
                if first.likelihood != particle.likelihood {
                    return Err(AggregateError::LikelihoodMismatch {
                        step,
                        expr_id: particle.expr_id,
                        a: first.likelihood,
                        b: particle.likelihood,
                    });
                }
                subbin.copies.push(handle);
                subbin.logweight =
                    log_add_exp(subbin.logweight, particle.logweight / temperature);
            }
            _ => {
                subbins.push(Subbin {
                    expr_id: particle.expr_id,
                    first: handle,
                    copies: vec![handle],
                    logweight: particle.logweight / temperature,
                    relative_weight: 0.0,
                });
            }
        }
    }

    for subbin in &mut subbins {
        subbin.relative_weight = relative_mass(subbin.logweight, logweight_total);
    }
    // Heaviest expressions first for the inspector.
    subbins.sort_by(|a, b| {
        b.logweight
            .partial_cmp(&a.logweight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(subbins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genealogy::Forest;
    use crate::selection::SelectionState;
    use crate::trace::normalize::normalize;
    use crate::trace::raw::RawTrace;
    use approx::assert_relative_eq;

    fn forest(value: serde_json::Value) -> Forest {
        let raw: RawTrace = serde_json::from_value(value).unwrap();
        Forest::build(&normalize(&raw).unwrap()).unwrap()
    }

    fn one_step(particles: serde_json::Value) -> Forest {
        forest(serde_json::json!({
            "history": [{"mode": "smc_step", "particles": particles}],
        }))
    }

    #[test]
    fn step_totals_and_relative_weights() {
        let forest = one_step(serde_json::json!([
            {"expr": "a", "logweight": 0.0, "likelihood": 0.5},
            {"expr": "b", "logweight": 0.0, "likelihood": 0.5},
        ]));
        let agg = step_aggregate(forest.step_particles(0));
        assert_relative_eq!(agg.logweight_total, 2.0_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(agg.relative_weights[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_mass_step_has_zero_relative_weights() {
        let forest = one_step(serde_json::json!([
            {"expr": "a", "logweight": null, "likelihood": 0.5},
            {"expr": "b", "logweight": null, "likelihood": 0.5},
        ]));
        let agg = step_aggregate(forest.step_particles(0));
        assert_eq!(agg.logweight_total, f64::NEG_INFINITY);
        assert_eq!(agg.relative_weights, vec![0.0, 0.0]);
    }

    #[test]
    fn temperature_divides_before_aggregation() {
        // logweights [0, -2] at T=2: bin mass log_add_exp(0, -1).
        let forest = one_step(serde_json::json!([
            {"expr": "a", "logweight": 0.0, "likelihood": 0.5},
            {"expr": "b", "logweight": -2.0, "likelihood": 0.5},
        ]));
        let spec = HistogramSpec {
            temperature: 2.0,
            bin_count: 1,
            min_log2_likelihood: -2.0,
            max_log2_likelihood: 0.0,
        };
        let flags = SelectionState::default().classify(&forest);
        let hist = step_histogram(&forest, 0, &flags, &spec, false).unwrap();
        assert_relative_eq!(
            hist.bins[0].logweight,
            0.313_261_687_518_222_8,
            epsilon = 1e-12
        );
        // One bin holds everything, so its relative mass is 1.
        assert_relative_eq!(hist.bins[0].relative_weight, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn particles_land_in_log2_bins() {
        let forest = one_step(serde_json::json!([
            {"expr": "a", "logweight": 0.0, "likelihood": 1.0},
            {"expr": "b", "logweight": 0.0, "likelihood": 0.25},
            {"expr": "c", "logweight": 0.0, "likelihood": 0.0},
        ]));
        let spec = HistogramSpec {
            temperature: 1.0,
            bin_count: 4,
            min_log2_likelihood: -4.0,
            max_log2_likelihood: 0.0,
        };
        let flags = SelectionState::default().classify(&forest);
        let hist = step_histogram(&forest, 0, &flags, &spec, false).unwrap();
        // likelihood 1 -> log2 = 0 -> clamped into the last bin;
        // 0.25 -> -2 -> bin [-2, -1); 0 -> clamped to the first bin.
        assert_eq!(hist.bins[3].particles.len(), 1);
        assert_eq!(hist.bins[2].particles.len(), 1);
        assert_eq!(hist.bins[0].particles.len(), 1);
        assert_eq!(hist.bins[1].particles.len(), 0);
    }

    #[test]
    fn subset_priority_prefers_selected_over_search() {
        let forest = forest(serde_json::json!({
            "history": [
                {"mode": "smc_step", "particles": [
                    {"expr": "A", "logweight": 0.0, "likelihood": 0.5},
                    {"expr": "B", "logweight": 0.0, "likelihood": 0.5},
                ]},
            ],
        }));
        let mut sel = SelectionState::default();
        let id = forest.particle(forest.handle(0, 0)).expr_id;
        sel.select([id], &forest);
        let mut flags = sel.classify(&forest);
        for f in &mut flags {
            f.search_hit = true;
        }
        let spec = HistogramSpec {
            temperature: 1.0,
            bin_count: 1,
            min_log2_likelihood: -2.0,
            max_log2_likelihood: 0.0,
        };
        let hist = step_histogram(&forest, 0, &flags, &spec, true).unwrap();
        assert_eq!(hist.bins[0].subset_kind, Some(SubsetKind::Selected));
        assert_eq!(hist.bins[0].subset_count, 1);
        assert_relative_eq!(hist.bins[0].subset_relative_weight, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn search_subset_applies_only_when_active() {
        let forest = one_step(serde_json::json!([
            {"expr": "a", "logweight": 0.0, "likelihood": 0.5},
        ]));
        let spec = HistogramSpec {
            temperature: 1.0,
            bin_count: 1,
            min_log2_likelihood: -2.0,
            max_log2_likelihood: 0.0,
        };
        let flags = SelectionState::default().classify(&forest);
        let inactive = step_histogram(&forest, 0, &flags, &spec, false).unwrap();
        assert_eq!(inactive.bins[0].subset_kind, None);
        let active = step_histogram(&forest, 0, &flags, &spec, true).unwrap();
        assert_eq!(active.bins[0].subset_kind, Some(SubsetKind::SearchHit));
        assert_eq!(active.bins[0].subset_count, 0);
        assert_eq!(active.bins[0].subset_relative_weight, 0.0);
    }

    #[test]
    fn subbins_group_copies_and_sort_by_mass() {
        let forest = one_step(serde_json::json!([
            {"expr": "heavy", "logweight": 0.0, "likelihood": 0.5},
            {"expr": "light", "logweight": -3.0, "likelihood": 0.5},
            {"expr": "heavy", "logweight": 0.0, "likelihood": 0.5},
        ]));
        let spec = HistogramSpec {
            temperature: 1.0,
            bin_count: 1,
            min_log2_likelihood: -2.0,
            max_log2_likelihood: 0.0,
        };
        let flags = SelectionState::default().classify(&forest);
        let hist = step_histogram(&forest, 0, &flags, &spec, false).unwrap();
        let subbins = &hist.bins[0].subbins;
        assert_eq!(subbins.len(), 2);
        assert_eq!(subbins[0].copies.len(), 2);
        assert_relative_eq!(subbins[0].logweight, 2.0_f64.ln(), epsilon = 1e-12);
        assert!(subbins[0].logweight > subbins[1].logweight);
    }

    #[test]
    fn likelihood_mismatch_between_copies_is_a_consistency_error() {
        let forest = one_step(serde_json::json!([
            {"expr": "same", "expr_id": 5, "logweight": 0.0, "likelihood": 0.5},
            {"expr": "same", "expr_id": 5, "logweight": 0.0, "likelihood": 0.505},
        ]));
        let spec = HistogramSpec {
            temperature: 1.0,
            bin_count: 1,
            min_log2_likelihood: -2.0,
            max_log2_likelihood: 0.0,
        };
        let flags = SelectionState::default().classify(&forest);
        let err = step_histogram(&forest, 0, &flags, &spec, false).unwrap_err();
        assert!(matches!(
            err,
            AggregateError::LikelihoodMismatch { expr_id: 5, .. }
        ));
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let forest = one_step(serde_json::json!([
            {"expr": "a", "logweight": 0.0, "likelihood": 0.5},
        ]));
        let flags = SelectionState::default().classify(&forest);
        let bad_temp = HistogramSpec {
            temperature: 0.0,
            bin_count: 1,
            min_log2_likelihood: -2.0,
            max_log2_likelihood: 0.0,
        };
        assert_eq!(
            step_histogram(&forest, 0, &flags, &bad_temp, false).unwrap_err(),
            AggregateError::InvalidTemperature(0.0)
        );
        let bad_bins = HistogramSpec {
            temperature: 1.0,
            bin_count: 0,
            min_log2_likelihood: -2.0,
            max_log2_likelihood: 0.0,
        };
        assert_eq!(
            step_histogram(&forest, 0, &flags, &bad_bins, false).unwrap_err(),
            AggregateError::InvalidBinCount
        );
    }

    #[test]
    fn spec_domain_anchors_below_first_likelihood() {
        let forest = one_step(serde_json::json!([
            {"expr": "a", "logweight": 0.0, "likelihood": 0.25},
        ]));
        let spec = HistogramSpec::from_forest(&forest, 1.0, 20);
        assert_eq!(spec.min_log2_likelihood, -3.0);
        assert_eq!(spec.max_log2_likelihood, 0.0);
        assert_eq!(spec.unit_bin_count(), 3);
    }
}
