//! Step and particle geometry for the forest view
//!
//! Reproduces the viewer's placement rules: steps stack vertically with a
//! fixed band per step, each step shows its top-K particles by relative
//! weight (plus any click-highlighted lineage), and the horizontal position
//! follows the selected x-position mode — rank order, a log-scaled
//! likelihood/posterior axis, or relative weight.

use smc_scope_core::aggregate::{step_aggregate, StepAggregate};
use smc_scope_core::genealogy::{Forest, ParticleHandle};
use smc_scope_core::selection::ParticleFlags;
use smc_scope_core::trace::normalize::Particle;

use crate::histogram::HistogramView;
use crate::view_state::{ViewState, XPositionMode};

/// Vertical spacing between visible particles of one step.
pub const PARTICLE_YSPACE: f64 = 30.0;

/// Vertical band of one step, leaving headroom for the step labels.
pub fn state_yspace(top_k: usize) -> f64 {
    PARTICLE_YSPACE * (top_k as f64 + 1.0) + 50.0
}

/// A complete render-ready frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Temperature the histograms were aggregated at.
    pub temperature: f64,
    pub search_active: bool,
    pub steps: Vec<StepView>,
}

/// One retained step, positioned and aggregated.
#[derive(Debug, Clone)]
pub struct StepView {
    pub index: usize,
    pub mode: String,
    /// Ancestry into this step crossed a collapsed resample.
    pub after_resample: bool,
    pub y: f64,
    /// Untempered per-step totals for particle drawing.
    pub logweight_total: f64,
    pub particles: Vec<ParticleView>,
    /// Segments for visible parent/child pairs.
    pub links: Vec<ParentLink>,
    pub histogram: HistogramView,
}

/// One particle instance, ready for drawing.
#[derive(Debug, Clone)]
pub struct ParticleView {
    pub handle: ParticleHandle,
    pub step: usize,
    pub slot: usize,
    pub particle: Particle,
    pub relative_weight: f64,
    pub flags: ParticleFlags,
    /// In the step's top-K (or pulled in by the click-highlight lineage).
    pub visible: bool,
    /// On the instance lineage of the click-highlighted particle.
    pub lineage_highlighted: bool,
    pub x: f64,
    pub y: f64,
}

/// A parent-to-child connector between visible particles.
#[derive(Debug, Clone)]
pub struct ParentLink {
    pub parent: ParticleHandle,
    pub child: ParticleHandle,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// The child step's mode, for per-kind styling.
    pub mode: String,
    pub highlighted: bool,
}

/// Assemble the frame geometry. `histograms` must hold one entry per
/// retained step, already aggregated at the frame's temperature.
pub fn build_frame(
    forest: &Forest,
    flags: &[ParticleFlags],
    state: &ViewState,
    temperature: f64,
    search_active: bool,
    histograms: Vec<HistogramView>,
) -> Frame {
    debug_assert_eq!(histograms.len(), forest.num_steps());
    let scales = Scales::from_forest(forest);
    let yspace = state_yspace(state.top_k);
    let lineage = lineage_of(forest, state);

    let mut steps = Vec::with_capacity(forest.num_steps());
    for (step_ix, histogram) in histograms.into_iter().enumerate() {
        let agg = step_aggregate(forest.step_particles(step_ix));
        let step_y = step_ix as f64 * yspace;
        let particles =
            layout_step(forest, step_ix, step_y, &agg, flags, state, &scales, &lineage);
        steps.push(StepView {
            index: step_ix,
            mode: forest.step(step_ix).mode.clone(),
            after_resample: forest.step(step_ix).after_resample,
            y: step_y,
            logweight_total: agg.logweight_total,
            particles,
            links: Vec::new(),
            histogram,
        });
    }

    connect_links(forest, &mut steps);

    Frame {
        temperature,
        search_active,
        steps,
    }
}

/// Instance-identity closure of the click-highlighted particle: itself, its
/// ancestor chain, and every descendant instance.
fn lineage_of(forest: &Forest, state: &ViewState) -> Vec<bool> {
    let mut lineage = vec![false; forest.len()];
    let origin = match state.highlighted {
        Some(h) if h.step < forest.num_steps() && h.slot < forest.num_particles() => {
            forest.handle(h.step, h.slot)
        }
        _ => return lineage,
    };
    lineage[origin.0] = true;
    for ancestor in forest.ancestors(origin) {
        lineage[ancestor.0] = true;
    }
    let mut worklist = vec![origin];
    while let Some(handle) = worklist.pop() {
        for &child in forest.children(handle) {
            if !lineage[child.0] {
                lineage[child.0] = true;
                worklist.push(child);
            }
        }
    }
    lineage
}

#[allow(clippy::too_many_arguments)]
fn layout_step(
    forest: &Forest,
    step_ix: usize,
    step_y: f64,
    agg: &StepAggregate,
    flags: &[ParticleFlags],
    state: &ViewState,
    scales: &Scales,
    lineage: &[bool],
) -> Vec<ParticleView> {
    let n = forest.num_particles();
    let particle_xspace = state.state_xspace / (state.top_k as f64 + 1.0);

    let mut views: Vec<ParticleView> = (0..n)
        .map(|slot| {
            let handle = forest.handle(step_ix, slot);
            let particle = forest.particle(handle).clone();
            let relative_weight = agg.relative_weights[slot];
            let x = scales.x_position(state, &particle, relative_weight, forest, step_ix);
            ParticleView {
                handle,
                step: step_ix,
                slot,
                particle,
                relative_weight,
                flags: flags[handle.0],
                visible: false,
                lineage_highlighted: lineage[handle.0],
                x,
                y: step_y,
            }
        })
        .collect();

    // Top-K by relative weight, then pull in the highlighted lineage so a
    // clicked ancestry never disappears off the chart.
    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|&a, &b| {
        views[b]
            .relative_weight
            .partial_cmp(&views[a].relative_weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut shown: Vec<usize> = ranked.into_iter().take(state.top_k).collect();
    for slot in 0..n {
        if views[slot].lineage_highlighted && !shown.contains(&slot) {
            shown.push(slot);
        }
    }
    // Slot order keeps ancestor lines from crossing.
    shown.sort_unstable();

    for (rank, &slot) in shown.iter().enumerate() {
        let view = &mut views[slot];
        view.visible = true;
        view.y = step_y + rank as f64 * PARTICLE_YSPACE;
        if state.xpos == XPositionMode::Slot {
            view.x = rank as f64 * particle_xspace;
        }
    }

    views
}

/// Wire up connector segments for visible parent/child pairs.
fn connect_links(forest: &Forest, steps: &mut [StepView]) {
    for step_ix in 1..steps.len() {
        let mut links = Vec::new();
        for slot in 0..forest.num_particles() {
            let child = &steps[step_ix].particles[slot];
            let parent_handle = match forest.parent(child.handle) {
                Some(p) => p,
                None => continue,
            };
            let parent = &steps[step_ix - 1].particles[forest.slot_of(parent_handle)];
            if !(child.visible && parent.visible) {
                continue;
            }
            links.push(ParentLink {
                parent: parent_handle,
                child: child.handle,
                x1: parent.x,
                y1: parent.y,
                x2: child.x,
                y2: child.y,
                mode: steps[step_ix].mode.clone(),
                highlighted: child.lineage_highlighted && parent.lineage_highlighted,
            });
        }
        steps[step_ix].links = links;
    }
}

/// Log-scaled probability axes shared across the frame.
///
/// The lower edges anchor one decade below the first particle, the way the
/// viewer fixes its axes before any interaction.
#[derive(Debug, Clone, Copy)]
struct Scales {
    min_likelihood: f64,
    min_posterior: f64,
    max_likelihood: f64,
    max_posterior: f64,
}

impl Scales {
    fn from_forest(forest: &Forest) -> Scales {
        let (anchor_likelihood, anchor_posterior) = forest
            .step_particles(0)
            .first()
            .map(|p| (p.likelihood, p.posterior))
            .unwrap_or((0.0, 0.0));
        let min_likelihood = positive_or(anchor_likelihood / 10.0, 1e-10);
        let min_posterior = positive_or(anchor_posterior / 10.0, 1e-10);
        let mut max_likelihood: f64 = 0.0;
        let mut max_posterior: f64 = 0.0;
        for handle in forest.handles() {
            let p = forest.particle(handle);
            if p.likelihood.is_finite() {
                max_likelihood = max_likelihood.max(p.likelihood);
            }
            if p.posterior.is_finite() {
                max_posterior = max_posterior.max(p.posterior);
            }
        }
        Scales {
            min_likelihood,
            min_posterior,
            max_likelihood: positive_or(max_likelihood, 1.0),
            max_posterior: positive_or(max_posterior, 1.0),
        }
    }

    fn x_position(
        &self,
        state: &ViewState,
        particle: &Particle,
        relative_weight: f64,
        forest: &Forest,
        step_ix: usize,
    ) -> f64 {
        let unit = match state.xpos {
            XPositionMode::Slot => return 0.0,
            XPositionMode::LikelihoodUnit => {
                log_unit(particle.likelihood, self.min_likelihood, 1.0)
            }
            XPositionMode::LikelihoodGlobalMax => {
                log_unit(particle.likelihood, self.min_likelihood, self.max_likelihood)
            }
            XPositionMode::LikelihoodLocalMax => {
                let local = step_max(forest, step_ix, |p| p.likelihood);
                log_unit(particle.likelihood, self.min_likelihood, local)
            }
            XPositionMode::PosteriorGlobalMax => {
                log_unit(particle.posterior, self.min_posterior, self.max_posterior)
            }
            XPositionMode::PosteriorLocalMax => {
                let local = step_max(forest, step_ix, |p| p.posterior);
                log_unit(particle.posterior, self.min_posterior, local)
            }
            XPositionMode::RelativeWeight => {
                if relative_weight.is_finite() {
                    relative_weight
                } else {
                    0.0
                }
            }
        };
        state.state_xspace * 0.05 + state.state_xspace * 0.9 * unit + 1.0
    }
}

fn step_max(forest: &Forest, step_ix: usize, f: impl Fn(&Particle) -> f64) -> f64 {
    forest
        .step_particles(step_ix)
        .iter()
        .map(f)
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max)
}

/// Position of `v` on a log scale over `[min, max]`, clamped into `[0, 1]`.
fn log_unit(v: f64, min: f64, max: f64) -> f64 {
    let max = positive_or(max, 1.0);
    if max <= min {
        return 0.0;
    }
    let v = v.max(min);
    ((v.ln() - min.ln()) / (max.ln() - min.ln())).clamp(0.0, 1.0)
}

fn positive_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramView;
    use smc_scope_core::selection::SelectionState;
    use smc_scope_core::trace::normalize::normalize;
    use smc_scope_core::trace::raw::RawTrace;

    fn forest(value: serde_json::Value) -> Forest {
        let raw: RawTrace = serde_json::from_value(value).unwrap();
        Forest::build(&normalize(&raw).unwrap()).unwrap()
    }

    fn frame(forest: &Forest, state: &ViewState) -> Frame {
        let flags = SelectionState::default().classify(forest);
        let histograms = (0..forest.num_steps())
            .map(|_| HistogramView::empty())
            .collect();
        build_frame(forest, &flags, state, 1.0, false, histograms)
    }

    fn three_particle_forest() -> Forest {
        forest(serde_json::json!({
            "history": [
                {"mode": "smc_step", "particles": [
                    {"expr": "a", "logweight": 0.0, "likelihood": 0.5, "posterior": 0.1},
                    {"expr": "b", "logweight": -1.0, "likelihood": 0.25, "posterior": 0.1},
                    {"expr": "c", "logweight": -5.0, "likelihood": 0.125, "posterior": 0.1},
                ]},
                {"mode": "smc_step", "particles": [
                    {"expr": "d", "logweight": 0.0, "likelihood": 0.5, "posterior": 0.1},
                    {"expr": "e", "logweight": -1.0, "likelihood": 0.25, "posterior": 0.1},
                    {"expr": "f", "logweight": -2.0, "likelihood": 0.125, "posterior": 0.1},
                ]},
            ],
        }))
    }

    #[test]
    fn top_k_limits_visibility_by_weight() {
        let forest = three_particle_forest();
        let state = ViewState {
            top_k: 2,
            ..ViewState::default()
        };
        let frame = frame(&forest, &state);
        let visible: Vec<_> = frame.steps[0]
            .particles
            .iter()
            .filter(|p| p.visible)
            .map(|p| p.slot)
            .collect();
        assert_eq!(visible, vec![0, 1]);
    }

    #[test]
    fn steps_stack_vertically_and_ranks_spread_particles() {
        let forest = three_particle_forest();
        let state = ViewState::default();
        let frame = frame(&forest, &state);
        assert_eq!(frame.steps[0].y, 0.0);
        assert_eq!(frame.steps[1].y, state_yspace(state.top_k));
        let step = &frame.steps[0];
        assert_eq!(step.particles[0].y, 0.0);
        assert_eq!(step.particles[1].y, PARTICLE_YSPACE);
    }

    #[test]
    fn links_connect_only_visible_pairs() {
        let forest = three_particle_forest();
        let state = ViewState {
            top_k: 1,
            ..ViewState::default()
        };
        let frame = frame(&forest, &state);
        // Only slot 0 is visible in both steps, so exactly one link.
        assert_eq!(frame.steps[1].links.len(), 1);
        assert_eq!(frame.steps[1].links[0].parent, forest.handle(0, 0));
        assert_eq!(frame.steps[1].links[0].child, forest.handle(1, 0));
    }

    #[test]
    fn highlighted_lineage_is_pulled_into_visibility() {
        let forest = three_particle_forest();
        let mut state = ViewState {
            top_k: 1,
            ..ViewState::default()
        };
        // Click the lightest particle of step 1; it and its parent must
        // become visible despite the top-1 cut.
        state.click_particle(1, 2);
        let frame = frame(&forest, &state);
        assert!(frame.steps[1].particles[2].visible);
        assert!(frame.steps[1].particles[2].lineage_highlighted);
        assert!(frame.steps[0].particles[2].visible);
    }

    #[test]
    fn likelihood_axis_orders_by_likelihood() {
        let forest = three_particle_forest();
        let state = ViewState {
            xpos: XPositionMode::LikelihoodUnit,
            ..ViewState::default()
        };
        let frame = frame(&forest, &state);
        let xs: Vec<f64> = frame.steps[0].particles.iter().map(|p| p.x).collect();
        assert!(xs[0] > xs[1] && xs[1] > xs[2]);
    }
}
