//! SMC-SCOPE core: genealogy reconstruction and log-domain aggregation for
//! Sequential Monte Carlo particle-search traces
//!
//! A trace is a sequence of steps over a fixed-size population of weighted
//! particles, where resample steps reassign ancestry through a 1-based
//! ancestor-index array. This crate rebuilds the parent/child forest across
//! those steps, propagates a selection to its full ancestor/descendant
//! closure, and computes temperature-adjusted weighted histogram masses —
//! everything the viewer draws, with none of the drawing.
//!
//! Pipeline: [`trace::raw`] (wire format) → [`trace::normalize`] (typed,
//! sentinel-decoded steps) → [`genealogy::Forest`] →
//! [`selection::SelectionState`] / [`aggregate`].

pub mod aggregate;
pub mod genealogy;
pub mod logmath;
pub mod selection;
pub mod trace;

use thiserror::Error;

pub use aggregate::{
    step_aggregate, step_histogram, AggregateError, Bin, HistogramSpec, StepAggregate,
    StepHistogram, Subbin, SubsetKind,
};
pub use genealogy::{Forest, GenealogyError, ParticleHandle};
pub use logmath::{log_add_exp, log_mean_exp, log_sum_exp, LogMathError};
pub use selection::{ParticleFlags, SelectionState};
pub use trace::normalize::{normalize, ExprId, NormalizeError, NormalizedTrace, Particle, Step};
pub use trace::raw::{RawTrace, Summary, TraceFile};

/// Umbrella error for a full decode-and-build pass.
///
/// Every variant is unrecoverable for the current render cycle: the caller
/// aborts, surfaces the message, and draws nothing partial.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Genealogy(#[from] GenealogyError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    LogMath(#[from] LogMathError),
}

/// Decode a raw trace and build its forest in one step.
pub fn build_forest(raw: &RawTrace) -> Result<Forest, CoreError> {
    let normalized = normalize(raw)?;
    Ok(Forest::build(&normalized)?)
}
