//! serde mirror of the trace and summary JSON documents
//!
//! A trace file is either a single run object or an array of run objects
//! (only the first run is visualized). Particles inside a step are either
//! keyed JSON objects or, when the step carries a `fieldnames` header,
//! positional rows that must be zipped against that header. Both encodings
//! are preserved here verbatim; all interpretation happens in
//! [`crate::trace::normalize`].

use log::warn;
use serde::Deserialize;
use serde_json::Value;

/// Top-level trace document: one run or an array of runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TraceFile {
    Single(RawTrace),
    Many(Vec<RawTrace>),
}

impl TraceFile {
    /// The run to visualize. An empty array yields `None`.
    pub fn primary(&self) -> Option<&RawTrace> {
        match self {
            TraceFile::Single(trace) => Some(trace),
            TraceFile::Many(traces) => traces.first(),
        }
    }
}

/// One SMC run: the step history plus an optional expression intern table.
///
/// When `expr_ids` is present, each particle's `expr` field is a 1-based
/// index into this table rather than an inline string.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrace {
    pub history: Vec<RawStep>,
    #[serde(default)]
    pub expr_ids: Option<Vec<String>>,
}

/// One element of the step history, exactly as serialized.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    /// `"resample"` or a propagation-kind tag (`"smc_step"`, `"rejuv"`, ...).
    pub mode: String,
    /// 1-based ancestor indices; present iff `mode == "resample"`.
    #[serde(default)]
    pub ancestors: Option<Vec<usize>>,
    /// Positional-row header; when present, `particles` are rows.
    #[serde(default)]
    pub fieldnames: Option<Vec<String>>,
    pub particles: Vec<RawParticle>,
}

/// A particle before normalization: keyed record or positional row.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawParticle {
    Keyed(serde_json::Map<String, Value>),
    Row(Vec<Value>),
}

/// Companion `summary.json` document, reduced to the configuration the
/// viewer consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct Summary {
    pub config: SummaryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    pub resample_temperature: ResampleTemperature,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResampleTemperature {
    pub temps: Vec<f64>,
}

impl Summary {
    /// Default histogram temperature: the first configured temperature.
    ///
    /// More than one configured temperature is a warning, not an error;
    /// only the first is used.
    pub fn default_temperature(&self) -> Option<f64> {
        let temps = &self.config.resample_temperature.temps;
        if temps.len() > 1 {
            warn!(
                "summary configures {} resample temperatures, using the first ({})",
                temps.len(),
                temps[0]
            );
        }
        temps.first().copied()
    }
}
