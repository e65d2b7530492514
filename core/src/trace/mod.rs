//! Wire-format decoding and normalization of SMC particle traces
//!
//! [`raw`] mirrors the JSON trace format exactly as written by the sampler;
//! [`normalize`] turns it into the typed, sentinel-decoded step sequence the
//! genealogy builder consumes. Nothing outside this module ever sees a
//! `serde_json::Value`.

pub mod normalize;
pub mod raw;

pub use normalize::{normalize, NormalizeError, NormalizedTrace, Particle, Step};
pub use raw::{RawParticle, RawStep, RawTrace, Summary, TraceFile};
