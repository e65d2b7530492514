//! Numerically stable log-domain arithmetic for importance weights
//!
//! SMC importance weights underflow `f64` long before a trace of any
//! interesting depth finishes, so every accumulation in this crate happens in
//! log space. The identities here are the standard log-sum-exp family with
//! explicit handling of `-inf` absorbing elements, which arise both from
//! zero-probability particles and from the JSON sentinel decoding performed
//! in [`crate::trace`].

use thiserror::Error;

/// Errors from log-domain reductions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogMathError {
    /// `log_mean_exp` of an empty sequence would be `-inf - -inf = NaN`.
    #[error("log_mean_exp of an empty sequence is undefined")]
    EmptyInput,
}

/// Stable `ln(exp(x) + exp(y))`.
///
/// `-inf` acts as the additive identity: if either operand is `-inf` the
/// other is returned unchanged, so a fold over weights that are all `-inf`
/// stays at `-inf` instead of drifting into NaN.
pub fn log_add_exp(x: f64, y: f64) -> f64 {
    if x == f64::NEG_INFINITY {
        return y;
    }
    if y == f64::NEG_INFINITY {
        return x;
    }
    x.max(y) + (-(x - y).abs()).exp().ln_1p()
}

/// Stable `ln(sum(exp(w)))` over a sequence of log-weights.
///
/// A left fold of [`log_add_exp`] starting from `-inf`; the empty sequence
/// yields `-inf` (the log of an empty sum).
pub fn log_sum_exp<I>(logweights: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    logweights
        .into_iter()
        .fold(f64::NEG_INFINITY, log_add_exp)
}

/// Stable `ln(mean(exp(w)))` over a non-empty slice of log-weights.
///
/// An all-`-inf` input returns `-inf` (the mean of all-zero weights is
/// zero); only the empty slice is an error.
pub fn log_mean_exp(logweights: &[f64]) -> Result<f64, LogMathError> {
    if logweights.is_empty() {
        return Err(LogMathError::EmptyInput);
    }
    Ok(log_sum_exp(logweights.iter().copied()) - (logweights.len() as f64).ln())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck::{quickcheck, TestResult};

    #[test]
    fn neg_infinity_is_identity() {
        assert_eq!(log_add_exp(-1.5, f64::NEG_INFINITY), -1.5);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, -1.5), -1.5);
        assert_eq!(
            log_add_exp(f64::NEG_INFINITY, f64::NEG_INFINITY),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn matches_direct_computation_in_safe_range() {
        assert_relative_eq!(log_add_exp(0.0, 0.0), 2.0_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(
            log_add_exp(-1.0, -2.0),
            ((-1.0_f64).exp() + (-2.0_f64).exp()).ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn stable_for_extreme_magnitudes() {
        // Direct exp() of either operand would under/overflow.
        let r = log_add_exp(-1000.0, -1001.0);
        assert_relative_eq!(r, -1000.0 + (-1.0_f64).exp().ln_1p(), epsilon = 1e-12);
        assert!(log_add_exp(800.0, 799.0).is_finite());
    }

    #[test]
    fn sum_of_empty_is_neg_infinity() {
        assert_eq!(log_sum_exp(std::iter::empty()), f64::NEG_INFINITY);
    }

    #[test]
    fn temperature_two_scenario() {
        // logweights [0, -2] at T=2: log_add_exp(0, -1) ~= 0.3132617
        let r = log_add_exp(0.0 / 2.0, -2.0 / 2.0);
        assert_relative_eq!(r, 0.313_261_687_518_222_8, epsilon = 1e-12);
    }

    #[test]
    fn mean_of_empty_is_an_error() {
        assert_eq!(log_mean_exp(&[]), Err(LogMathError::EmptyInput));
    }

    #[test]
    fn mean_of_all_neg_infinity_is_neg_infinity() {
        let r = log_mean_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]).unwrap();
        assert_eq!(r, f64::NEG_INFINITY);
    }

    quickcheck! {
        fn prop_singleton_is_identity(x: f64) -> TestResult {
            if !x.is_finite() {
                return TestResult::discard();
            }
            TestResult::from_bool((log_sum_exp([x]) - x).abs() < 1e-12)
        }

        fn prop_commutative(x: f64, y: f64) -> TestResult {
            if !x.is_finite() || !y.is_finite() {
                return TestResult::discard();
            }
            TestResult::from_bool((log_add_exp(x, y) - log_add_exp(y, x)).abs() < 1e-12)
        }

        fn prop_reorder_invariant(ws: Vec<f64>) -> TestResult {
            let mut ws = ws;
            ws.retain(|w| w.is_finite() && w.abs() < 1e3);
            if ws.is_empty() {
                return TestResult::discard();
            }
            let forward = log_sum_exp(ws.iter().copied());
            ws.reverse();
            let backward = log_sum_exp(ws.iter().copied());
            TestResult::from_bool((forward - backward).abs() < 1e-9)
        }

        fn prop_lower_bounded_by_max(ws: Vec<f64>) -> TestResult {
            let ws: Vec<f64> = ws.into_iter().filter(|w| w.is_finite()).collect();
            if ws.is_empty() {
                return TestResult::discard();
            }
            let max = ws.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            TestResult::from_bool(log_sum_exp(ws.iter().copied()) >= max)
        }
    }
}
