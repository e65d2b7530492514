//! Numeric formatting for labels and reports
//!
//! Probabilities span hundreds of orders of magnitude in one trace, so
//! labels switch to scientific notation outside a comfortable band.

/// Format a probability: exact 0 and 1 stay bare, values within
/// `[1e-3, 1e3]` print with `digits` significant digits, everything else in
/// scientific notation.
pub fn show_prob(prob: f64, digits: usize) -> String {
    if prob == 0.0 {
        return "0".to_owned();
    }
    if prob == 1.0 {
        return "1".to_owned();
    }
    if !prob.is_finite() {
        return format!("{prob}");
    }
    let digits = digits.max(1);
    if (1e-3..=1e3).contains(&prob.abs()) {
        format!("{:.*}", sig_decimals(prob, digits), prob)
    } else {
        format!("{:.*e}", digits - 1, prob)
    }
}

/// Format a count-like value: whole numbers above 10, one decimal above 1,
/// significant digits below.
pub fn show_n(x: f64, digits: usize) -> String {
    if !x.is_finite() {
        return format!("{x}");
    }
    if x > 10.0 {
        format!("{x:.0}")
    } else if x > 1.0 {
        format!("{x:.1}")
    } else {
        format!("{:.*e}", digits.saturating_sub(1), x)
    }
}

/// Decimal places needed for `digits` significant digits of `v`.
fn sig_decimals(v: f64, digits: usize) -> usize {
    let magnitude = v.abs().log10().floor() as i64;
    (digits as i64 - 1 - magnitude).clamp(0, 17) as usize
}
