//! Magnitude auto-alignment for numeric range filters.
//!
//! Users say "population < 1.5" meaning millions; the KG stores 1 500 000.
//! Before a range filter runs, a handful of actual values is sampled and the
//! user threshold is rewritten when the mismatch matches a well-known factor.

/// Ratio band treated as "units already consistent".
const CONSISTENT_LO: f64 = 0.5;
const CONSISTENT_HI: f64 = 2.0;

/// ±50 % acceptance band around each candidate factor. Deliberately wide:
/// the sampled median and the user's target differ for ordinary reasons too.
const FACTOR_TOLERANCE: f64 = 0.5;

/// Upper median of the positive values in the sample. The median resists the
/// outliers a mean would be dragged by (one 3-second trailer among films).
pub fn positive_median(values: &[f64]) -> Option<f64> {
    let mut positives: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
    if positives.is_empty() {
        return None;
    }
    positives.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(positives[positives.len() / 2])
}

/// Decide the correction factor for a user threshold given the sampled
/// median. `None` means the units look consistent (or no safe factor fits).
pub fn alignment_factor(median: f64, user_value: f64) -> Option<(f64, &'static str)> {
    if user_value == 0.0 || median <= 0.0 {
        return None;
    }
    let ratio = median / user_value;
    if (CONSISTENT_LO..=CONSISTENT_HI).contains(&ratio) {
        return None;
    }

    // Sexagesimal time factors first, then decades.
    if close_to(ratio, 60.0) {
        return Some((60.0, "minute -> second (x60)"));
    }
    if close_to(ratio, 1.0 / 60.0) {
        return Some((1.0 / 60.0, "second -> minute (x1/60)"));
    }
    if close_to(ratio, 3600.0) {
        return Some((3600.0, "hour -> second (x3600)"));
    }

    let log_diff = ratio.log10();
    let rounded = log_diff.round();
    if rounded.abs() >= 2.0 && (log_diff - rounded).abs() < 0.4 {
        return Some((10f64.powf(rounded), "magnitude correction"));
    }
    None
}

fn close_to(value: f64, target: f64) -> bool {
    value > target * (1.0 - FACTOR_TOLERANCE) && value < target * (1.0 + FACTOR_TOLERANCE)
}
