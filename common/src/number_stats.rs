//! Numeric coercion and averaging over loosely typed fields.

use serde_json::Value;

/// Read a value as a number. Numeric strings are parsed; anything else,
/// including non-finite results, is not a number.
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Arithmetic mean over the values that coerce to numbers.
/// Values that do not are skipped, not counted as zero.
/// Returns `None` when nothing coerces.
#[allow(clippy::cast_precision_loss)]
pub fn mean_skip_invalid<'a, I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a Value>,
{
    let (sum, count) = values
        .into_iter()
        .filter_map(coerce_numeric)
        .fold((0.0, 0usize), |(sum, count), n| (sum + n, count + 1));
    (count > 0).then(|| sum / count as f64)
}
