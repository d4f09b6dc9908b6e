//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;
use serde_json::Value;

/// Truncate a f64 toward zero and clamp it to the i32 range, returning 0 for NaN values.
#[must_use]
pub fn trunc_f64_to_i32(value: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    let min = cast::<i32, f64>(i32::MIN).unwrap_or(f64::MIN);
    let max = cast::<i32, f64>(i32::MAX).unwrap_or(f64::MAX);
    let clamped = value.clamp(min, max).trunc();
    cast::<f64, i32>(clamped).unwrap_or(0)
}

/// Truncate a f64 toward zero and clamp it to the i64 range, returning 0 for non-finite values.
#[must_use]
pub fn trunc_f64_to_i64(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let min = cast::<i64, f64>(i64::MIN).unwrap_or(f64::MIN);
    let max = cast::<i64, f64>(i64::MAX).unwrap_or(f64::MAX);
    let clamped = value.clamp(min, max).trunc();
    cast::<f64, i64>(clamped).unwrap_or(0)
}

/// Convert i64 to f64 while allowing precision loss in a single location.
#[must_use]
pub fn i64_to_f64(value: i64) -> f64 {
    cast::<i64, f64>(value).unwrap_or(0.0)
}

/// Round `value` to the nearest multiple of `step`, ties to even multiples.
#[must_use]
pub fn round_to_step(value: i64, step: i64) -> i64 {
    if step <= 0 {
        return value;
    }
    let units = (i64_to_f64(value) / i64_to_f64(step)).round_ties_even();
    trunc_f64_to_i64(units).saturating_mul(step)
}

/// Coerce a loosely-typed JSON value into an integer.
///
/// Numbers truncate toward zero, numeric strings parse, booleans map to 0/1.
/// Everything else yields `None`.
#[must_use]
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(trunc_f64_to_i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(trunc_f64_to_i64)
            })
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Narrow an i64 into the i32 range by saturation.
#[must_use]
pub fn saturate_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}
