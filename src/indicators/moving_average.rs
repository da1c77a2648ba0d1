/// Exponential Moving Average over the whole series
///
/// Unadjusted recurrence seeded with the first value:
/// `ema[0] = x[0]`, `ema[i] = a * x[i] + (1 - a) * ema[i - 1]`, `a = 2 / (span + 1)`.
/// Returns one value per input.
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);

    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &value in values {
        let ema = match prev {
            None => value,
            Some(p) => alpha * value + (1.0 - alpha) * p,
        };
        out.push(ema);
        prev = Some(ema);
    }

    out
}
