use super::ema_series;

/// One computed MACD sample: the MACD line (EMA(fast) − EMA(slow)) and its
/// signal line (EMA of the MACD line).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
}

/// Compute the MACD point series over close prices (oldest first).
///
/// Only samples where both lines are defined are returned, so the first
/// point corresponds to `closes[slow + signal_period - 2]`. Crossover
/// detection needs at least two points, i.e. `slow + signal_period` closes.
/// Returns an empty series (never panics) on short input or degenerate
/// periods.
pub fn macd_series(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Vec<MacdPoint> {
    if fast == 0 || signal_period == 0 || fast >= slow {
        return Vec::new();
    }

    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    if slow_ema.is_empty() {
        return Vec::new();
    }

    // The fast EMA starts `slow - fast` samples earlier; align on the slow one.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .zip(fast_ema[offset..].iter())
        .map(|(slow_v, fast_v)| fast_v - slow_v)
        .collect();

    if macd_line.len() < signal_period {
        return Vec::new();
    }

    let signal_line = ema_series(&macd_line, signal_period);
    signal_line
        .iter()
        .zip(macd_line[signal_period - 1..].iter())
        .map(|(&signal, &macd)| MacdPoint { macd, signal })
        .collect()
}
