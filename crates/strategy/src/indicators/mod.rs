//! Pure indicator math over close-price and candle slices (oldest first).
//! Everything here is a total function of its inputs; strategies own the
//! data fetching and the signal decisions.

pub mod macd;
pub mod pivots;
pub mod rsi;

pub use macd::{macd_series, MacdPoint};
pub use pivots::{pivot_levels, SrLevels};
pub use rsi::rsi;

/// Simple moving average of the last `period` values.
/// Returns `None` if fewer than `period` values are available.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average series seeded with the SMA of the first
/// `period` values. The first output corresponds to `values[period - 1]`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    out.push(ema);
    for &value in &values[period..] {
        ema = value * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}
