use common::Candle;

/// Deduplicated support and resistance levels derived from pivot lows and
/// pivot highs, in discovery order (oldest first).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SrLevels {
    pub supports: Vec<f64>,
    pub resistances: Vec<f64>,
}

impl SrLevels {
    pub fn is_empty(&self) -> bool {
        self.supports.is_empty() && self.resistances.is_empty()
    }
}

/// Identify pivot highs and lows over a candle window.
///
/// A candle is a pivot high when its high is not exceeded by any of the
/// `strength` candles on either side; the symmetric rule on lows yields
/// pivot lows. Needs at least `2 * strength + 1` candles; fewer (or
/// strength 0) returns no levels.
pub fn pivot_levels(candles: &[Candle], strength: usize) -> SrLevels {
    let mut levels = SrLevels::default();
    if strength == 0 || candles.len() < strength * 2 + 1 {
        return levels;
    }

    for i in strength..candles.len() - strength {
        let mut is_pivot_high = true;
        let mut is_pivot_low = true;

        for j in 1..=strength {
            if candles[i].high < candles[i - j].high || candles[i].high < candles[i + j].high {
                is_pivot_high = false;
            }
            if candles[i].low > candles[i - j].low || candles[i].low > candles[i + j].low {
                is_pivot_low = false;
            }
        }

        if is_pivot_high && !levels.resistances.contains(&candles[i].high) {
            levels.resistances.push(candles[i].high);
        }
        if is_pivot_low && !levels.supports.contains(&candles[i].low) {
            levels.supports.push(candles[i].low);
        }
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: usize, low: f64, high: f64) -> Candle {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            timestamp: t0 + Duration::hours(i as i64),
            open: (low + high) / 2.0,
            high,
            low,
            close: (low + high) / 2.0,
            volume: 1.0,
        }
    }

    fn series(lows_highs: &[(f64, f64)]) -> Vec<Candle> {
        lows_highs
            .iter()
            .enumerate()
            .map(|(i, &(low, high))| candle(i, low, high))
            .collect()
    }

    #[test]
    fn finds_a_single_pivot_high_and_low() {
        // V-shape lows around index 2 and peak highs around index 2
        let candles = series(&[
            (104.0, 110.0),
            (102.0, 112.0),
            (100.0, 115.0), // pivot low 100, pivot high 115
            (102.0, 112.0),
            (104.0, 110.0),
        ]);
        let levels = pivot_levels(&candles, 2);
        assert_eq!(levels.supports, vec![100.0]);
        assert_eq!(levels.resistances, vec![115.0]);
    }

    #[test]
    fn no_levels_when_window_too_small() {
        let candles = series(&[(100.0, 110.0), (99.0, 111.0), (98.0, 112.0)]);
        assert!(pivot_levels(&candles, 2).is_empty());
        assert!(pivot_levels(&candles, 0).is_empty());
    }

    #[test]
    fn duplicate_levels_are_collapsed() {
        // Two identical pivot lows at 100.0, far enough apart to both qualify
        let candles = series(&[
            (103.0, 108.0),
            (100.0, 105.0), // pivot low
            (102.0, 107.0),
            (103.0, 109.0),
            (100.0, 105.0), // pivot low, same level
            (102.0, 107.0),
            (103.0, 108.0),
        ]);
        let levels = pivot_levels(&candles, 1);
        assert_eq!(levels.supports, vec![100.0]);
    }

    #[test]
    fn monotone_series_has_no_interior_pivots() {
        let candles = series(&[
            (100.0, 101.0),
            (101.0, 102.0),
            (102.0, 103.0),
            (103.0, 104.0),
            (104.0, 105.0),
        ]);
        let levels = pivot_levels(&candles, 1);
        assert!(levels.is_empty());
    }
}
