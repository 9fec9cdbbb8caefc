//! Realized profit-and-loss reconciliation over the trade log.
//!
//! The reconciler is independent of the live engine: it consumes any
//! ordered trade history and re-derives realized PnL from scratch, so the
//! report is deterministic and idempotent over an unchanged log.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{OrderSide, TradeLogEntry};

/// Per-symbol slice of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPnl {
    pub realized_pnl: f64,
    pub total_buy_trades: usize,
    pub total_sell_trades: usize,
}

/// Derived report, recomputed on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlReport {
    pub total_realized_pnl: f64,
    pub total_trades: usize,
    pub pnl_by_symbol: HashMap<String, SymbolPnl>,
}

impl PnlReport {
    pub fn empty() -> Self {
        Self {
            total_realized_pnl: 0.0,
            total_trades: 0,
            pnl_by_symbol: HashMap::new(),
        }
    }
}

/// Compute realized PnL with FIFO lot matching.
///
/// Per symbol, buys and sells are each ordered oldest first (ties keep log
/// order; the sort is stable) and matched pairwise: the oldest unmatched
/// buy against the oldest unmatched sell, `min(buyQty, sellQty)` units at a
/// time, accumulating `(sellPrice - buyPrice) * matchedQty`. Whatever
/// remains unmatched is an open position and contributes nothing.
pub fn reconcile(entries: &[TradeLogEntry]) -> PnlReport {
    if entries.is_empty() {
        return PnlReport::empty();
    }

    let mut by_symbol: HashMap<String, Vec<&TradeLogEntry>> = HashMap::new();
    for entry in entries {
        by_symbol.entry(entry.symbol.clone()).or_default().push(entry);
    }

    let mut pnl_by_symbol = HashMap::new();
    let mut total_realized_pnl = 0.0;

    for (symbol, logs) in by_symbol {
        let mut buys: Vec<(f64, f64)> = Vec::new(); // (price, remaining qty)
        let mut sells: Vec<(f64, f64)> = Vec::new();
        {
            let mut buy_logs: Vec<&TradeLogEntry> = logs
                .iter()
                .copied()
                .filter(|l| l.action == OrderSide::Buy)
                .collect();
            let mut sell_logs: Vec<&TradeLogEntry> = logs
                .iter()
                .copied()
                .filter(|l| l.action == OrderSide::Sell)
                .collect();
            // Stable sorts: equal timestamps preserve log order.
            buy_logs.sort_by_key(|l| l.timestamp);
            sell_logs.sort_by_key(|l| l.timestamp);
            buys.extend(buy_logs.iter().map(|l| (l.price, l.quantity)));
            sells.extend(sell_logs.iter().map(|l| (l.price, l.quantity)));
        }

        let total_buy_trades = buys.len();
        let total_sell_trades = sells.len();

        let mut realized_pnl = 0.0;
        let mut buy_idx = 0;
        let mut sell_idx = 0;

        while buy_idx < buys.len() && sell_idx < sells.len() {
            let (buy_price, buy_qty) = &mut buys[buy_idx];
            let sell_price = sells[sell_idx].0;
            let matched = buy_qty.min(sells[sell_idx].1);

            if matched > 0.0 {
                realized_pnl += (sell_price - *buy_price) * matched;
                *buy_qty -= matched;
                sells[sell_idx].1 -= matched;
            }

            // Both cursors may advance in the same step when the matched
            // quantity exhausts both sides.
            if buys[buy_idx].1 == 0.0 {
                buy_idx += 1;
            }
            if sells[sell_idx].1 == 0.0 {
                sell_idx += 1;
            }
        }

        debug!(symbol = %symbol, realized_pnl, "Symbol reconciled");
        total_realized_pnl += realized_pnl;
        pnl_by_symbol.insert(
            symbol,
            SymbolPnl {
                realized_pnl,
                total_buy_trades,
                total_sell_trades,
            },
        );
    }

    PnlReport {
        total_realized_pnl,
        total_trades: entries.len(),
        pnl_by_symbol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(symbol: &str, action: OrderSide, price: f64, quantity: f64, minute: i64) -> TradeLogEntry {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TradeLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            action,
            reason: "test".to_string(),
            price,
            quantity,
            fee: 0.0,
            timestamp: t0 + Duration::minutes(minute),
        }
    }

    #[test]
    fn empty_log_yields_empty_report() {
        let report = reconcile(&[]);
        assert_eq!(report, PnlReport::empty());
    }

    #[test]
    fn fifo_matches_oldest_buy_with_oldest_sell() {
        // BUY 1@100, BUY 1@110, SELL 1@120, SELL 1@90
        // FIFO pairs 100/120 (+20) and 110/90 (-20): total 0
        let log = vec![
            entry("BTC/USDT", OrderSide::Buy, 100.0, 1.0, 0),
            entry("BTC/USDT", OrderSide::Buy, 110.0, 1.0, 1),
            entry("BTC/USDT", OrderSide::Sell, 120.0, 1.0, 2),
            entry("BTC/USDT", OrderSide::Sell, 90.0, 1.0, 3),
        ];
        let report = reconcile(&log);
        assert_eq!(report.total_realized_pnl, 0.0);
        assert_eq!(report.total_trades, 4);
        let detail = &report.pnl_by_symbol["BTC/USDT"];
        assert_eq!(detail.realized_pnl, 0.0);
        assert_eq!(detail.total_buy_trades, 2);
        assert_eq!(detail.total_sell_trades, 2);
    }

    #[test]
    fn partial_fills_split_across_lots() {
        // One large sell consumes two buy lots at different prices
        let log = vec![
            entry("ETH/USDT", OrderSide::Buy, 100.0, 1.0, 0),
            entry("ETH/USDT", OrderSide::Buy, 110.0, 2.0, 1),
            entry("ETH/USDT", OrderSide::Sell, 120.0, 2.5, 2),
        ];
        let report = reconcile(&log);
        // 1.0 * (120-100) + 1.5 * (120-110) = 20 + 15 = 35
        assert!((report.total_realized_pnl - 35.0).abs() < 1e-9);
    }

    #[test]
    fn unmatched_remainder_contributes_nothing() {
        let log = vec![
            entry("BTC/USDT", OrderSide::Buy, 100.0, 2.0, 0),
            entry("BTC/USDT", OrderSide::Sell, 150.0, 0.5, 1),
        ];
        let report = reconcile(&log);
        // Only 0.5 units realize: 0.5 * 50 = 25; 1.5 units stay open
        assert!((report.total_realized_pnl - 25.0).abs() < 1e-9);
    }

    #[test]
    fn symbols_are_reconciled_independently() {
        let log = vec![
            entry("BTC/USDT", OrderSide::Buy, 100.0, 1.0, 0),
            entry("BTC/USDT", OrderSide::Sell, 110.0, 1.0, 1),
            entry("ETH/USDT", OrderSide::Buy, 50.0, 1.0, 2),
            entry("ETH/USDT", OrderSide::Sell, 45.0, 1.0, 3),
        ];
        let report = reconcile(&log);
        assert!((report.pnl_by_symbol["BTC/USDT"].realized_pnl - 10.0).abs() < 1e-9);
        assert!((report.pnl_by_symbol["ETH/USDT"].realized_pnl + 5.0).abs() < 1e-9);
        assert!((report.total_realized_pnl - 5.0).abs() < 1e-9);
    }

    #[test]
    fn equal_timestamps_keep_log_order() {
        // Two buys at the same instant: the earlier log entry is matched first
        let log = vec![
            entry("BTC/USDT", OrderSide::Buy, 100.0, 1.0, 0),
            entry("BTC/USDT", OrderSide::Buy, 200.0, 1.0, 0),
            entry("BTC/USDT", OrderSide::Sell, 150.0, 1.0, 1),
        ];
        let report = reconcile(&log);
        // The 100 lot matches: +50. Were the 200 lot matched first it
        // would be -50.
        assert!((report.total_realized_pnl - 50.0).abs() < 1e-9);
    }

    #[test]
    fn reconcile_is_idempotent_over_an_unchanged_log() {
        let log = vec![
            entry("BTC/USDT", OrderSide::Buy, 100.0, 1.5, 0),
            entry("BTC/USDT", OrderSide::Sell, 130.0, 1.0, 1),
            entry("ETH/USDT", OrderSide::Buy, 50.0, 3.0, 2),
        ];
        let first = reconcile(&log);
        let second = reconcile(&log);
        assert_eq!(first, second);
    }
}
