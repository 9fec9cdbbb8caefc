use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    exchange_symbol, Balance, Candle, Error, ExchangeClient, OrderFill, OrderSide, Result,
};

const BASE_URL: &str = "https://api.binance.com";

/// REST API client for Binance spot. Implements the market-data / trading
/// collaborator for live mode: klines, ticker price, account balances, and
/// market orders with HMAC-SHA256 request signing.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{BASE_URL}{path}?{params}");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query);
        let url = format!("{BASE_URL}{path}?{query}&signature={signature}");

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = format!("{params}&timestamp={ts}");
        let signature = self.sign(&query);
        let body = format!("{query}&signature={signature}");
        let url = format!("{BASE_URL}{path}");

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let params = format!(
            "symbol={}&interval={}&limit={}",
            exchange_symbol(symbol),
            timeframe,
            limit
        );
        let body = self.public_get("/api/v3/klines", &params).await?;

        // Klines arrive as arrays: [openTime, open, high, low, close,
        // volume, closeTime, ...] with prices as strings.
        let rows: Vec<serde_json::Value> = serde_json::from_str(&body)?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let fields = row
                .as_array()
                .ok_or_else(|| Error::Exchange("Malformed kline row".to_string()))?;
            if fields.len() < 6 {
                return Err(Error::Exchange("Malformed kline row".to_string()));
            }
            let open_time = fields[0]
                .as_i64()
                .ok_or_else(|| Error::Exchange("Malformed kline timestamp".to_string()))?;
            let timestamp = Utc
                .timestamp_millis_opt(open_time)
                .single()
                .ok_or_else(|| Error::Exchange("Kline timestamp out of range".to_string()))?;
            candles.push(Candle {
                timestamp,
                open: parse_price(&fields[1])?,
                high: parse_price(&fields[2])?,
                low: parse_price(&fields[3])?,
                close: parse_price(&fields[4])?,
                volume: parse_price(&fields[5])?,
            });
        }
        Ok(candles)
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let params = format!("symbol={}", exchange_symbol(symbol));
        let body = self.public_get("/api/v3/ticker/price", &params).await?;
        let ticker: PriceTicker = serde_json::from_str(&body)?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|e| Error::Exchange(e.to_string()))
    }

    async fn free_balance(&self, asset: &str) -> Result<Balance> {
        let body = self.signed_get("/api/v3/account", "").await?;
        let account: AccountResponse = serde_json::from_str(&body)?;

        let asset = asset.to_uppercase();
        let entry = account.balances.iter().find(|b| b.asset == asset);
        let free = entry
            .map(|b| b.free.parse::<f64>().unwrap_or(0.0))
            .unwrap_or(0.0);
        let locked = entry
            .map(|b| b.locked.parse::<f64>().unwrap_or(0.0))
            .unwrap_or(0.0);

        Ok(Balance {
            free,
            used: locked,
            total: free + locked,
        })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        reference_price: f64,
    ) -> Result<OrderFill> {
        // Buys spend quote currency (quoteOrderQty); sells liquidate a base
        // quantity. Binance computes the base fill for quote-cost buys.
        let params = match side {
            OrderSide::Buy => format!(
                "symbol={}&side=BUY&type=MARKET&quoteOrderQty={}",
                exchange_symbol(symbol),
                amount
            ),
            OrderSide::Sell => format!(
                "symbol={}&side=SELL&type=MARKET&quantity={}",
                exchange_symbol(symbol),
                amount
            ),
        };

        debug!(symbol, %side, amount, reference_price, "Submitting market order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;

        let filled_quantity = resp.executed_qty.parse::<f64>().unwrap_or(0.0);
        let quote_total = resp.cummulative_quote_qty.parse::<f64>().unwrap_or(0.0);
        let average_price = if filled_quantity > 0.0 {
            quote_total / filled_quantity
        } else {
            reference_price
        };
        let fee = resp
            .fills
            .iter()
            .filter_map(|f| f.commission.parse::<f64>().ok())
            .sum();

        Ok(OrderFill {
            symbol: symbol.to_string(),
            side,
            filled_quantity,
            average_price,
            fee,
            timestamp: Utc::now(),
        })
    }
}

fn parse_price(value: &serde_json::Value) -> Result<f64> {
    value
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| value.as_f64())
        .ok_or_else(|| Error::Exchange("Malformed kline price".to_string()))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    executed_qty: String,
    cummulative_quote_qty: String,
    #[serde(default)]
    fills: Vec<FillDetail>,
}

#[derive(Deserialize)]
struct FillDetail {
    commission: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<AssetBalance>,
}

#[derive(Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}
