// =============================================================================
// Binance exchange adapter — HMAC-SHA256 signed REST client
// =============================================================================
//
// Rewrite of the teacher's `binance/client.rs`: same HMAC signing, header,
// and `#[instrument]` idioms, but every response is classified into
// `EngineError::Exchange{Transient,Duplicate,Permanent}` instead of a bare
// `anyhow::bail!`, and `get_klines` builds the new `market_data::Candle`
// struct's full field set (the teacher's `Candle::new(...)` call does not
// exist on that struct) instead of the old 7-field one.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::EngineError;
use crate::market_data::Candle;
use crate::types::BalanceInfo;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Binance order-placement acknowledgement, normalized from the raw JSON
/// response — callers never touch `serde_json::Value` directly.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub status: String,
    pub filled_qty: f64,
    pub avg_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub status: String,
}

#[derive(Clone)]
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: "https://api.binance.com".to_string(),
            client,
        }
    }

    pub fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// Classify a non-2xx Binance response into the engine's error taxonomy.
    /// Binance error codes in the -1xxx/-2xxx range are mostly transient
    /// (rate limit, timeout); `-2010` (duplicate client order id) maps to
    /// `ExchangeDuplicate` so the executor's idempotency check can treat it
    /// as "already placed" rather than a failure; everything else permanent.
    fn classify_error(status: reqwest::StatusCode, body: &serde_json::Value) -> EngineError {
        let code = body.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
        let msg = body
            .get("msg")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();

        if code == -2010 && msg.to_lowercase().contains("duplicate") {
            return EngineError::ExchangeDuplicate(msg);
        }
        if status.is_server_error() || code == -1003 || code == -1021 {
            return EngineError::ExchangeTransient(format!("{status} code={code} msg={msg}"));
        }
        EngineError::ExchangePermanent(format!("{status} code={code} msg={msg}"))
    }

    #[instrument(skip(self), name = "exchange::get_account")]
    pub async fn get_account(&self) -> Result<serde_json::Value, EngineError> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }
        Ok(body)
    }

    #[instrument(skip(self), name = "exchange::get_balances")]
    pub async fn get_balances(&self) -> Result<Vec<BalanceInfo>, EngineError> {
        let account = self.get_account().await?;
        let balances = account["balances"].as_array().cloned().unwrap_or_default();
        Ok(balances
            .into_iter()
            .filter_map(|b| {
                let asset = b.get("asset")?.as_str()?.to_string();
                let free: f64 = b.get("free")?.as_str()?.parse().ok()?;
                let locked: f64 = b.get("locked")?.as_str()?.parse().ok()?;
                Some(BalanceInfo { asset, free, locked })
            })
            .collect())
    }

    /// POST /api/v3/order. `client_order_id` carries the engine's
    /// `QS-{trade_id}-{seq}` idempotency key — the caller must persist the
    /// `Order` row with this key *before* calling, so a crash between the
    /// write and the network call is recoverable (see `execution::live`).
    #[instrument(skip(self, price, time_in_force), name = "exchange::place_order")]
    pub async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: f64,
        price: Option<f64>,
        time_in_force: Option<&str>,
        client_order_id: &str,
    ) -> Result<OrderAck, EngineError> {
        let mut params = format!("symbol={symbol}&side={side}&type={order_type}&quantity={quantity}");
        if let Some(p) = price {
            params.push_str(&format!("&price={p}"));
        }
        if let Some(tif) = time_in_force {
            params.push_str(&format!("&timeInForce={tif}"));
        }
        params.push_str(&format!("&newClientOrderId={client_order_id}"));

        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        debug!(symbol, side, order_type, quantity, client_order_id, "placing order");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let exchange_order_id = body
            .get("orderId")
            .map(|v| v.to_string())
            .unwrap_or_default();
        let order_status = body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("NEW")
            .to_string();
        let filled_qty: f64 = body
            .get("executedQty")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let avg_price = body
            .get("cummulativeQuoteQty")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|_| filled_qty > 0.0)
            .map(|quote| quote / filled_qty);

        Ok(OrderAck {
            exchange_order_id,
            status: order_status,
            filled_qty,
            avg_price,
        })
    }

    /// GET /api/v3/order by client order id — used by reconciliation to
    /// learn the true status of an order the engine persisted but never
    /// confirmed a response for (e.g. the process died between `place_order`
    /// sending the request and receiving its response).
    #[instrument(skip(self), name = "exchange::get_order")]
    pub async fn get_order(&self, symbol: &str, client_order_id: &str) -> Result<Option<OrderAck>, EngineError> {
        let params = format!("symbol={symbol}&origClientOrderId={client_order_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let filled_qty: f64 = body
            .get("executedQty")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let avg_price = body
            .get("cummulativeQuoteQty")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|_| filled_qty > 0.0)
            .map(|quote| quote / filled_qty);

        Ok(Some(OrderAck {
            exchange_order_id: body.get("orderId").map(|v| v.to_string()).unwrap_or_default(),
            status: body
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
            filled_qty,
            avg_price,
        }))
    }

    #[instrument(skip(self), name = "exchange::cancel_order")]
    pub async fn cancel_order(&self, symbol: &str, exchange_order_id: &str) -> Result<(), EngineError> {
        let params = format!("symbol={symbol}&orderId={exchange_order_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
            let err = Self::classify_error(status, &body);
            // An order that is already gone (filled/canceled elsewhere) is
            // not a failure for a convergence-seeking reconcile pass.
            if status == reqwest::StatusCode::NOT_FOUND {
                warn!(symbol, exchange_order_id, "order already gone on cancel");
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    #[instrument(skip(self), name = "exchange::get_open_orders")]
    pub async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>, EngineError> {
        let params = match symbol {
            Some(s) => format!("symbol={s}"),
            None => String::new(),
        };
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/openOrders?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let orders = body
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|o| {
                Some(OpenOrder {
                    exchange_order_id: o.get("orderId")?.to_string(),
                    client_order_id: o.get("clientOrderId")?.as_str()?.to_string(),
                    symbol: o.get("symbol")?.as_str()?.to_string(),
                    side: o.get("side")?.as_str()?.to_string(),
                    status: o.get("status")?.as_str()?.to_string(),
                })
            })
            .collect();
        Ok(orders)
    }

    /// GET /api/v3/klines (public). Builds the engine's full `Candle` shape;
    /// Binance's kline response lacks an `is_closed` flag for historical
    /// fetches, so everything returned here is marked closed.
    #[instrument(skip(self), name = "exchange::get_klines")]
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, EngineError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::ExchangeTransient(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let raw = body.as_array().cloned().unwrap_or_default();
        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 11 => a.clone(),
                _ => {
                    warn!("skipping malformed kline entry");
                    continue;
                }
            };
            let parse_f64 = |v: &serde_json::Value| -> f64 {
                v.as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0)
            };
            candles.push(Candle {
                open_time: arr[0].as_i64().unwrap_or(0),
                open: parse_f64(&arr[1]),
                high: parse_f64(&arr[2]),
                low: parse_f64(&arr[3]),
                close: parse_f64(&arr[4]),
                volume: parse_f64(&arr[5]),
                close_time: arr[6].as_i64().unwrap_or(0),
                quote_volume: parse_f64(&arr[7]),
                trades_count: arr[8].as_u64().unwrap_or(0),
                taker_buy_volume: parse_f64(&arr[9]),
                taker_buy_quote_volume: parse_f64(&arr[10]),
                is_closed: true,
            });
        }
        Ok(candles)
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
