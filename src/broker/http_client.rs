// =============================================================================
// HttpBrokerClient — HMAC-signed REST adapter for the broker bridge
// =============================================================================
//
// HMAC-SHA256 query signature, a fixed receive window, and a
// `reqwest::Client` with default headers, talking to the broker-bridge
// surface defined in `broker/mod.rs` (positions carry SL/TP, accounts carry
// margin).
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, warn};

use super::{
    AccountInfo, BrokerBridge, BrokerPosition, ModifyResult, OrderRequest, OrderResponse,
    PartialCloseResult, Quote, SymbolInfo,
};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

pub struct HttpBrokerClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpBrokerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&api_key) {
            headers.insert("X-API-KEY", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build broker HTTP client");

        Self {
            api_key,
            secret: secret.into(),
            base_url: base_url.into(),
            http,
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "timestamp={}&recvWindow={}",
            Self::timestamp_ms(),
            RECV_WINDOW_MS
        ));
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }
}

#[async_trait]
impl BrokerBridge for HttpBrokerClient {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}/quote?symbol={}", self.base_url, symbol);
        debug!(symbol, api_key = %self.api_key, "fetching quote");
        let resp: Quote = self
            .http
            .get(&url)
            .send()
            .await
            .context("quote request failed")?
            .error_for_status()
            .context("quote request returned error status")?
            .json()
            .await
            .context("failed to decode quote response")?;
        Ok(resp)
    }

    async fn account(&self) -> Result<AccountInfo> {
        let query = self.signed_query(&[]);
        let url = format!("{}/account?{}", self.base_url, query);
        let resp: AccountInfo = self
            .http
            .get(&url)
            .send()
            .await
            .context("account request failed")?
            .error_for_status()
            .context("account request returned error status")?
            .json()
            .await
            .context("failed to decode account response")?;
        Ok(resp)
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let query = self.signed_query(&[]);
        let url = format!("{}/positions?{}", self.base_url, query);
        let resp: Vec<BrokerPosition> = self
            .http
            .get(&url)
            .send()
            .await
            .context("positions request failed")?
            .error_for_status()
            .context("positions request returned error status")?
            .json()
            .await
            .context("failed to decode positions response")?;
        Ok(resp)
    }

    async fn place_order(&self, req: OrderRequest) -> Result<OrderResponse> {
        let query = self.signed_query(&[
            ("symbol", req.symbol.clone()),
            ("side", req.direction.to_string()),
            ("volume", req.volume.to_string()),
            ("magic", req.magic.to_string()),
        ]);
        let url = format!("{}/order?{}", self.base_url, query);
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .context("place_order request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            warn!(status = %status, "broker rejected order placement");
            return Err(anyhow!("broker returned status {status}"));
        }

        resp.json::<OrderResponse>()
            .await
            .context("failed to decode order response")
    }

    async fn modify_position(
        &self,
        ticket: &str,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    ) -> Result<ModifyResult> {
        let mut params = vec![("ticket", ticket.to_string())];
        if let Some(sl) = sl {
            params.push(("sl", sl.to_string()));
        }
        if let Some(tp) = tp {
            params.push(("tp", tp.to_string()));
        }
        let query = self.signed_query(&params);
        let url = format!("{}/modify?{}", self.base_url, query);
        let resp: ModifyResult = self
            .http
            .post(&url)
            .send()
            .await
            .context("modify_position request failed")?
            .json()
            .await
            .context("failed to decode modify response")?;
        Ok(resp)
    }

    async fn partial_close(
        &self,
        ticket: &str,
        volume: Decimal,
        price: Decimal,
        deviation_pips: f64,
    ) -> Result<PartialCloseResult> {
        let query = self.signed_query(&[
            ("ticket", ticket.to_string()),
            ("volume", volume.to_string()),
            ("price", price.to_string()),
            ("deviation", deviation_pips.to_string()),
        ]);
        let url = format!("{}/partial_close?{}", self.base_url, query);
        let resp: PartialCloseResult = self
            .http
            .post(&url)
            .send()
            .await
            .context("partial_close request failed")?
            .json()
            .await
            .context("failed to decode partial_close response")?;
        Ok(resp)
    }

    async fn close_position(&self, ticket: &str) -> Result<ModifyResult> {
        let query = self.signed_query(&[("ticket", ticket.to_string())]);
        let url = format!("{}/close?{}", self.base_url, query);
        let resp: ModifyResult = self
            .http
            .post(&url)
            .send()
            .await
            .context("close_position request failed")?
            .json()
            .await
            .context("failed to decode close response")?;
        Ok(resp)
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        let url = format!("{}/symbol_info?symbol={}", self.base_url, symbol);
        let resp: SymbolInfo = self
            .http
            .get(&url)
            .send()
            .await
            .context("symbol_info request failed")?
            .json()
            .await
            .context("failed to decode symbol_info response")?;
        Ok(resp)
    }
}
