// =============================================================================
// Broker Bridge — the external trading-terminal collaborator
// =============================================================================
//
// Everything downstream of the policy stack talks to a broker only through
// this trait. `HttpBrokerClient` is the production adapter (HMAC-signed
// REST); `SentinelBroker` is the in-memory adapter used by demo mode and the
// C20 simulator, which never reaches a network socket.
// =============================================================================

pub mod http_client;
pub mod sentinel;

pub use http_client::HttpBrokerClient;
pub use sentinel::SentinelBroker;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Direction;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub time: chrono::DateTime<chrono::Utc>,
}

impl Quote {
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub margin_level: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticket: String,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub profit: Decimal,
    pub open_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub is_limit: bool,
    pub volume: Decimal,
    pub price: Option<Decimal>,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub deviation_pips: f64,
    pub magic: u64,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub ticket: Option<String>,
    pub price: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub pip_value: Option<Decimal>,
    pub min_lot: Decimal,
    pub max_lot: Decimal,
    pub lot_step: Decimal,
    pub digits: u32,
    pub stops_level_pips: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyResult {
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialCloseResult {
    pub ok: bool,
    pub new_ticket: Option<String>,
    pub error: Option<String>,
}

/// Async RPC surface exposed by a broker terminal. Matches the external
/// interface named in the specification's §6 verbatim, generalised from a
/// spot-exchange REST client to a CFD/FX-style broker bridge.
#[async_trait]
pub trait BrokerBridge: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote>;
    async fn account(&self) -> Result<AccountInfo>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>>;
    async fn place_order(&self, req: OrderRequest) -> Result<OrderResponse>;
    async fn modify_position(
        &self,
        ticket: &str,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    ) -> Result<ModifyResult>;
    async fn partial_close(
        &self,
        ticket: &str,
        volume: Decimal,
        price: Decimal,
        deviation_pips: f64,
    ) -> Result<PartialCloseResult>;
    async fn close_position(&self, ticket: &str) -> Result<ModifyResult>;
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo>;
}
