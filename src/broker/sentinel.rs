// =============================================================================
// SentinelBroker — in-memory broker bridge for demo mode and the simulator
// =============================================================================
//
// Never performs network I/O. Quotes are seeded per symbol and can be pushed
// by the caller (market data refresher in demo mode); orders always "fill" at
// the requested price with a synthetic ticket.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{
    AccountInfo, BrokerBridge, BrokerPosition, ModifyResult, OrderRequest, OrderResponse,
    PartialCloseResult, Quote, SymbolInfo,
};

pub struct SentinelBroker {
    quotes: RwLock<HashMap<String, Quote>>,
    positions: RwLock<HashMap<String, BrokerPosition>>,
    account: RwLock<AccountInfo>,
    next_ticket: AtomicU64,
}

impl SentinelBroker {
    pub fn new() -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            account: RwLock::new(AccountInfo {
                balance: dec!(10000),
                equity: dec!(10000),
                margin: dec!(0),
                free_margin: dec!(10000),
                margin_level: dec!(9999),
                credit: dec!(0),
            }),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn push_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.quotes.write().insert(
            symbol.to_string(),
            Quote {
                bid,
                ask,
                time: chrono::Utc::now(),
            },
        );
    }

    pub fn set_account(&self, account: AccountInfo) {
        *self.account.write() = account;
    }
}

impl Default for SentinelBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerBridge for SentinelBroker {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        self.quotes
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no quote seeded for {symbol}"))
    }

    async fn account(&self) -> Result<AccountInfo> {
        Ok(*self.account.read())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.positions.read().values().cloned().collect())
    }

    async fn place_order(&self, req: OrderRequest) -> Result<OrderResponse> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst).to_string();
        let price = req.price.unwrap_or_else(|| {
            self.quotes
                .read()
                .get(&req.symbol)
                .map(|q| match req.direction {
                    crate::types::Direction::Buy => q.ask,
                    crate::types::Direction::Sell => q.bid,
                })
                .unwrap_or_default()
        });

        self.positions.write().insert(
            ticket.clone(),
            BrokerPosition {
                ticket: ticket.clone(),
                symbol: req.symbol,
                direction: req.direction,
                volume: req.volume,
                price_open: price,
                sl: req.sl,
                tp: req.tp,
                profit: Decimal::ZERO,
                open_time: chrono::Utc::now(),
            },
        );

        Ok(OrderResponse {
            ticket: Some(ticket),
            price: Some(price),
            volume: Some(req.volume),
            error: None,
        })
    }

    async fn modify_position(
        &self,
        ticket: &str,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    ) -> Result<ModifyResult> {
        let mut positions = self.positions.write();
        match positions.get_mut(ticket) {
            Some(pos) => {
                if let Some(sl) = sl {
                    pos.sl = Some(sl);
                }
                if let Some(tp) = tp {
                    pos.tp = Some(tp);
                }
                Ok(ModifyResult { ok: true, error: None })
            }
            None => Ok(ModifyResult {
                ok: false,
                error: Some(format!("unknown ticket {ticket}")),
            }),
        }
    }

    async fn partial_close(
        &self,
        ticket: &str,
        volume: Decimal,
        _price: Decimal,
        _deviation_pips: f64,
    ) -> Result<PartialCloseResult> {
        let mut positions = self.positions.write();
        match positions.get_mut(ticket) {
            Some(pos) => {
                pos.volume = (pos.volume - volume).max(Decimal::ZERO);
                Ok(PartialCloseResult {
                    ok: true,
                    new_ticket: None,
                    error: None,
                })
            }
            None => Ok(PartialCloseResult {
                ok: false,
                new_ticket: None,
                error: Some(format!("unknown ticket {ticket}")),
            }),
        }
    }

    async fn close_position(&self, ticket: &str) -> Result<ModifyResult> {
        let removed = self.positions.write().remove(ticket);
        Ok(ModifyResult {
            ok: removed.is_some(),
            error: if removed.is_some() {
                None
            } else {
                Some(format!("unknown ticket {ticket}"))
            },
        })
    }

    async fn symbol_info(&self, _symbol: &str) -> Result<SymbolInfo> {
        Ok(SymbolInfo {
            pip_value: None,
            min_lot: dec!(0.01),
            max_lot: dec!(10),
            lot_step: dec!(0.01),
            digits: 5,
            stops_level_pips: 1.0,
        })
    }
}
