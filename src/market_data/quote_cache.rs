// =============================================================================
// Market Data Cache (C2)
// =============================================================================
//
// Short-TTL read-through cache over `BrokerBridge::quote`. Writes come only
// from the refresher task the scheduler drives; readers never block writers
// beyond the TTL window.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;

use crate::broker::{BrokerBridge, Quote};
use crate::clock::Clock;

const DEFAULT_TTL_MS: i64 = 200;

pub struct QuoteCache {
    broker: Arc<dyn BrokerBridge>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    cached: RwLock<HashMap<String, Quote>>,
}

impl QuoteCache {
    pub fn new(broker: Arc<dyn BrokerBridge>, clock: Arc<dyn Clock>) -> Self {
        Self {
            broker,
            clock,
            ttl_ms: DEFAULT_TTL_MS,
            cached: RwLock::new(HashMap::new()),
        }
    }

    /// Return a fresh quote for `symbol`, refreshing from the broker if the
    /// cached entry is older than the TTL. Never extrapolates a stale quote.
    pub async fn quote(&self, symbol: &str) -> Result<Quote> {
        if let Some(q) = self.cached.read().get(symbol).copied() {
            let age_ms = (self.clock.now() - q.time).num_milliseconds();
            if age_ms <= self.ttl_ms {
                return Ok(q);
            }
        }

        let fresh = self
            .broker
            .quote(symbol)
            .await
            .map_err(|e| anyhow!("quote unavailable for {symbol}: {e}"))?;
        self.cached.write().insert(symbol.to_string(), fresh);
        Ok(fresh)
    }

    /// Spread in pips for `symbol`, using `pip_size` from `symbols.rs`.
    pub async fn spread_pips(&self, symbol: &str) -> Result<f64> {
        let q = self.quote(symbol).await?;
        let pip = crate::symbols::pip_size(symbol);
        let spread = q.spread();
        Ok((spread / pip).to_string().parse::<f64>().unwrap_or(0.0))
    }

    /// Push a quote directly into the cache (used by the demo-mode refresher
    /// when running against `SentinelBroker`, which does not emit ticks on
    /// its own).
    pub fn prime(&self, symbol: &str, quote: Quote) {
        self.cached.write().insert(symbol.to_string(), quote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SentinelBroker;
    use crate::clock::FixedClock;
    use rust_decimal_macros::dec;

    fn harness() -> (Arc<SentinelBroker>, Arc<FixedClock>, QuoteCache) {
        let broker = Arc::new(SentinelBroker::new());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let cache = QuoteCache::new(broker.clone(), clock.clone());
        (broker, clock, cache)
    }

    #[tokio::test]
    async fn quote_is_served_from_cache_within_ttl() {
        let (broker, clock, cache) = harness();
        broker.push_quote("EURUSD", dec!(1.1000), dec!(1.1002));
        let first = cache.quote("EURUSD").await.unwrap();

        // change the broker's quote without advancing the clock; the cache
        // must still return the stale-but-fresh-enough first read.
        broker.push_quote("EURUSD", dec!(1.2000), dec!(1.2002));
        clock.advance(chrono::Duration::milliseconds(50));
        let second = cache.quote("EURUSD").await.unwrap();

        assert_eq!(second.bid, first.bid);
    }

    #[tokio::test]
    async fn quote_refreshes_after_ttl_expires() {
        let (broker, clock, cache) = harness();
        broker.push_quote("EURUSD", dec!(1.1000), dec!(1.1002));
        cache.quote("EURUSD").await.unwrap();

        broker.push_quote("EURUSD", dec!(1.2000), dec!(1.2002));
        clock.advance(chrono::Duration::milliseconds(250));
        let refreshed = cache.quote("EURUSD").await.unwrap();

        assert_eq!(refreshed.bid, dec!(1.2000));
    }

    #[tokio::test]
    async fn unknown_symbol_is_an_error() {
        let (_broker, _clock, cache) = harness();
        assert!(cache.quote("UNKNOWN").await.is_err());
    }

    #[tokio::test]
    async fn spread_pips_divides_by_pip_size() {
        let (broker, _clock, cache) = harness();
        broker.push_quote("EURUSD", dec!(1.1000), dec!(1.1002));
        let spread = cache.spread_pips("EURUSD").await.unwrap();
        assert!((spread - 2.0).abs() < 1e-6);
    }
}
