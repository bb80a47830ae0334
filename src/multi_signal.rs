// =============================================================================
// Multi-Signal Handler (C8)
// =============================================================================
//
// Per-symbol bucket/merge/conflict pipeline over incoming signals. Each
// symbol's bucket is a bounded FIFO; a periodic tick (driven by the
// scheduler, C21) calls `process_symbol` for every symbol with a non-empty
// bucket.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::MultiSignalConfig;
use crate::symbols::pip_size;
use crate::types::{ConflictResolution, Direction, Priority, ProviderProfile, Signal};

pub struct MultiSignalHandler {
    cfg: RwLock<MultiSignalConfig>,
    buckets: RwLock<HashMap<String, VecDeque<Signal>>>,
    providers: RwLock<HashMap<String, ProviderProfile>>,
}

impl MultiSignalHandler {
    pub fn new(cfg: MultiSignalConfig) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            buckets: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_provider(&self, profile: ProviderProfile) {
        self.providers.write().insert(profile.provider_id.clone(), profile);
    }

    fn provider_weight(&self, provider_id: &str) -> Decimal {
        self.providers
            .read()
            .get(provider_id)
            .map(|p| p.weight)
            .unwrap_or(Decimal::ONE)
    }

    /// `confidence * provider_weight * priority_weight`.
    pub fn score(&self, signal: &Signal) -> Decimal {
        let confidence = Decimal::try_from(signal.confidence).unwrap_or(Decimal::ZERO);
        confidence * self.provider_weight(&signal.provider_id) * signal.priority.weight()
    }

    /// Submit a freshly parsed signal into its symbol's bucket. Rejected at
    /// intake if its confidence is below the configured threshold. Returns
    /// `true` if accepted.
    pub fn submit(&self, signal: Signal) -> bool {
        let cfg = self.cfg.read();
        if signal.confidence < cfg.confidence_threshold {
            debug!(
                signal_id = %signal.signal_id,
                confidence = signal.confidence,
                threshold = cfg.confidence_threshold,
                "signal rejected below confidence threshold"
            );
            return false;
        }
        let capacity = cfg.bucket_capacity;
        drop(cfg);

        {
            let mut providers = self.providers.write();
            let profile = providers
                .entry(signal.provider_id.clone())
                .or_insert_with(|| ProviderProfile::new(signal.provider_id.clone(), Decimal::ONE));
            profile.record(signal.confidence);
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(signal.symbol.clone()).or_default();
        if bucket.len() >= capacity {
            bucket.pop_front();
        }
        bucket.push_back(signal);
        true
    }

    fn compatible(&self, a: &Signal, b: &Signal, tolerance_pips: f64) -> bool {
        if a.split_index.is_some() || b.split_index.is_some() {
            return false;
        }
        if a.symbol != b.symbol || a.direction != b.direction {
            return false;
        }
        let pip = pip_size(&a.symbol);
        let (Some(ea), Some(eb)) = (a.entries.first(), b.entries.first()) else {
            return false;
        };
        let diff_pips = ((*ea - *eb).abs() / Decimal::try_from(pip).unwrap_or(Decimal::ONE))
            .to_string()
            .parse::<f64>()
            .unwrap_or(f64::INFINITY);
        diff_pips <= tolerance_pips
    }

    fn merge_cluster(&self, cluster: &[Signal]) -> Signal {
        if cluster.len() == 1 {
            return cluster[0].clone();
        }
        let direction = cluster[0].direction;
        let total_weight: Decimal = cluster
            .iter()
            .map(|s| self.provider_weight(&s.provider_id))
            .sum();
        let weighted_entry: Decimal = cluster
            .iter()
            .map(|s| {
                let w = self.provider_weight(&s.provider_id);
                s.entries.first().copied().unwrap_or(Decimal::ZERO) * w
            })
            .sum::<Decimal>()
            / if total_weight.is_zero() { Decimal::ONE } else { total_weight };

        let sl = cluster.iter().filter_map(|s| s.sl).reduce(|a, b| match direction {
            // Tightest-to-entry: highest SL for BUY (SL sits below entry),
            // lowest SL for SELL (SL sits above entry).
            Direction::Buy => a.max(b),
            Direction::Sell => a.min(b),
        });

        let mut tps: Vec<Decimal> = cluster.iter().flat_map(|s| s.tps.clone()).collect();
        tps.sort();
        tps.dedup();
        if direction == Direction::Sell {
            tps.reverse();
        }

        let priority = cluster.iter().map(|s| s.priority).max().unwrap_or_default();
        let confidence = cluster
            .iter()
            .map(|s| s.confidence)
            .fold(0.0_f64, f64::max);

        let mut merged = cluster[0].clone();
        merged.entries = vec![weighted_entry];
        merged.sl = sl;
        merged.tps = tps;
        merged.priority = priority;
        merged.confidence = confidence;
        merged.signal_id = format!(
            "merged:{}",
            cluster.iter().map(|s| s.signal_id.as_str()).collect::<Vec<_>>().join("+")
        );
        merged
    }

    fn cluster_by_compatibility(&self, signals: Vec<Signal>, tolerance_pips: f64) -> Vec<Signal> {
        let mut clusters: Vec<Vec<Signal>> = Vec::new();
        'outer: for signal in signals {
            for cluster in clusters.iter_mut() {
                if self.compatible(&cluster[0], &signal, tolerance_pips) {
                    cluster.push(signal);
                    continue 'outer;
                }
            }
            clusters.push(vec![signal]);
        }
        clusters.into_iter().map(|c| self.merge_cluster(&c)).collect()
    }

    /// Drain and process one symbol's bucket, returning at most one
    /// downstream signal (or `None` if `CANCEL_ALL` resolved the conflict, or
    /// the bucket was empty).
    pub fn process_symbol(&self, symbol: &str) -> Option<Signal> {
        let drained: Vec<Signal> = {
            let mut buckets = self.buckets.write();
            match buckets.get_mut(symbol) {
                Some(bucket) => bucket.drain(..).collect(),
                None => return None,
            }
        };
        if drained.is_empty() {
            return None;
        }

        let tolerance = self.cfg.read().merge_tolerance_pips;
        let merged = self.cluster_by_compatibility(drained, tolerance);

        if merged.len() == 1 {
            return Some(merged.into_iter().next().unwrap());
        }

        // More than one direction survived merging: directional conflict.
        let resolution = self.cfg.read().resolution;
        info!(symbol, clusters = merged.len(), resolution = ?resolution, "directional conflict detected");
        self.resolve_conflict(merged, resolution)
    }

    fn resolve_conflict(&self, mut candidates: Vec<Signal>, resolution: ConflictResolution) -> Option<Signal> {
        match resolution {
            ConflictResolution::CancelAll => None,
            ConflictResolution::HighestConfidence => candidates
                .into_iter()
                .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal)),
            ConflictResolution::NewestWins => candidates.into_iter().max_by_key(|s| s.timestamp),
            ConflictResolution::OldestWins => candidates.into_iter().min_by_key(|s| s.timestamp),
            ConflictResolution::HighestPriority => {
                candidates.sort_by(|a, b| {
                    let key_a = (a.priority, self.provider_weight(&a.provider_id), decimal_from_f64(a.confidence));
                    let key_b = (b.priority, self.provider_weight(&b.provider_id), decimal_from_f64(b.confidence));
                    key_a.cmp(&key_b)
                });
                candidates.pop()
            }
        }
    }
}

fn decimal_from_f64(v: f64) -> Decimal {
    Decimal::try_from(v).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn signal(id: &str, symbol: &str, direction: Direction, entry: Decimal, confidence: f64, priority: Priority) -> Signal {
        Signal {
            signal_id: id.to_string(),
            message_id: id.to_string(),
            provider_id: "p1".to_string(),
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            direction,
            entries: vec![entry],
            sl: None,
            tps: vec![],
            volume: None,
            confidence,
            priority,
            original_text: String::new(),
            split_index: None,
        }
    }

    #[test]
    fn compatible_signals_merge_into_one() {
        let handler = MultiSignalHandler::new(MultiSignalConfig::default());
        handler.submit(signal("s1", "EURUSD", Direction::Buy, dec!(1.1000), 0.8, Priority::Medium));
        handler.submit(signal("s2", "EURUSD", Direction::Buy, dec!(1.1001), 0.6, Priority::High));
        let result = handler.process_symbol("EURUSD").expect("one merged signal");
        assert_eq!(result.priority, Priority::High);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn below_threshold_signal_is_rejected() {
        let mut cfg = MultiSignalConfig::default();
        cfg.confidence_threshold = 0.5;
        let handler = MultiSignalHandler::new(cfg);
        assert!(!handler.submit(signal("s1", "EURUSD", Direction::Buy, dec!(1.1), 0.1, Priority::Low)));
    }

    #[test]
    fn opposite_directions_resolve_by_highest_priority() {
        let handler = MultiSignalHandler::new(MultiSignalConfig::default());
        handler.submit(signal("s1", "EURUSD", Direction::Buy, dec!(1.1000), 0.8, Priority::Low));
        handler.submit(signal("s2", "EURUSD", Direction::Sell, dec!(1.1000), 0.8, Priority::Critical));
        let result = handler.process_symbol("EURUSD").expect("a winner");
        assert_eq!(result.direction, Direction::Sell);
    }

    #[test]
    fn split_signals_never_re_merge() {
        let handler = MultiSignalHandler::new(MultiSignalConfig::default());
        let mut a = signal("s1", "EURUSD", Direction::Buy, dec!(1.1000), 0.8, Priority::Medium);
        a.split_index = Some(0);
        let mut b = signal("s2", "EURUSD", Direction::Buy, dec!(1.1000), 0.8, Priority::Medium);
        b.split_index = Some(1);
        assert!(!handler.compatible(&a, &b, 5.0));
    }

    #[test]
    fn cancel_all_yields_no_signal() {
        let mut cfg = MultiSignalConfig::default();
        cfg.resolution = ConflictResolution::CancelAll;
        let handler = MultiSignalHandler::new(cfg);
        handler.submit(signal("s1", "EURUSD", Direction::Buy, dec!(1.1000), 0.8, Priority::Low));
        handler.submit(signal("s2", "EURUSD", Direction::Sell, dec!(1.1000), 0.8, Priority::Critical));
        assert!(handler.process_symbol("EURUSD").is_none());
    }
}
