// =============================================================================
// Entry Resolver (C4)
// =============================================================================

use rust_decimal::Decimal;

use crate::types::{Direction, EntryMode};

/// Expand a candidate range `"a-b"` into `{a, (a+b)/2, b}` before resolution.
/// Callers that already parsed a range into two entries should push both
/// endpoints plus the midpoint themselves; this helper exists for the common
/// `Vec<Decimal>` case.
pub fn expand_range(low: Decimal, high: Decimal) -> Vec<Decimal> {
    vec![low, (low + high) / Decimal::from(2), high]
}

/// Detect a mode keyword in free signal text, if present. Overrides the
/// caller-configured mode when found.
pub fn detect_mode_keyword(text: &str) -> Option<EntryMode> {
    let lower = text.to_lowercase();
    if lower.contains("average") {
        Some(EntryMode::Average)
    } else if lower.contains("best") {
        Some(EntryMode::Best)
    } else if lower.contains("second") {
        Some(EntryMode::Second)
    } else {
        None
    }
}

/// Resolve a single entry price from `candidates` given `direction`, the
/// current market price, and `mode`.
pub fn resolve(
    candidates: &[Decimal],
    direction: Direction,
    current_price: Decimal,
    mode: EntryMode,
) -> Option<Decimal> {
    if candidates.is_empty() {
        return None;
    }

    match mode {
        EntryMode::First => candidates.first().copied(),
        EntryMode::Average => {
            let sum: Decimal = candidates.iter().sum();
            Some(sum / Decimal::from(candidates.len() as u64))
        }
        EntryMode::Best => candidates
            .iter()
            .copied()
            .min_by_key(|c| (*c - current_price).abs()),
        EntryMode::Second => {
            if candidates.len() < 2 {
                return candidates.first().copied();
            }
            let mut sorted = candidates.to_vec();
            sorted.sort();
            match direction {
                // BUY: second smallest.
                Direction::Buy => Some(sorted[1]),
                // SELL: second largest.
                Direction::Sell => Some(sorted[sorted.len() - 2]),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn best_picks_closest_to_current_price() {
        let candidates = vec![dec!(1.1000), dec!(1.1050), dec!(1.1100)];
        let resolved = resolve(&candidates, Direction::Buy, dec!(1.1040), EntryMode::Best);
        assert_eq!(resolved, Some(dec!(1.1050)));
    }

    #[test]
    fn second_for_buy_is_second_smallest() {
        let candidates = vec![dec!(1.1100), dec!(1.1000), dec!(1.1050)];
        let resolved = resolve(&candidates, Direction::Buy, dec!(1.1000), EntryMode::Second);
        assert_eq!(resolved, Some(dec!(1.1050)));
    }

    #[test]
    fn second_for_sell_is_second_largest() {
        let candidates = vec![dec!(1.1100), dec!(1.1000), dec!(1.1050)];
        let resolved = resolve(&candidates, Direction::Sell, dec!(1.1000), EntryMode::Second);
        assert_eq!(resolved, Some(dec!(1.1050)));
    }

    #[test]
    fn second_falls_back_to_only_candidate() {
        let candidates = vec![dec!(1.1000)];
        let resolved = resolve(&candidates, Direction::Buy, dec!(1.1000), EntryMode::Second);
        assert_eq!(resolved, Some(dec!(1.1000)));
    }

    #[test]
    fn average_is_arithmetic_mean() {
        let candidates = vec![dec!(1.1000), dec!(1.2000)];
        let resolved = resolve(&candidates, Direction::Buy, dec!(1.1000), EntryMode::Average);
        assert_eq!(resolved, Some(dec!(1.1500)));
    }

    #[test]
    fn range_expands_to_three_points() {
        let expanded = expand_range(dec!(1.1000), dec!(1.1100));
        assert_eq!(expanded, vec![dec!(1.1000), dec!(1.1050), dec!(1.1100)]);
    }
}
