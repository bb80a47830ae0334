// =============================================================================
// Symbol & Pip Resolver (C1)
// =============================================================================
//
// Pure functions: no shared state, no I/O. Alias table and broker-suffix list
// are small, hardcoded defaults, overridable by broker-provided
// `symbol_info` at the call site.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Resolve a raw signal-text symbol to its canonical broker symbol: expands
/// common aliases, strips known broker suffixes (e.g. `EURUSD.a`), and
/// uppercases the result.
pub fn resolve(raw_symbol: &str) -> String {
    let trimmed = raw_symbol.trim().to_uppercase();
    let aliased = match trimmed.as_str() {
        "GOLD" | "XAU" => "XAUUSD".to_string(),
        "SILVER" | "XAG" => "XAGUSD".to_string(),
        other => other.to_string(),
    };

    const SUFFIXES: &[&str] = &[".A", ".RAW", ".PRO", ".ECN", "_I", "-I"];
    for suffix in SUFFIXES {
        if let Some(stripped) = aliased.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    aliased
}

/// Pip size for a symbol class: FX majors 1e-4, JPY pairs and metals 1e-2,
/// indices 1.0.
pub fn pip_size(symbol: &str) -> Decimal {
    let symbol = resolve(symbol);
    if symbol.contains("JPY") {
        dec!(0.01)
    } else if symbol.starts_with("XAU") || symbol.starts_with("XAG") {
        dec!(0.01)
    } else if is_index(&symbol) {
        dec!(1.0)
    } else {
        dec!(0.0001)
    }
}

fn is_index(symbol: &str) -> bool {
    matches!(symbol, "US30" | "NAS100" | "SPX500" | "GER40" | "UK100")
}

/// USD-normalized pip value per 1.0 lot, from a small default symbol table.
/// Overridden at the call site by broker-provided `symbol_info` when
/// available.
pub fn pip_value(symbol: &str, _account_currency: &str) -> Decimal {
    let symbol = resolve(symbol);
    match symbol.as_str() {
        "EURUSD" | "GBPUSD" | "AUDUSD" | "NZDUSD" => dec!(10.0),
        "XAUUSD" => dec!(10.0),
        "USDJPY" => dec!(9.09),
        "USDCHF" => dec!(10.20),
        "USDCAD" => dec!(7.69),
        "XAGUSD" => dec!(50.0),
        _ => dec!(10.0),
    }
}

/// Standard contract size (units per 1.0 lot) for a symbol class.
pub fn contract_size(symbol: &str) -> Decimal {
    let symbol = resolve(symbol);
    if symbol.starts_with("XAU") {
        dec!(100)
    } else if symbol.starts_with("XAG") {
        dec!(5000)
    } else if is_index(&symbol) {
        dec!(1)
    } else {
        dec!(100000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_gold_alias() {
        assert_eq!(resolve("gold"), "XAUUSD");
        assert_eq!(resolve("XAU"), "XAUUSD");
    }

    #[test]
    fn strips_broker_suffix() {
        assert_eq!(resolve("EURUSD.a"), "EURUSD");
        assert_eq!(resolve("GBPUSD_i"), "GBPUSD");
    }

    #[test]
    fn jpy_pairs_use_larger_pip() {
        assert_eq!(pip_size("USDJPY"), dec!(0.01));
        assert_eq!(pip_size("EURUSD"), dec!(0.0001));
    }

    #[test]
    fn metals_have_known_pip_value() {
        assert_eq!(pip_value("XAUUSD", "USD"), dec!(10.0));
        assert_eq!(pip_value("XAGUSD", "USD"), dec!(50.0));
    }
}
