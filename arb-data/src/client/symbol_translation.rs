use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::{EmptySymbolError, Symbol};

/// Recognised quote assets. Translators are pure and total over this closed set (component
/// design §4.1); a native symbol whose suffix isn't one of these fails translation rather than
/// guessing at a split point.
const KNOWN_QUOTES: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];

fn split_base_quote(native: &str) -> Option<(&str, &str)> {
    KNOWN_QUOTES
        .iter()
        .find_map(|quote| native.strip_suffix(quote).map(|base| (base, *quote)))
}

/// Convert an exchange-native instrument identifier into this engine's canonical `Symbol` form
/// (concatenated base+quote, eg/ `BTCUSDT`).
pub fn to_canonical(exchange: ExchangeId, native: &str) -> Result<Symbol, EmptySymbolError> {
    let stripped = match exchange {
        ExchangeId::Okx => native.trim_end_matches("-SWAP").replace('-', ""),
        ExchangeId::Mexc => native.split(':').next().unwrap_or(native).replace('/', ""),
        ExchangeId::Gateio => native.replace('_', ""),
        ExchangeId::Bingx => native.replace('-', ""),
        ExchangeId::Binance => native.to_owned(),
    };
    Symbol::new(stripped)
}

/// Convert a canonical `Symbol` into the native identifier expected by `exchange`'s subscribe
/// messages.
pub fn to_native(exchange: ExchangeId, symbol: &Symbol) -> String {
    let canonical = symbol.as_str();

    match exchange {
        ExchangeId::Okx => match split_base_quote(canonical) {
            Some((base, quote)) => format!("{base}-{quote}-SWAP"),
            None => canonical.to_owned(),
        },
        ExchangeId::Mexc => match split_base_quote(canonical) {
            Some((base, quote)) => format!("{base}/{quote}:{quote}"),
            None => canonical.to_owned(),
        },
        ExchangeId::Gateio => match split_base_quote(canonical) {
            Some((base, quote)) => format!("{base}_{quote}"),
            None => canonical.to_owned(),
        },
        ExchangeId::Bingx => match split_base_quote(canonical) {
            Some((base, quote)) => format!("{base}-{quote}"),
            None => canonical.to_owned(),
        },
        ExchangeId::Binance => canonical.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_okx_roundtrip() {
        let symbol = Symbol::new("BTCUSDT").unwrap();
        let native = to_native(ExchangeId::Okx, &symbol);
        assert_eq!(native, "BTC-USDT-SWAP");
        assert_eq!(to_canonical(ExchangeId::Okx, &native).unwrap(), symbol);
    }

    #[test]
    fn test_mexc_roundtrip() {
        let symbol = Symbol::new("BTCUSDT").unwrap();
        let native = to_native(ExchangeId::Mexc, &symbol);
        assert_eq!(native, "BTC/USDT:USDT");
        assert_eq!(to_canonical(ExchangeId::Mexc, &native).unwrap(), symbol);
    }

    #[test]
    fn test_gateio_roundtrip() {
        let symbol = Symbol::new("ETHUSDC").unwrap();
        let native = to_native(ExchangeId::Gateio, &symbol);
        assert_eq!(native, "ETH_USDC");
        assert_eq!(to_canonical(ExchangeId::Gateio, &native).unwrap(), symbol);
    }

    #[test]
    fn test_bingx_roundtrip() {
        let symbol = Symbol::new("SOLUSDT").unwrap();
        let native = to_native(ExchangeId::Bingx, &symbol);
        assert_eq!(native, "SOL-USDT");
        assert_eq!(to_canonical(ExchangeId::Bingx, &native).unwrap(), symbol);
    }

    #[test]
    fn test_binance_is_passthrough() {
        let symbol = Symbol::new("BTCUSDT").unwrap();
        assert_eq!(to_native(ExchangeId::Binance, &symbol), "BTCUSDT");
    }
}
