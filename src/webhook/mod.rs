// TradingView webhook payload handling
pub mod parser;

pub use parser::{fingerprint, normalize_symbol, parse_signal, secret_matches, strip_secret, ParsedSignal, SignalParseError};
