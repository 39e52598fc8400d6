use std::collections::HashMap;
use std::env;

use crate::model::Timeframe;

/// Service configuration derived from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,

    /// Provider adapter id (`PROVIDER`).
    pub provider: String,
    /// Provider credential (`PROVIDER_API_KEY`). Never logged.
    pub provider_api_key: String,

    /// Symbols subscribed on the tick stream. Always includes the two
    /// reference tickers.
    pub ws_symbols: Vec<String>,
    /// Default ticker when a request omits `?ticker=`.
    pub primary_ticker: String,
    pub spy_symbol: String,
    pub qqq_symbol: String,

    /// Per-timeframe retained closed-bar counts (`RETENTION_*` overrides).
    pub retention: HashMap<Timeframe, usize>,
    pub refresh_interval_ms: u64,
    pub liquidity_floor_usd: f64,
    pub forming_15m: bool,

    pub rest_timeout_s: u64,
    pub ws_idle_timeout_s: u64,

    // ── EODHD endpoints ────────────────────────────────────────────
    pub eodhd_base_url: String,
    pub eodhd_ws_url: String,
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|s| {
            matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "on"
            )
        })
        .unwrap_or(default)
}

fn parse_symbols_csv(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let s = part.trim().to_ascii_uppercase();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

impl Config {
    pub fn from_env() -> Self {
        let primary_ticker = env_str("PRIMARY_TICKER", "TSLA.US");
        let spy_symbol = env_str("SPY_SYMBOL", "SPY.US");
        let qqq_symbol = env_str("QQQ_SYMBOL", "QQQ.US");

        let mut ws_symbols = parse_symbols_csv(&env_str("WS_SYMBOLS", &primary_ticker));
        for reference in [&spy_symbol, &qqq_symbol] {
            if !ws_symbols.contains(reference) {
                ws_symbols.push(reference.clone());
            }
        }

        let mut retention = HashMap::new();
        for (tf, var) in [
            (Timeframe::M1, "RETENTION_1M"),
            (Timeframe::M5, "RETENTION_5M"),
            (Timeframe::M15, "RETENTION_15M"),
            (Timeframe::H1, "RETENTION_1H"),
            (Timeframe::H4, "RETENTION_4H"),
            (Timeframe::D1, "RETENTION_1D"),
        ] {
            let n = env_u64(var, tf.default_retention() as u64).max(1) as usize;
            retention.insert(tf, n);
        }

        Self {
            bind: env_str("BIND", "127.0.0.1"),
            port: env_u16("PORT", 8080),
            provider: env_str("PROVIDER", "EODHD"),
            provider_api_key: env_str("PROVIDER_API_KEY", ""),
            ws_symbols,
            primary_ticker,
            spy_symbol,
            qqq_symbol,
            retention,
            refresh_interval_ms: env_u64("REFRESH_INTERVAL_MS", 60_000).max(1_000),
            liquidity_floor_usd: env_f64("LIQUIDITY_FLOOR_USD", 1_000_000.0),
            forming_15m: env_bool("FORMING_15M", true),
            rest_timeout_s: env_u64("REST_TIMEOUT_S", 10).max(1),
            ws_idle_timeout_s: env_u64("WS_IDLE_TIMEOUT_S", 30).max(5),
            eodhd_base_url: env_str("EODHD_BASE_URL", "https://eodhd.com"),
            eodhd_ws_url: env_str("EODHD_WS_URL", "wss://ws.eodhistoricaldata.com/ws/us"),
        }
    }
}
