use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::config::Config;
use crate::error::AppError;
use crate::model::{session_tag_for, Candle, CandleSource, Tick, Timeframe};
use crate::provider::MarketDataProvider;
use crate::state::now_ms;

/// EODHD adapter: intraday/EOD candles over REST, US trade stream over WS.
pub struct EodhdProvider {
    http: reqwest::Client,
    api_token: String,
    base_url: String,
    ws_url: String,
}

impl EodhdProvider {
    pub fn new(cfg: &Config) -> Result<Self, AppError> {
        if cfg.provider_api_key.is_empty() {
            return Err(AppError::ProviderUnavailable(
                "PROVIDER_API_KEY is missing".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent("momoscore")
            .timeout(Duration::from_secs(cfg.rest_timeout_s))
            .build()
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;
        Ok(Self {
            http,
            api_token: cfg.provider_api_key.clone(),
            base_url: cfg.eodhd_base_url.trim_end_matches('/').to_string(),
            ws_url: cfg.eodhd_ws_url.clone(),
        })
    }

    async fn fetch_intraday(
        &self,
        symbol: &str,
        tf: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, AppError> {
        let url = format!("{}/api/intraday/{symbol}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("api_token", self.api_token.as_str()),
                ("fmt", "json"),
                ("interval", tf.as_str()),
            ])
            .query(&[("from", from_ms / 1_000), ("to", to_ms / 1_000)])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::ProviderUnavailable(format!("intraday {symbol}: {e}")))?;

        let rows: Vec<Value> = resp.json().await?;
        Ok(self.rows_to_candles(symbol, tf, &rows, parse_intraday_ts))
    }

    async fn fetch_eod_daily(&self, symbol: &str) -> Result<Vec<Candle>, AppError> {
        let url = format!("{}/api/eod/{symbol}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("api_token", self.api_token.as_str()),
                ("fmt", "json"),
                ("period", "d"),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::ProviderUnavailable(format!("eod {symbol}: {e}")))?;

        let rows: Vec<Value> = resp.json().await?;
        Ok(self.rows_to_candles(symbol, Timeframe::D1, &rows, parse_eod_ts))
    }

    /// Map raw rows into closed, aligned candles; anything unparsable,
    /// misaligned, or still forming is dropped.
    fn rows_to_candles(
        &self,
        symbol: &str,
        tf: Timeframe,
        rows: &[Value],
        parse_ts: fn(&Value) -> Option<i64>,
    ) -> Vec<Candle> {
        let now = now_ms();
        rows.iter()
            .filter_map(|row| {
                let start_ts = parse_ts(row)?;
                if start_ts % tf.ms() != 0 {
                    return None;
                }
                let candle = Candle {
                    symbol: symbol.to_string(),
                    timeframe: tf,
                    start_ts,
                    o: num_field(row, "open")?,
                    h: num_field(row, "high")?,
                    l: num_field(row, "low")?,
                    c: num_field(row, "close")?,
                    volume: num_field(row, "volume").unwrap_or(0.0),
                    session: session_tag_for(start_ts),
                    is_closed: true,
                    source: CandleSource::Rest,
                };
                // Yield only closed bars; a window still running is forming.
                if candle.end_ts() > now {
                    return None;
                }
                candle.validate(now).ok()?;
                Some(candle)
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataProvider for EodhdProvider {
    fn id(&self) -> &'static str {
        "EODHD"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, AppError> {
        match timeframe {
            Timeframe::D1 => self.fetch_eod_daily(symbol).await,
            Timeframe::H4 => Err(AppError::ProviderUnavailable(
                "EODHD intraday does not serve 4h bars".to_string(),
            )),
            tf => self.fetch_intraday(symbol, tf, from_ms, to_ms).await,
        }
    }

    async fn stream_ticks(&self, symbols: &[String]) -> Result<mpsc::Receiver<Tick>, AppError> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| AppError::ProviderUnavailable(format!("bad WS url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api_token", &self.api_token);

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("WS connect: {e}")))?;
        let (mut sink, mut reader) = ws.split();

        // The US trade feed speaks bare symbols; requests and the store use
        // the exchange-suffixed form.
        let mut by_wire: HashMap<String, String> = HashMap::new();
        for full in symbols {
            by_wire.insert(wire_symbol(full), full.clone());
        }
        let wire_list: Vec<String> = by_wire.keys().cloned().collect();
        let sub = json!({ "action": "subscribe", "symbols": wire_list.join(",") });
        sink.send(Message::Text(sub.to_string()))
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("WS subscribe: {e}")))?;

        let (tx, rx) = mpsc::channel::<Tick>(4096);
        tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(tick) = parse_trade(&text, &by_wire) {
                            if tx.send(tick).await.is_err() {
                                break; // consumer gone
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("provider WS closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("provider WS error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            // tx drops here; the ingest loop sees the stream end and reconnects
        });

        Ok(rx)
    }
}

fn wire_symbol(full: &str) -> String {
    full.trim()
        .trim_end_matches(".US")
        .trim_end_matches(".us")
        .to_ascii_uppercase()
}

fn num_field(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// EODHD sometimes returns unix seconds, sometimes "YYYY-MM-DD HH:MM:SS".
fn parse_intraday_ts(row: &Value) -> Option<i64> {
    match row.get("datetime")? {
        Value::Number(n) => n.as_i64().map(|s| s * 1_000),
        Value::String(s) if s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse::<i64>().ok().map(|secs| secs * 1_000)
        }
        Value::String(s) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|dt| dt.and_utc().timestamp_millis()),
        _ => None,
    }
}

fn parse_eod_ts(row: &Value) -> Option<i64> {
    let s = row.get("date")?.as_str()?;
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Parse one WS trade message `{s, p, t, v}` into a [`Tick`]; non-trade
/// frames (auth acks, subscribe acks) return `None`.
fn parse_trade(text: &str, by_wire: &HashMap<String, String>) -> Option<Tick> {
    let v: Value = serde_json::from_str(text).ok()?;
    let wire = v.get("s")?.as_str()?;
    let price = match v.get("p")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    let t_ms = v.get("t")?.as_i64()?;
    let size = match v.get("v") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    };
    let symbol = by_wire
        .get(&wire.to_ascii_uppercase())
        .cloned()
        .unwrap_or_else(|| wire.to_ascii_uppercase());
    Some(Tick {
        symbol,
        t_ms,
        price,
        size,
        session: session_tag_for(t_ms),
    })
}
