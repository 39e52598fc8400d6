use serde::{Deserialize, Serialize};

/// Discrete bar widths the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    pub fn ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
            Timeframe::D1 => 86_400_000,
        }
    }

    /// Default number of retained closed bars per series.
    pub fn default_retention(&self) -> usize {
        match self {
            Timeframe::M1 => 240,
            Timeframe::M5 => 240,
            Timeframe::M15 => 200,
            Timeframe::H1 => 200,
            Timeframe::H4 => 200,
            Timeframe::D1 => 400,
        }
    }

    /// Round a timestamp down to the start of its bucket.
    pub fn bucket(&self, t_ms: i64) -> i64 {
        t_ms.div_euclid(self.ms()) * self.ms()
    }

    /// True when this timeframe is built live from ticks (WS path).
    pub fn is_live(&self) -> bool {
        matches!(self, Timeframe::M1 | Timeframe::M5)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading-session tag carried by ticks and candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionTag {
    Rth,
    Ext,
    Unknown,
}

/// Where a candle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CandleSource {
    Ws,
    Rest,
    Agg,
}

/// A single trade report from the live stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub t_ms: i64,
    pub price: f64,
    pub size: f64,
    pub session: SessionTag,
}

/// OHLCV bar over one timeframe window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Window start, epoch ms UTC, aligned to the timeframe.
    pub start_ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub volume: f64,
    pub session: SessionTag,
    pub is_closed: bool,
    pub source: CandleSource,
}

impl Candle {
    pub fn end_ts(&self) -> i64 {
        self.start_ts + self.timeframe.ms()
    }

    /// Check the structural invariants a candle must satisfy before it may
    /// enter the store.
    pub fn validate(&self, now_ms: i64) -> Result<(), String> {
        for (name, v) in [
            ("o", self.o),
            ("h", self.h),
            ("l", self.l),
            ("c", self.c),
            ("volume", self.volume),
        ] {
            if !v.is_finite() {
                return Err(format!("non-finite {name}"));
            }
        }
        if self.volume < 0.0 {
            return Err("negative volume".to_string());
        }
        if self.start_ts % self.timeframe.ms() != 0 {
            return Err(format!(
                "start_ts {} not aligned to {}",
                self.start_ts, self.timeframe
            ));
        }
        let body_lo = self.o.min(self.c);
        let body_hi = self.o.max(self.c);
        if !(self.l <= body_lo && body_hi <= self.h) {
            return Err(format!(
                "ohlc ordering violated o={} h={} l={} c={}",
                self.o, self.h, self.l, self.c
            ));
        }
        if self.start_ts > now_ms {
            return Err("start_ts in the future".to_string());
        }
        if self.is_closed && self.end_ts() > now_ms {
            return Err("closed candle with nominal close in the future".to_string());
        }
        Ok(())
    }
}

// ── US equity session tagging ────────────────────────────────────────────
//
// RTH = 09:30–16:00 America/New_York on weekdays. Only the two US DST
// boundaries matter (second Sunday of March, first Sunday of November,
// both at 02:00 local), so the offset is derived directly.

const DAY_MS: i64 = 86_400_000;
const HOUR_MS: i64 = 3_600_000;

/// Civil date from days since the Unix epoch (Howard Hinnant's algorithm).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = if m > 2 { m as i64 - 3 } else { m as i64 + 9 };
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe
}

/// 0 = Monday .. 6 = Sunday for a day count since the epoch (1970-01-01 was
/// a Thursday).
fn weekday_from_days(days: i64) -> i64 {
    (days + 3).rem_euclid(7)
}

/// Epoch day of the nth (1-based) Sunday of the given month.
fn nth_sunday(year: i64, month: u32, nth: i64) -> i64 {
    let first = days_from_civil(year, month, 1);
    let first_wd = weekday_from_days(first);
    let to_sunday = (6 - first_wd).rem_euclid(7);
    first + to_sunday + (nth - 1) * 7
}

/// UTC offset (ms, negative = behind UTC) for America/New_York at `t_ms`.
fn eastern_offset_ms(t_ms: i64) -> i64 {
    let (year, _, _) = civil_from_days(t_ms.div_euclid(DAY_MS));
    // DST starts 2nd Sunday of March 02:00 EST (07:00 UTC), ends 1st Sunday
    // of November 02:00 EDT (06:00 UTC).
    let dst_start = nth_sunday(year, 3, 2) * DAY_MS + 7 * HOUR_MS;
    let dst_end = nth_sunday(year, 11, 1) * DAY_MS + 6 * HOUR_MS;
    if t_ms >= dst_start && t_ms < dst_end {
        -4 * HOUR_MS
    } else {
        -5 * HOUR_MS
    }
}

/// Tag a UTC epoch-ms timestamp as RTH or EXT for US equities.
pub fn session_tag_for(t_ms: i64) -> SessionTag {
    let local = t_ms + eastern_offset_ms(t_ms);
    let days = local.div_euclid(DAY_MS);
    if weekday_from_days(days) >= 5 {
        return SessionTag::Ext;
    }
    let minute_of_day = local.rem_euclid(DAY_MS) / 60_000;
    // 09:30 = 570, 16:00 = 960
    if (570..960).contains(&minute_of_day) {
        SessionTag::Rth
    } else {
        SessionTag::Ext
    }
}
