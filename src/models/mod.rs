use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One OHLCV bar as returned by the market-data API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl PriceBar {
    /// Calendar date of the bar in the exchange's own offset
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SeriesError {
    #[error("bar {index} at {timestamp} is not after the previous bar")]
    NotIncreasing {
        index: usize,
        timestamp: DateTime<FixedOffset>,
    },
}

/// Ordered bars for one symbol
///
/// Timestamps are strictly increasing; the constructor rejects anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    symbol: String,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<PriceBar>) -> Result<Self, SeriesError> {
        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(SeriesError::NotIncreasing {
                    index: index + 1,
                    timestamp: pair[1].timestamp,
                });
            }
        }

        Ok(Self {
            symbol: symbol.into(),
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// A raw breakout signal from the scanner
///
/// `ltp` is required. Stop, target and close may be missing or null; stop
/// and target are reported as 0 when absent. Missing or null flags are
/// false and a missing note is empty. Numbers may arrive as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "tradingsymbol")]
    pub symbol: String,
    /// Signal timestamp as sent by the scanner, e.g. `2025-12-31T18:30:00.000Z`
    #[serde(rename = "date")]
    pub signal_time: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub ltp: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub stop_loss: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub next_target: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_stage2: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_mtf: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
    #[serde(default, rename = "close", deserialize_with = "lenient_opt_f64")]
    pub close_at_signal: Option<f64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn number_from(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    number_from(&value).ok_or_else(|| de::Error::custom(format!("expected a number, got {}", value)))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        value => number_from(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected a number, got {}", value))),
    }
}

/// One entry of the scanner's `results` array
///
/// Rows are decoded one at a time so a bad row costs only its own candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalRow {
    Valid(Candidate),
    Malformed { symbol: String, detail: String },
}

impl SignalRow {
    pub fn from_value(value: Value) -> Self {
        let symbol = value
            .get("tradingsymbol")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_SYMBOL)
            .to_string();

        match serde_json::from_value::<Candidate>(value) {
            Ok(candidate) => SignalRow::Valid(candidate),
            Err(e) => SignalRow::Malformed {
                symbol,
                detail: e.to_string(),
            },
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            SignalRow::Valid(candidate) => &candidate.symbol,
            SignalRow::Malformed { symbol, .. } => symbol,
        }
    }
}

impl From<Candidate> for SignalRow {
    fn from(candidate: Candidate) -> Self {
        SignalRow::Valid(candidate)
    }
}

const UNKNOWN_SYMBOL: &str = "UNKNOWN";

impl Candidate {
    /// Parse the signal timestamp, keeping its wall-clock reading
    pub fn signal_datetime(&self) -> Result<NaiveDateTime, chrono::ParseError> {
        parse_signal_time(&self.signal_time)
    }

    pub fn signal_date(&self) -> Result<NaiveDate, chrono::ParseError> {
        self.signal_datetime().map(|t| t.date())
    }
}

fn parse_signal_time(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let raw = raw.trim();
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Ok(t);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
}

/// Why a candidate was not accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientData,
    DataOutdated,
    DateError(String),
    EmaCrossBelow,
    PriceBelowEmas,
    CloseBelowFastEma,
    TooSqueezed { spread_pct: f64 },
    Overextended { spread_pct: f64 },
    NotStage2,
    NoData(String),
    Error(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "Insufficient Data"),
            Self::DataOutdated => write!(f, "Data Outdated"),
            Self::DateError(detail) => write!(f, "Date Error: {}", detail),
            Self::EmaCrossBelow => write!(f, "Fast EMA <= Slow EMA"),
            Self::PriceBelowEmas => write!(f, "Price below EMAs"),
            Self::CloseBelowFastEma => write!(f, "Close below fast EMA"),
            Self::TooSqueezed { spread_pct } => write!(f, "Too Squeezed ({:.2}%)", spread_pct),
            Self::Overextended { spread_pct } => write!(f, "Overextended ({:.2}%)", spread_pct),
            Self::NotStage2 => write!(f, "Not Stage 2"),
            Self::NoData(detail) => write!(f, "No Data ({})", detail),
            Self::Error(detail) => write!(f, "Error: {}", detail),
        }
    }
}

/// A candidate that passed every rule gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedSetup {
    pub symbol: String,
    pub stop_loss: f64,
    pub target: f64,
    pub ltp: f64,
    pub close: f64,
    pub fast_ema: f64,
    pub slow_ema: f64,
    pub spread_pct: f64,
    pub is_mtf: bool,
    pub is_stage2: bool,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(AcceptedSetup),
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// A rejected candidate as recorded in the batch report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub symbol: String,
    pub reason: RejectReason,
}
