use chrono::Utc;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{Debug, Display, Formatter};
use tracing::error;
use uuid::Uuid;

/// Tickflow new type representing a lowercased trading pair `String` identifier.
///
/// eg/ "btcusdt", "ethusdt", etc
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct Symbol(String);

impl Debug for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Symbol::new)
    }
}

impl<S> From<S> for Symbol
where
    S: Into<String>,
{
    fn from(input: S) -> Self {
        Symbol::new(input)
    }
}

impl Symbol {
    /// Construct a new [`Symbol`] new type using the provided `Into<String>` value.
    ///
    /// The exchange sends uppercase market identifiers (eg/ "BTCUSDT"), so input is
    /// lowercased here once and every internal map keys off the lowercase form.
    pub fn new<S>(input: S) -> Self
    where
        S: Into<String>,
    {
        Self(input.into().to_lowercase())
    }
}

/// 24-hour rolling mini ticker summary, as sent by the exchange in arrays.
///
/// Prices arrive as decimal strings on the wire.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct MiniTicker {
    /// eg/ "24hrMiniTicker"
    #[serde(rename = "e")]
    pub event_type: String,

    /// Exchange send time, unix epoch milliseconds.
    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "c")]
    pub close_price: String,

    #[serde(rename = "o")]
    pub open_price: String,

    #[serde(rename = "h")]
    pub high_price: String,

    #[serde(rename = "l")]
    pub low_price: String,

    /// Total traded volume in the base asset.
    #[serde(rename = "v")]
    pub base_volume: String,

    /// Total traded volume in the quote asset.
    #[serde(rename = "q")]
    pub quote_volume: String,
}

fn parse_price(value: &str, field: &'static str) -> f64 {
    value.parse().unwrap_or_else(|parse_error| {
        error!(%parse_error, field, value, "could not parse price field into f64");
        0.0
    })
}

impl MiniTicker {
    pub fn close_price_f64(&self) -> f64 {
        parse_price(&self.close_price, "close_price")
    }

    pub fn open_price_f64(&self) -> f64 {
        parse_price(&self.open_price, "open_price")
    }

    pub fn high_price_f64(&self) -> f64 {
        parse_price(&self.high_price, "high_price")
    }

    pub fn low_price_f64(&self) -> f64 {
        parse_price(&self.low_price, "low_price")
    }
}

/// Single aggregated trade tick for one symbol.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct AggTrade {
    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "p")]
    pub price: String,

    #[serde(rename = "q")]
    pub quantity: String,

    /// Trade time, unix epoch milliseconds.
    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Exchange send time, unix epoch milliseconds.
    #[serde(rename = "E")]
    pub event_time: i64,
}

impl AggTrade {
    pub fn price_f64(&self) -> f64 {
        parse_price(&self.price, "price")
    }
}

/// Float-typed view of a [`MiniTicker`] stamped with the local reception time.
#[derive(Clone, PartialEq, PartialOrd, Debug)]
pub struct DailyStat {
    pub event_type: String,
    pub event_time: i64,
    /// Local wall-clock reception time, unix epoch milliseconds.
    pub recv_time: i64,
    pub symbol: String,
    pub close_price: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
}

impl DailyStat {
    /// Construct a [`DailyStat`] from the provided [`MiniTicker`], stamping `recv_time`
    /// with the current wall-clock.
    pub fn from_ticker(ticker: &MiniTicker) -> Self {
        Self {
            event_type: ticker.event_type.clone(),
            event_time: ticker.event_time,
            recv_time: Utc::now().timestamp_millis(),
            symbol: ticker.symbol.clone(),
            close_price: ticker.close_price_f64(),
            open_price: ticker.open_price_f64(),
            high_price: ticker.high_price_f64(),
            low_price: ticker.low_price_f64(),
        }
    }

    /// Absolute 24h price change: `close - open`.
    pub fn change_price(&self) -> Decimal {
        let open = Decimal::from_f64(self.open_price).unwrap_or_default();
        let close = Decimal::from_f64(self.close_price).unwrap_or_default();

        close - open
    }

    /// Relative 24h price change as a percentage of the current price.
    pub fn change_percent(&self) -> Decimal {
        let open = Decimal::from_f64(self.open_price).unwrap_or_default();
        let close = Decimal::from_f64(self.close_price).unwrap_or_default();

        if close.is_zero() {
            return Decimal::ZERO;
        }

        (close - open) / close * Decimal::ONE_HUNDRED
    }
}

/// Enriched daily statistic shipped to the messaging layer.
///
/// Decimal fields serialise as strings, matching the archive wire contract.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct KafkaMsg {
    pub message_id: String,

    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "receive_time")]
    pub recv_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "c")]
    pub close_price: Decimal,

    #[serde(rename = "o")]
    pub open_price: Decimal,

    #[serde(rename = "h")]
    pub high_price: Decimal,

    #[serde(rename = "l")]
    pub low_price: Decimal,

    pub change_price: Decimal,

    pub change_percent: Decimal,
}

impl From<&DailyStat> for KafkaMsg {
    fn from(stat: &DailyStat) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            event_type: stat.event_type.clone(),
            event_time: stat.event_time,
            recv_time: stat.recv_time,
            symbol: stat.symbol.clone(),
            close_price: Decimal::from_f64(stat.close_price).unwrap_or_default(),
            open_price: Decimal::from_f64(stat.open_price).unwrap_or_default(),
            high_price: Decimal::from_f64(stat.high_price).unwrap_or_default(),
            low_price: Decimal::from_f64(stat.low_price).unwrap_or_default(),
            change_price: stat.change_price(),
            change_percent: stat.change_percent(),
        }
    }
}

/// Per-second, per-symbol price sample published to subscribers.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct SecondStat {
    #[serde(rename = "s")]
    pub symbol: Symbol,

    #[serde(rename = "p")]
    pub price: f64,

    /// Stamped by the fanout publisher, one record per subscriber.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

impl SecondStat {
    pub fn new(symbol: Symbol, price: f64) -> Self {
        Self {
            symbol,
            price,
            user_id: None,
        }
    }

    /// Clone of `Self` with the provided subscriber stamped onto it.
    pub fn with_user(&self, user_id: u64) -> Self {
        Self {
            user_id: Some(user_id),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_lowercases_input() {
        assert_eq!(Symbol::new("BTCUSDT").as_ref(), "btcusdt");
        assert_eq!(Symbol::from("EthUsdt"), Symbol::new("ethusdt"));
    }

    #[test]
    fn test_mini_ticker_de() {
        let input = r#"{
            "e":"24hrMiniTicker","E":1700000000000,"s":"BTCUSDT",
            "c":"100","o":"90","h":"110","l":"80","v":"1234.5","q":"120000.1"
        }"#;

        let ticker = serde_json::from_str::<MiniTicker>(input).unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.close_price_f64(), 100.0);
        assert_eq!(ticker.open_price_f64(), 90.0);
    }

    #[test]
    fn test_mini_ticker_unparseable_price_is_zero() {
        let ticker = MiniTicker {
            event_type: "24hrMiniTicker".to_string(),
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            close_price: "not-a-price".to_string(),
            open_price: "90".to_string(),
            high_price: "110".to_string(),
            low_price: "80".to_string(),
            base_volume: "0".to_string(),
            quote_volume: "0".to_string(),
        };

        assert_eq!(ticker.close_price_f64(), 0.0);
    }

    #[test]
    fn test_agg_trade_de() {
        let input = r#"{"e":"aggTrade","E":1700000000100,"s":"btcusdt","p":"100.5","q":"0.25","T":1700000000050}"#;

        let trade = serde_json::from_str::<AggTrade>(input).unwrap();
        assert_eq!(trade.price_f64(), 100.5);
        assert_eq!(trade.trade_time, 1700000000050);
    }

    #[test]
    fn test_daily_stat_change_calculations() {
        let stat = DailyStat {
            event_type: "24hrMiniTicker".to_string(),
            event_time: 1700000000000,
            recv_time: 1700000000123,
            symbol: "BTCUSDT".to_string(),
            close_price: 100.0,
            open_price: 90.0,
            high_price: 110.0,
            low_price: 80.0,
        };

        assert_eq!(stat.change_price(), dec!(10));
        assert_eq!(stat.change_percent(), dec!(10));
    }

    #[test]
    fn test_daily_stat_change_percent_zero_close() {
        let stat = DailyStat {
            event_type: "24hrMiniTicker".to_string(),
            event_time: 0,
            recv_time: 0,
            symbol: "BTCUSDT".to_string(),
            close_price: 0.0,
            open_price: 90.0,
            high_price: 0.0,
            low_price: 0.0,
        };

        assert_eq!(stat.change_percent(), Decimal::ZERO);
    }

    #[test]
    fn test_kafka_msg_unique_message_ids() {
        let stat = DailyStat {
            event_type: "24hrMiniTicker".to_string(),
            event_time: 1700000000000,
            recv_time: 1700000000123,
            symbol: "BTCUSDT".to_string(),
            close_price: 100.0,
            open_price: 90.0,
            high_price: 110.0,
            low_price: 80.0,
        };

        let first = KafkaMsg::from(&stat);
        let second = KafkaMsg::from(&stat);

        assert_ne!(first.message_id, second.message_id);
        assert_eq!(first.change_price, dec!(10));
        assert_eq!(first.change_percent, dec!(10));
    }

    #[test]
    fn test_kafka_msg_json_round_trip() {
        let stat = DailyStat {
            event_type: "24hrMiniTicker".to_string(),
            event_time: 1700000000000,
            recv_time: 1700000000123,
            symbol: "BTCUSDT".to_string(),
            close_price: 100.0,
            open_price: 90.0,
            high_price: 110.0,
            low_price: 80.0,
        };

        let msg = KafkaMsg::from(&stat);
        let json = serde_json::to_string(&msg).unwrap();
        let decoded = serde_json::from_str::<KafkaMsg>(&json).unwrap();

        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_second_stat_json_bijection() {
        let stat = SecondStat::new(Symbol::new("BTCUSDT"), 100.5);

        let json = serde_json::to_string(&stat).unwrap();
        assert_eq!(json, r#"{"s":"btcusdt","p":100.5}"#);
        assert_eq!(serde_json::from_str::<SecondStat>(&json).unwrap(), stat);

        let stamped = stat.with_user(42);
        let json = serde_json::to_string(&stamped).unwrap();
        assert_eq!(json, r#"{"s":"btcusdt","p":100.5,"user_id":42}"#);
        assert_eq!(serde_json::from_str::<SecondStat>(&json).unwrap(), stamped);
    }
}
