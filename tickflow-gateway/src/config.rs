use crate::registry::StreamKey;
use tickflow_integration::env;

/// Stream name suffix appended to the aggTrade URL prefix for per-symbol streams.
pub const AGG_TRADE_SUFFIX: &str = "@aggTrade";

/// Environment-driven configuration for the gateway binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Downstream streaming server bind address.
    pub server_addr: String,

    /// Upstream URL of the all-market miniTicker array stream.
    pub mini_ticker_url: String,

    /// Upstream URL prefix for per-symbol aggTrade streams.
    ///
    /// The full per-symbol URL is `agg_trade_url + symbol + "@aggTrade"`.
    pub agg_trade_url: String,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            server_addr: env::string("SERVER_ADDR", "0.0.0.0:50051"),
            mini_ticker_url: env::string(
                "MINITICKER_URL",
                "wss://stream.binance.com:9443/ws/!miniTicker@arr",
            ),
            agg_trade_url: env::string("AGGTRADE_URL", "wss://stream.binance.com:9443/ws/"),
        }
    }

    /// Resolve the upstream URL for the provided [`StreamKey`].
    pub fn stream_url(&self, key: &StreamKey) -> String {
        match key {
            StreamKey::MiniTicker => self.mini_ticker_url.clone(),
            StreamKey::AggTrade(symbol) => {
                format!("{}{}{}", self.agg_trade_url, symbol, AGG_TRADE_SUFFIX)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_integration::model::Symbol;

    #[test]
    fn test_stream_url_per_key() {
        let config = GatewayConfig {
            server_addr: "0.0.0.0:50051".to_string(),
            mini_ticker_url: "wss://upstream/ws/!miniTicker@arr".to_string(),
            agg_trade_url: "wss://upstream/ws/".to_string(),
        };

        assert_eq!(
            config.stream_url(&StreamKey::MiniTicker),
            "wss://upstream/ws/!miniTicker@arr"
        );
        assert_eq!(
            config.stream_url(&StreamKey::AggTrade(Symbol::new("BTCUSDT"))),
            "wss://upstream/ws/btcusdt@aggTrade"
        );
    }
}
