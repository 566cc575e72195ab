use bytes::Bytes;
use std::{collections::HashMap, time::Duration};
use tickflow_integration::{
    channel::{BoundedRx, BoundedTx, TrySendError},
    model::{AggTrade, SecondStat, Symbol},
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Interval between per-symbol price sample emissions.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Reduce the aggTrade lane into one [`SecondStat`] per symbol per second.
///
/// The latest price per symbol is held until overwritten - a symbol silent for minutes
/// still emits its last known price every tick. Emission uses a non-blocking send: a full
/// output queue drops the sample, which the next tick supersedes.
pub async fn run(
    token: CancellationToken,
    mut trades: BoundedRx<Bytes>,
    out: BoundedTx<SecondStat>,
) {
    let mut latest_price: HashMap<Symbol, f64> = HashMap::new();
    let mut ticker = tokio::time::interval(TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("stopping per-second aggregator");
                return;
            }
            _ = ticker.tick() => {
                for (symbol, price) in &latest_price {
                    let stat = SecondStat::new(symbol.clone(), *price);
                    match out.try_send(stat) {
                        Ok(()) => {}
                        Err(TrySendError::Full(stat)) => {
                            debug!(symbol = %stat.symbol, "per-second queue full, dropping sample");
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!("per-second output closed, stopping aggregator");
                            return;
                        }
                    }
                }
            }
            frame = trades.recv() => {
                let Some(frame) = frame else {
                    info!("aggTrade lane closed, stopping per-second aggregator");
                    return;
                };

                match serde_json::from_slice::<AggTrade>(&frame) {
                    Ok(trade) => {
                        latest_price.insert(Symbol::new(trade.symbol.as_str()), trade.price_f64());
                    }
                    Err(parse_error) => {
                        error!(%parse_error, "could not parse frame into AggTrade")
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_integration::channel;

    fn trade_frame(symbol: &str, price: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"s":"{symbol}","p":"{price}","q":"0.5","T":1700000000050,"E":1700000000100}}"#
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_one_stat_per_symbol_per_tick() {
        let (trades_tx, trades_rx) = channel::bounded(8);
        let (out_tx, mut out_rx) = channel::bounded(8);
        let _aggregator = tokio::spawn(run(CancellationToken::new(), trades_rx, out_tx));

        trades_tx.send(trade_frame("BTCUSDT", "100.5")).await.unwrap();
        trades_tx.send(trade_frame("ETHUSDT", "2000")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        let mut emitted = vec![out_rx.recv().await.unwrap(), out_rx.recv().await.unwrap()];
        emitted.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        assert_eq!(emitted[0], SecondStat::new(Symbol::new("btcusdt"), 100.5));
        assert_eq!(emitted[1], SecondStat::new(Symbol::new("ethusdt"), 2000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_holds_last_value_for_silent_symbols() {
        let (trades_tx, trades_rx) = channel::bounded(8);
        let (out_tx, mut out_rx) = channel::bounded(64);
        let _aggregator = tokio::spawn(run(CancellationToken::new(), trades_rx, out_tx));

        trades_tx.send(trade_frame("BTCUSDT", "100.5")).await.unwrap();

        // No further trades for several seconds: every tick still carries the last price.
        tokio::time::sleep(Duration::from_millis(3_100)).await;

        for _ in 0..3 {
            let stat = out_rx.recv().await.unwrap();
            assert_eq!(stat, SecondStat::new(Symbol::new("btcusdt"), 100.5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_frame_skipped() {
        let (trades_tx, trades_rx) = channel::bounded(8);
        let (out_tx, mut out_rx) = channel::bounded(8);
        let _aggregator = tokio::spawn(run(CancellationToken::new(), trades_rx, out_tx));

        trades_tx.send(Bytes::from_static(b"{broken")).await.unwrap();
        trades_tx.send(trade_frame("BTCUSDT", "99")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        assert_eq!(
            out_rx.recv().await.unwrap(),
            SecondStat::new(Symbol::new("btcusdt"), 99.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_output_drops_sample_silently() {
        let (trades_tx, trades_rx) = channel::bounded(8);
        let (out_tx, mut out_rx) = channel::bounded(1);
        let _aggregator = tokio::spawn(run(CancellationToken::new(), trades_rx, out_tx));

        trades_tx.send(trade_frame("BTCUSDT", "1")).await.unwrap();
        trades_tx.send(trade_frame("ETHUSDT", "2")).await.unwrap();

        // Capacity 1: each tick emits two samples, one of which is dropped.
        tokio::time::sleep(Duration::from_millis(2_100)).await;

        assert!(out_rx.recv().await.is_some());
    }
}
