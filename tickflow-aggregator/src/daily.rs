use bytes::Bytes;
use std::sync::Arc;
use tickflow_integration::{
    channel::{self, BoundedRx, BoundedTx},
    model::{DailyStat, KafkaMsg, MiniTicker},
};
use tokio::{sync::Mutex, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const NUM_WORKERS: usize = 4;
const WORKER_QUEUE_CAPACITY: usize = 100;

/// Decode miniTicker array frames and convert each entry into a [`DailyStat`] across a
/// small worker pool.
///
/// Workers may reorder entries of one input batch relative to each other. The output
/// closes exactly once, after the parse loop exits and all workers are joined.
pub async fn run(
    token: CancellationToken,
    mut mini_tickers: BoundedRx<Bytes>,
    out: BoundedTx<DailyStat>,
) {
    let (worker_tx, worker_rx) = channel::bounded::<MiniTicker>(WORKER_QUEUE_CAPACITY);
    let worker_rx = Arc::new(Mutex::new(worker_rx));

    let mut workers = JoinSet::new();
    for _ in 0..NUM_WORKERS {
        workers.spawn(convert_tickers(
            token.clone(),
            Arc::clone(&worker_rx),
            out.clone(),
        ));
    }
    drop(out);

    'parse: loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("stopping daily stat parser");
                break 'parse;
            }
            frame = mini_tickers.recv() => {
                let Some(frame) = frame else {
                    info!("miniTicker lane closed, stopping daily stat parser");
                    break 'parse;
                };

                let batch = match serde_json::from_slice::<Vec<MiniTicker>>(&frame) {
                    Ok(batch) => batch,
                    Err(parse_error) => {
                        error!(%parse_error, "could not parse frame into miniTicker array");
                        continue;
                    }
                };
                debug!(size = batch.len(), "received miniTicker batch");

                for ticker in batch {
                    tokio::select! {
                        _ = token.cancelled() => {
                            info!("stopping daily stat parser");
                            break 'parse;
                        }
                        sent = worker_tx.send(ticker) => if sent.is_err() {
                            break 'parse;
                        }
                    }
                }
            }
        }
    }

    drop(worker_tx);
    while workers.join_next().await.is_some() {}
}

async fn convert_tickers(
    token: CancellationToken,
    tickers: Arc<Mutex<BoundedRx<MiniTicker>>>,
    out: BoundedTx<DailyStat>,
) {
    loop {
        let ticker = tokio::select! {
            _ = token.cancelled() => return,
            ticker = async { tickers.lock().await.recv().await } => match ticker {
                Some(ticker) => ticker,
                None => return,
            }
        };

        let stat = DailyStat::from_ticker(&ticker);

        tokio::select! {
            _ = token.cancelled() => return,
            sent = out.send(stat) => if sent.is_err() {
                return;
            }
        }
    }
}

/// Enrich each [`DailyStat`] into a [`KafkaMsg`] carrying a fresh message id and the
/// fixed-point change fields.
pub async fn enrich(
    token: CancellationToken,
    mut stats: BoundedRx<DailyStat>,
    out: BoundedTx<KafkaMsg>,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("stopping daily stat enricher");
                return;
            }
            stat = stats.recv() => {
                let Some(stat) = stat else {
                    info!("daily stat channel closed, stopping enricher");
                    return;
                };

                let message = KafkaMsg::from(&stat);
                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = out.send(message) => if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const BATCH: &[u8] = br#"[
        {"e":"24hrMiniTicker","E":1700000000000,"s":"BTCUSDT",
         "c":"100","o":"90","h":"110","l":"80","v":"1","q":"2"},
        {"e":"24hrMiniTicker","E":1700000000000,"s":"ETHUSDT",
         "c":"2000","o":"1900","h":"2100","l":"1800","v":"3","q":"4"}
    ]"#;

    #[tokio::test]
    async fn test_parses_batch_into_daily_stats() {
        let (frames_tx, frames_rx) = channel::bounded(8);
        let (out_tx, mut out_rx) = channel::bounded(8);
        let parser = tokio::spawn(run(CancellationToken::new(), frames_rx, out_tx));

        frames_tx.send(Bytes::from_static(BATCH)).await.unwrap();
        frames_tx
            .send(Bytes::from_static(b"[not json"))
            .await
            .unwrap();
        drop(frames_tx);

        // Workers may reorder within a batch.
        let mut symbols = vec![
            out_rx.recv().await.unwrap().symbol,
            out_rx.recv().await.unwrap().symbol,
        ];
        symbols.sort();
        assert_eq!(symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

        parser.await.unwrap();
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_enrich_computes_change_fields() {
        let (stats_tx, stats_rx) = channel::bounded(4);
        let (out_tx, mut out_rx) = channel::bounded(4);
        let _enricher = tokio::spawn(enrich(CancellationToken::new(), stats_rx, out_tx));

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
        stats_tx.send(stat).await.unwrap();

        let message = out_rx.recv().await.unwrap();
        assert_eq!(message.symbol, "BTCUSDT");
        assert_eq!(message.change_price, Decimal::from(10));
        assert_eq!(message.change_percent, Decimal::from(10));
        assert!(!message.message_id.is_empty());
    }
}
