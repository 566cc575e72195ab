use bytes::Bytes;
use tickflow_integration::channel::{BoundedRx, BoundedTx};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Classify raw frames by their first non-whitespace byte and route them to the two
/// parsing lanes: `{` opens a single aggTrade object, `[` opens a miniTicker array.
///
/// Empty and unclassifiable frames are dropped. Lane sends block when the lane is full,
/// pushing backpressure upstream. Both lanes close when this task returns.
pub async fn run(
    token: CancellationToken,
    mut raw: BoundedRx<Bytes>,
    agg_trades: BoundedTx<Bytes>,
    mini_tickers: BoundedTx<Bytes>,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("stopping raw frame dispatcher");
                return;
            }
            frame = raw.recv() => {
                let Some(frame) = frame else {
                    info!("raw frame channel closed, stopping dispatcher");
                    return;
                };

                let Some(first) = frame.iter().copied().find(|byte| !byte.is_ascii_whitespace())
                else {
                    continue;
                };

                let lane = match first {
                    b'{' => &agg_trades,
                    b'[' => &mini_tickers,
                    other => {
                        debug!(byte = other, "dropping unclassifiable frame");
                        continue;
                    }
                };

                tokio::select! {
                    _ = token.cancelled() => {
                        info!("stopping raw frame dispatcher");
                        return;
                    }
                    sent = lane.send(frame) => if sent.is_err() {
                        info!("parsing lane closed, stopping dispatcher");
                        return;
                    }
                }
            }
        }
    }
}
