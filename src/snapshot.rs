use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::engine::MatchingEngine;
use crate::store::PersistenceGateway;

/// Background task emitting top-of-book / depth snapshots (§4.6). Gated by
/// `snapshot_interval_sec`; callers should not spawn this at all when that
/// config value is `0`, rather than spawning a loop that never ticks.
///
/// Each tick only holds a symbol's mutex for the duration of one
/// `best_bid`/`best_ask`/`depth` read — `MatchingEngine::market_summary` and
/// `::depth` already bound that to a single lock acquisition, so this loop
/// never blocks matching for longer than any other reader would.
pub async fn run<G: PersistenceGateway>(
    engine: Arc<MatchingEngine<G>>,
    interval: Duration,
    depth_levels: usize,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so the loop's cadence
    // matches `interval` from the moment the server becomes ready.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for symbol in engine.symbols() {
            let summary = engine.market_summary(&symbol).await;
            let depth = engine.depth(&symbol, depth_levels).await;
            debug!(
                symbol = %symbol,
                best_bid = ?summary.best_bid,
                best_ask = ?summary.best_ask,
                bid_levels = depth.bids.len(),
                ask_levels = depth.asks.len(),
                "book snapshot"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::Side;
    use crate::price::Price;
    use crate::store::MemoryGateway;
    use crate::symbol::Symbol;

    #[tokio::test]
    async fn one_tick_reads_every_registered_symbol_without_panicking() {
        let engine = Arc::new(MatchingEngine::new(Arc::new(MemoryGateway::new())));
        let symbol: Symbol = "AAPL".parse().unwrap();
        engine
            .submit(
                "u1".into(),
                symbol.clone(),
                Side::Buy,
                10,
                Price::from_scaled(100_0000),
            )
            .await
            .unwrap();

        let handle = tokio::spawn(run(engine.clone(), Duration::from_millis(5), 10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
    }
}
