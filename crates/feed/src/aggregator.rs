use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use common::{Broker, Candlestick, CandlestickSeries, Config, Granularity, Result};

use crate::Shutdown;

/// Pulls update candles from the broker and appends each one to the series
/// once it has closed.
///
/// The aggregator is the only writer of its series.
pub struct CandleAggregator {
    broker: Arc<dyn Broker>,
    series: CandlestickSeries,
    instrument: String,
    granularity: Granularity,
    retry_interval: Duration,
}

impl CandleAggregator {
    pub fn new(
        broker: Arc<dyn Broker>,
        series: CandlestickSeries,
        instrument: impl Into<String>,
        granularity: Granularity,
        retry_interval: Duration,
    ) -> Self {
        Self {
            broker,
            series,
            instrument: instrument.into(),
            granularity,
            retry_interval,
        }
    }

    pub fn from_config(broker: Arc<dyn Broker>, series: CandlestickSeries, cfg: &Config) -> Self {
        Self::new(
            broker,
            series,
            cfg.instrument.clone(),
            cfg.granularity,
            cfg.candle_retry_interval,
        )
    }

    pub fn series(&self) -> &CandlestickSeries {
        &self.series
    }

    /// Seed the series with historical candles, appended in the order given.
    /// Returns the number of candles stored.
    pub async fn seed(&self, count: usize) -> Result<usize> {
        let candles = self
            .broker
            .initial_candles(&self.instrument, self.granularity, count)
            .await?;
        let n = candles.len();
        for candle in candles {
            self.series.push(candle)?;
        }
        info!(
            instrument = %self.instrument,
            granularity = %self.granularity,
            candles = n,
            "Seeded candle series"
        );
        Ok(n)
    }

    /// Fetch the broker's latest (possibly still forming) candle.
    pub async fn poll_next(&self) -> Result<Candlestick> {
        self.broker
            .update_candle(&self.instrument, self.granularity)
            .await
    }

    /// A candle qualifies once it is complete and newer than the last stored one.
    pub fn accepts(&self, candle: &Candlestick) -> bool {
        if !candle.is_complete() {
            return false;
        }
        match self.series.last() {
            Some(last) => candle.timestamp() > last.timestamp(),
            None => true,
        }
    }

    /// Poll until a qualifying candle arrives, backing off between stale reads.
    ///
    /// Returns `Ok(None)` if shutdown is requested while waiting. Broker
    /// errors are returned as-is.
    pub async fn next_closed(&self, shutdown: &mut Shutdown) -> Result<Option<Candlestick>> {
        loop {
            let candle = self.poll_next().await?;
            if self.accepts(&candle) {
                return Ok(Some(candle));
            }
            debug!(
                instrument = %self.instrument,
                timestamp = %candle.timestamp(),
                complete = candle.is_complete(),
                "Candle not closed yet, waiting"
            );
            if shutdown.sleep(self.retry_interval).await {
                return Ok(None);
            }
        }
    }

    /// Run the aggregation loop until shutdown. Call from `tokio::spawn`.
    pub async fn run(self, mut shutdown: Shutdown) {
        info!(
            instrument = %self.instrument,
            granularity = %self.granularity,
            "CandleAggregator running"
        );

        while !shutdown.is_triggered() {
            match self.next_closed(&mut shutdown).await {
                Ok(Some(candle)) => {
                    let timestamp = candle.timestamp();
                    let close = candle.close();
                    match self.series.push(candle) {
                        Ok(()) => info!(
                            instrument = %self.instrument,
                            %timestamp,
                            %close,
                            len = self.series.len(),
                            "Candle closed"
                        ),
                        Err(e) => warn!(error = %e, "Discarded candle"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if e.is_transient() {
                        warn!(instrument = %self.instrument, error = %e, "Candle poll failed, retrying");
                    } else {
                        error!(instrument = %self.instrument, error = %e, "Candle poll failed, retrying");
                    }
                    if shutdown.sleep(self.retry_interval).await {
                        break;
                    }
                }
            }
        }

        info!(instrument = %self.instrument, "CandleAggregator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use paper::PaperBroker;
    use rust_decimal_macros::dec;

    use crate::shutdown_channel;

    fn at(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap() + ChronoDuration::minutes(30 * i)
    }

    fn candle(i: i64, complete: bool) -> Candlestick {
        Candlestick::new(
            Granularity::M30,
            dec!(1.10000),
            dec!(1.10100),
            dec!(1.09900),
            dec!(1.10050),
            100,
            at(i),
            complete,
        )
        .unwrap()
    }

    fn aggregator(broker: Arc<PaperBroker>) -> CandleAggregator {
        CandleAggregator::new(
            broker,
            CandlestickSeries::new(),
            "EUR_USD",
            Granularity::M30,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn seed_appends_initial_candles_in_order() {
        let broker = Arc::new(PaperBroker::new("EUR_USD"));
        broker
            .set_initial_candles(vec![candle(0, true), candle(1, true), candle(2, true)])
            .await;
        let agg = aggregator(broker);

        assert_eq!(agg.seed(3).await.unwrap(), 3);
        assert_eq!(agg.series().len(), 3);
        assert_eq!(agg.series().last().unwrap().timestamp(), at(2));
    }

    #[tokio::test]
    async fn seed_with_out_of_order_candles_fails() {
        let broker = Arc::new(PaperBroker::new("EUR_USD"));
        broker
            .set_initial_candles(vec![candle(1, true), candle(0, true)])
            .await;
        let agg = aggregator(broker);
        assert!(agg.seed(2).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn next_closed_skips_stale_and_incomplete_candles() {
        let broker = Arc::new(PaperBroker::new("EUR_USD"));
        broker.set_initial_candles(vec![candle(0, true)]).await;
        broker.push_update_candle(candle(0, true)).await; // already stored
        broker.push_update_candle(candle(1, false)).await; // still forming
        broker.push_update_candle(candle(1, true)).await;
        let agg = aggregator(broker);
        agg.seed(1).await.unwrap();

        let (_trigger, mut shutdown) = shutdown_channel();
        let next = agg.next_closed(&mut shutdown).await.unwrap().unwrap();
        assert_eq!(next.timestamp(), at(1));
        assert!(next.is_complete());
    }

    #[tokio::test]
    async fn accepts_any_complete_candle_on_empty_series() {
        let agg = aggregator(Arc::new(PaperBroker::new("EUR_USD")));
        assert!(agg.accepts(&candle(0, true)));
        assert!(!agg.accepts(&candle(0, false)));
    }

    #[tokio::test]
    async fn poll_errors_propagate_from_next_closed() {
        let broker = Arc::new(PaperBroker::new("EUR_USD"));
        broker.set_unavailable(true).await;
        let agg = aggregator(broker);
        let (_trigger, mut shutdown) = shutdown_channel();
        let err = agg.next_closed(&mut shutdown).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn run_appends_one_candle_per_close_and_stops() {
        let broker = Arc::new(PaperBroker::new("EUR_USD"));
        broker.set_initial_candles(vec![candle(0, true)]).await;
        broker.push_update_candle(candle(1, true)).await;
        broker.push_update_candle(candle(1, true)).await;
        broker.push_update_candle(candle(2, true)).await;
        let agg = aggregator(broker.clone());
        agg.seed(1).await.unwrap();
        let series = agg.series().clone();

        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(agg.run(shutdown));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(series.len(), 3);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(6), task)
            .await
            .expect("aggregator did not stop within one retry interval")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_broker_outage() {
        let broker = Arc::new(PaperBroker::new("EUR_USD"));
        broker.set_unavailable(true).await;
        let agg = aggregator(broker.clone());
        let series = agg.series().clone();

        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(agg.run(shutdown));

        tokio::time::sleep(Duration::from_secs(12)).await;
        broker.set_unavailable(false).await;
        broker.push_update_candle(candle(0, true)).await;
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(series.len(), 1);
        trigger.trigger();
        task.await.unwrap();
    }
}
