use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    round_half_up, Broker, Candlestick, Error, Granularity, Order, OrderType, Pricing, Result,
    TradeDetails,
};

/// Scripted market data for a paper session, usually loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Replay {
    #[serde(default)]
    pub initial_candles: Vec<Candlestick>,
    /// Returned one per `update_candle` call; the last one repeats.
    #[serde(default)]
    pub update_candles: Vec<Candlestick>,
    /// Returned one per `price` call; the last one repeats.
    #[serde(default)]
    pub prices: Vec<Pricing>,
    #[serde(default)]
    pub trades: Vec<TradeDetails>,
}

impl Replay {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Default)]
struct PaperState {
    initial_candles: Vec<Candlestick>,
    update_candles: VecDeque<Candlestick>,
    last_update: Option<Candlestick>,
    prices: VecDeque<Pricing>,
    last_price: Option<Pricing>,
    trades: Vec<TradeDetails>,
    orders: Vec<Order>,
    unavailable: bool,
    reject_instructions: bool,
    freeze_trades: bool,
}

/// Simulated broker for paper trading and tests.
///
/// Serves scripted candles and quotes, keeps an in-memory trade ledger and
/// records every accepted instruction as an [`Order`]. No request ever leaves
/// the process.
pub struct PaperBroker {
    instrument: String,
    state: Arc<RwLock<PaperState>>,
}

impl PaperBroker {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            state: Arc::new(RwLock::new(PaperState::default())),
        }
    }

    pub fn from_replay(instrument: impl Into<String>, replay: Replay) -> Self {
        let instrument = instrument.into();
        info!(
            %instrument,
            initial = replay.initial_candles.len(),
            updates = replay.update_candles.len(),
            prices = replay.prices.len(),
            trades = replay.trades.len(),
            "PaperBroker loaded replay"
        );
        let state = PaperState {
            initial_candles: replay.initial_candles,
            update_candles: replay.update_candles.into(),
            prices: replay.prices.into(),
            trades: replay.trades,
            ..PaperState::default()
        };
        Self {
            instrument,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn set_initial_candles(&self, candles: Vec<Candlestick>) {
        self.state.write().await.initial_candles = candles;
    }

    pub async fn push_update_candle(&self, candle: Candlestick) {
        self.state.write().await.update_candles.push_back(candle);
    }

    pub async fn push_price(&self, price: Pricing) {
        self.state.write().await.prices.push_back(price);
    }

    /// Replace the trade at index 0, or clear it with `None`.
    pub async fn set_trade(&self, trade: Option<TradeDetails>) {
        let mut state = self.state.write().await;
        state.trades.clear();
        state.trades.extend(trade);
    }

    /// Simulate a connectivity outage.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Refuse every close / stop-loss instruction.
    pub async fn set_reject_instructions(&self, reject: bool) {
        self.state.write().await.reject_instructions = reject;
    }

    /// Accept instructions without applying them to the trade ledger, as a
    /// broker that has not confirmed them yet would.
    pub async fn set_freeze_trades(&self, freeze: bool) {
        self.state.write().await.freeze_trades = freeze;
    }

    /// Orders recorded for accepted instructions, oldest first.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.read().await.orders.clone()
    }

    fn flat_trade(&self) -> TradeDetails {
        TradeDetails {
            id: String::new(),
            instrument: self.instrument.clone(),
            current_units: 0,
            open_price: Decimal::ZERO,
            stop_loss_price: None,
        }
    }
}

impl PaperState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::CollaboratorUnavailable(
                "paper broker is offline".into(),
            ));
        }
        Ok(())
    }

    fn check_instruction(&self, trade: &TradeDetails) -> Result<usize> {
        self.check_available()?;
        if self.reject_instructions {
            return Err(Error::CollaboratorRejected(format!(
                "paper broker refused instruction for trade '{}'",
                trade.id
            )));
        }
        self.trades
            .iter()
            .position(|t| t.id == trade.id && t.is_open())
            .ok_or_else(|| {
                Error::CollaboratorRejected(format!("no open trade with id '{}'", trade.id))
            })
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn initial_candles(
        &self,
        _instrument: &str,
        _granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candlestick>> {
        let state = self.state.read().await;
        state.check_available()?;
        let skip = state.initial_candles.len().saturating_sub(count);
        Ok(state.initial_candles[skip..].to_vec())
    }

    async fn update_candle(
        &self,
        _instrument: &str,
        _granularity: Granularity,
    ) -> Result<Candlestick> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if let Some(next) = state.update_candles.pop_front() {
            state.last_update = Some(next);
        }
        state
            .last_update
            .clone()
            .ok_or_else(|| Error::CollaboratorUnavailable("no candle available yet".into()))
    }

    async fn price(&self, _instrument: &str) -> Result<Pricing> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if let Some(next) = state.prices.pop_front() {
            state.last_price = Some(next);
        }
        state
            .last_price
            .clone()
            .ok_or_else(|| Error::CollaboratorUnavailable("no quote available yet".into()))
    }

    async fn trade_details(&self, index: usize) -> Result<TradeDetails> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .trades
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.flat_trade()))
    }

    async fn close_position(&self, trade: &TradeDetails, fraction: Decimal) -> Result<()> {
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(Error::InvalidArgument(format!(
                "close fraction must be in (0, 1], got {fraction}"
            )));
        }

        let mut state = self.state.write().await;
        let idx = state.check_instruction(trade)?;
        let current = state.trades[idx].current_units;
        let closed = round_half_up(Decimal::from(current) * fraction, 0)
            .to_i64()
            .unwrap_or(0);
        if closed == 0 {
            return Err(Error::InvalidArgument(format!(
                "closing {fraction} of {current} units rounds to nothing"
            )));
        }

        let order = Order::market(trade.instrument.clone(), -closed)?;
        debug!(
            trade = %trade.id,
            units = order.units(),
            "Paper close filled"
        );
        state.orders.push(order);

        if !state.freeze_trades {
            let remaining = current - closed;
            if remaining == 0 {
                state.trades.remove(idx);
            } else {
                state.trades[idx].current_units = remaining;
            }
        }
        Ok(())
    }

    async fn modify_stop_loss(&self, trade: &TradeDetails, price: Decimal) -> Result<()> {
        let mut state = self.state.write().await;
        let idx = state.check_instruction(trade)?;

        let order = Order::builder()
            .id(format!("{}-sl", trade.id))
            .order_type(OrderType::StopLoss)
            .instrument(trade.instrument.clone())
            .units(-state.trades[idx].current_units)
            .stop_loss_price(price)
            .build()?;
        debug!(trade = %trade.id, %price, "Paper stop-loss moved");
        state.orders.push(order);

        if !state.freeze_trades {
            state.trades[idx].stop_loss_price = Some(price);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn trade(units: i64) -> TradeDetails {
        TradeDetails::new("42", "EUR_USD", units, dec!(1.10000), None).unwrap()
    }

    #[tokio::test]
    async fn full_close_removes_trade_and_records_market_order() {
        let broker = PaperBroker::new("EUR_USD");
        broker.set_trade(Some(trade(1_000))).await;

        broker.close_position(&trade(1_000), Decimal::ONE).await.unwrap();

        let orders = broker.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_type(), OrderType::Market);
        assert_eq!(orders[0].units(), -1_000);
        assert!(!broker.trade_details(0).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn partial_close_keeps_remaining_units() {
        let broker = PaperBroker::new("EUR_USD");
        broker.set_trade(Some(trade(-1_000))).await;

        broker.close_position(&trade(-1_000), dec!(0.5)).await.unwrap();

        let remaining = broker.trade_details(0).await.unwrap();
        assert_eq!(remaining.current_units, -500);
        assert_eq!(broker.orders().await[0].units(), 500);
    }

    #[tokio::test]
    async fn stop_loss_move_records_stop_order() {
        let broker = PaperBroker::new("EUR_USD");
        broker.set_trade(Some(trade(1_000))).await;

        broker
            .modify_stop_loss(&trade(1_000), dec!(1.10000))
            .await
            .unwrap();

        let orders = broker.orders().await;
        assert_eq!(orders[0].order_type(), OrderType::StopLoss);
        assert_eq!(orders[0].stop_loss_price(), Some(dec!(1.10000)));
        assert_eq!(
            broker.trade_details(0).await.unwrap().stop_loss_price,
            Some(dec!(1.10000))
        );
    }

    #[tokio::test]
    async fn rejecting_broker_leaves_ledger_untouched() {
        let broker = PaperBroker::new("EUR_USD");
        broker.set_trade(Some(trade(1_000))).await;
        broker.set_reject_instructions(true).await;

        let err = broker
            .close_position(&trade(1_000), Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CollaboratorRejected(_)));
        assert!(broker.orders().await.is_empty());
        assert_eq!(broker.trade_details(0).await.unwrap().current_units, 1_000);
    }

    #[tokio::test]
    async fn offline_broker_reports_unavailable() {
        let broker = PaperBroker::new("EUR_USD");
        broker.set_unavailable(true).await;
        assert!(matches!(
            broker.price("EUR_USD").await,
            Err(Error::CollaboratorUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn initial_candles_returns_most_recent_count() {
        let broker = PaperBroker::new("EUR_USD");
        let candles: Vec<Candlestick> = (0..5)
            .map(|i| {
                Candlestick::new(
                    Granularity::H1,
                    dec!(1),
                    dec!(1),
                    dec!(1),
                    dec!(1),
                    0,
                    Utc.with_ymd_and_hms(2024, 1, 1, i, 0, 0).unwrap(),
                    true,
                )
                .unwrap()
            })
            .collect();
        broker.set_initial_candles(candles).await;

        let got = broker
            .initial_candles("EUR_USD", Granularity::H1, 2)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(
            got[0].timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn replay_parses_json() {
        let json = r#"{
            "initial_candles": [{
                "granularity": "M30",
                "open": "1.10000", "high": "1.10100", "low": "1.09900", "close": "1.10050",
                "volume": 12, "timestamp": "2024-05-06T08:00:00Z", "complete": true
            }],
            "prices": [{ "ask": "1.10060", "bid": "1.10050",
                         "timestamp": "2024-05-06T08:30:01Z", "tradable": true }],
            "trades": [{ "id": "7", "instrument": "EUR_USD", "current_units": 100,
                         "open_price": "1.10000" }]
        }"#;
        let replay: Replay = serde_json::from_str(json).unwrap();
        assert_eq!(replay.initial_candles.len(), 1);
        assert_eq!(replay.prices[0].bid, dec!(1.10050));
        assert!(replay.trades[0].stop_loss_price.is_none());
        assert!(replay.update_candles.is_empty());
    }
}
