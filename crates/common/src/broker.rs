use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{Candlestick, Granularity, Pricing, Result, TradeDetails};

/// Abstraction over the broker connection.
///
/// Connectivity (reconnects, backoff, request signing) lives behind this
/// trait. Implementations report an unreachable broker as
/// `Error::CollaboratorUnavailable` and a refused instruction as
/// `Error::CollaboratorRejected`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Historical completed candles, oldest first.
    async fn initial_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candlestick>>;

    /// The latest candle, which may still be forming.
    async fn update_candle(&self, instrument: &str, granularity: Granularity)
        -> Result<Candlestick>;

    /// The latest quote.
    async fn price(&self, instrument: &str) -> Result<Pricing>;

    /// Details of the open trade at `index`. A flat account reports zero units.
    async fn trade_details(&self, index: usize) -> Result<TradeDetails>;

    /// Close `fraction` (in `(0, 1]`) of the trade's current units.
    async fn close_position(&self, trade: &TradeDetails, fraction: Decimal) -> Result<()>;

    /// Move the trade's stop-loss to `price`.
    async fn modify_stop_loss(&self, trade: &TradeDetails, price: Decimal) -> Result<()>;
}
