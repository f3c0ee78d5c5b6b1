pub mod moving_average;
pub mod rsi;

pub use moving_average::{MovingAverage, MovingAverageKind};
pub use rsi::Rsi;

use rust_decimal::Decimal;

use common::{CandlestickSeries, PriceSource, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Sma,
    Wma,
    Rsi,
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorKind::Sma => write!(f, "sma"),
            IndicatorKind::Wma => write!(f, "wma"),
            IndicatorKind::Rsi => write!(f, "rsi"),
        }
    }
}

/// A computed indicator reading and what produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorValue {
    pub kind: IndicatorKind,
    pub period: usize,
    pub source: PriceSource,
    pub value: Decimal,
    /// Series length the value was computed against.
    pub series_len: usize,
}

/// Incremental indicator over a candle series.
///
/// `compute` is only called with a non-decreasing `len` that is at least
/// `warm_up()`, so implementations may keep state between calls and only
/// consume the candles appended since the previous call.
pub trait Indicator: Send {
    fn kind(&self) -> IndicatorKind;

    fn period(&self) -> usize;

    fn source(&self) -> PriceSource;

    /// Candles needed before the first value exists.
    fn warm_up(&self) -> usize;

    /// Value over the first `len` candles of `series`, unrounded.
    fn compute(&mut self, series: &CandlestickSeries, len: usize) -> Result<Decimal>;
}
