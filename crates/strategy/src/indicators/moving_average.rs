use rust_decimal::Decimal;

use common::{CandlestickSeries, Error, PriceSource, Result};

use super::{Indicator, IndicatorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovingAverageKind {
    /// Arithmetic mean of the window.
    Simple,
    /// Weights `1..=period`, the most recent candle heaviest.
    Weighted,
}

/// Simple or weighted moving average over the last `period` candles.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    kind: MovingAverageKind,
    period: usize,
    source: PriceSource,
}

impl MovingAverage {
    pub fn new(kind: MovingAverageKind, period: usize, source: PriceSource) -> Result<Self> {
        if period == 0 {
            return Err(Error::InvalidArgument(
                "moving average period must be at least 1".into(),
            ));
        }
        Ok(Self {
            kind,
            period,
            source,
        })
    }

    pub fn simple(period: usize, source: PriceSource) -> Result<Self> {
        Self::new(MovingAverageKind::Simple, period, source)
    }

    pub fn weighted(period: usize, source: PriceSource) -> Result<Self> {
        Self::new(MovingAverageKind::Weighted, period, source)
    }

    /// Average of `prices` (oldest first), which must hold exactly `period` values.
    fn average(&self, prices: &[Decimal]) -> Result<Decimal> {
        let (total, divisor) = match self.kind {
            MovingAverageKind::Simple => (
                prices.iter().try_fold(Decimal::ZERO, |acc, p| acc.checked_add(*p)),
                Decimal::from(self.period),
            ),
            MovingAverageKind::Weighted => {
                let n = self.period as u64;
                let weighted = prices.iter().zip(1u64..).try_fold(Decimal::ZERO, |acc, (p, w)| {
                    p.checked_mul(Decimal::from(w))
                        .and_then(|term| acc.checked_add(term))
                });
                (weighted, Decimal::from(n * (n + 1) / 2))
            }
        };
        total
            .and_then(|t| t.checked_div(divisor))
            .ok_or_else(|| overflow(self.kind()))
    }
}

fn overflow(kind: IndicatorKind) -> Error {
    Error::InvalidArgument(format!("{kind} overflowed on extreme prices"))
}

impl Indicator for MovingAverage {
    fn kind(&self) -> IndicatorKind {
        match self.kind {
            MovingAverageKind::Simple => IndicatorKind::Sma,
            MovingAverageKind::Weighted => IndicatorKind::Wma,
        }
    }

    fn period(&self) -> usize {
        self.period
    }

    fn source(&self) -> PriceSource {
        self.source
    }

    fn warm_up(&self) -> usize {
        self.period
    }

    fn compute(&mut self, series: &CandlestickSeries, len: usize) -> Result<Decimal> {
        let window = series.window(len, self.period);
        if window.len() < self.period {
            return Err(Error::InsufficientData {
                have: window.len(),
                need: self.period,
            });
        }
        let prices: Vec<Decimal> = window.iter().map(|c| self.source.extract(c)).collect();
        self.average(&prices)
    }
}
