use rust_decimal::Decimal;

use common::{CandlestickSeries, Error, PriceSource, Result};

use super::{Indicator, IndicatorKind};

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average. The first `period` price changes
/// seed the averages with their simple mean; every later change is folded in
/// as `avg = (avg * (period - 1) + current) / period`.
///
/// State advances only over candles appended since the previous call, so a
/// read after one new candle costs a single smoothing step.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    source: PriceSource,
    /// Candles already folded into the averages.
    consumed: usize,
    prev_price: Option<Decimal>,
    changes: usize,
    avg_gain: Decimal,
    avg_loss: Decimal,
}

impl Rsi {
    pub fn new(period: usize, source: PriceSource) -> Result<Self> {
        if period < 2 {
            return Err(Error::InvalidArgument(format!(
                "RSI period must be >= 2, got {period}"
            )));
        }
        Ok(Self {
            period,
            source,
            consumed: 0,
            prev_price: None,
            changes: 0,
            avg_gain: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
        })
    }

    fn fold(&mut self, price: Decimal) -> Result<()> {
        if let Some(prev) = self.prev_price {
            // both prices are non-negative, so the difference cannot overflow
            let change = price - prev;
            let gain = change.max(Decimal::ZERO);
            let loss = (-change).max(Decimal::ZERO);
            let n = Decimal::from(self.period);

            // commit only after every step succeeded
            let changes = self.changes + 1;
            let (avg_gain, avg_loss) = if changes <= self.period {
                let mut avg_gain = checked(self.avg_gain.checked_add(gain))?;
                let mut avg_loss = checked(self.avg_loss.checked_add(loss))?;
                if changes == self.period {
                    avg_gain /= n;
                    avg_loss /= n;
                }
                (avg_gain, avg_loss)
            } else {
                let keep = n - Decimal::ONE;
                (
                    smooth(self.avg_gain, keep, gain, n)?,
                    smooth(self.avg_loss, keep, loss, n)?,
                )
            };
            self.changes = changes;
            self.avg_gain = avg_gain;
            self.avg_loss = avg_loss;
        }
        self.prev_price = Some(price);
        Ok(())
    }

    fn value(&self) -> Decimal {
        if self.avg_loss.is_zero() {
            return Decimal::ONE_HUNDRED;
        }
        // An extremely small loss can push RS past Decimal's range; the
        // limit of the formula there is 100.
        let Some(rs) = self.avg_gain.checked_div(self.avg_loss) else {
            return Decimal::ONE_HUNDRED;
        };
        match Decimal::ONE.checked_add(rs) {
            Some(denominator) => Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / denominator,
            None => Decimal::ONE_HUNDRED,
        }
    }
}

/// `(avg * keep + current) / n`
fn smooth(avg: Decimal, keep: Decimal, current: Decimal, n: Decimal) -> Result<Decimal> {
    let total = avg
        .checked_mul(keep)
        .and_then(|weighted| weighted.checked_add(current));
    Ok(checked(total)? / n)
}

fn checked(value: Option<Decimal>) -> Result<Decimal> {
    value.ok_or_else(|| Error::InvalidArgument("RSI overflowed on extreme prices".into()))
}

impl Indicator for Rsi {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn period(&self) -> usize {
        self.period
    }

    fn source(&self) -> PriceSource {
        self.source
    }

    /// `period` changes need `period + 1` candles.
    fn warm_up(&self) -> usize {
        self.period + 1
    }

    fn compute(&mut self, series: &CandlestickSeries, len: usize) -> Result<Decimal> {
        if len > self.consumed {
            for candle in series.range(self.consumed, len) {
                self.fold(self.source.extract(&candle))?;
                self.consumed += 1;
            }
        }

        if self.changes < self.period {
            return Err(Error::InsufficientData {
                have: self.consumed,
                need: self.warm_up(),
            });
        }
        Ok(self.value())
    }
}
