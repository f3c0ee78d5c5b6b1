use std::cmp::Ordering;

use rust_decimal::Decimal;
use tracing::debug;

use common::{Error, Result, Signal};

use crate::engine::{IndicatorEngine, IndicatorHandle};

/// Entry rule evaluated against indicator values.
pub trait EntryStrategy: Send {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    fn instrument(&self) -> &str;

    /// Returns `None` if no actionable signal is present. Called on every
    /// accepted tick; implementations decide at most once per closed candle.
    fn evaluate(&mut self, engine: &IndicatorEngine) -> Result<Option<Signal>>;
}

fn signal(buy: bool, instrument: &str, units: i64) -> Signal {
    if buy {
        Signal::Buy {
            instrument: instrument.to_string(),
            units,
        }
    } else {
        Signal::Sell {
            instrument: instrument.to_string(),
            units,
        }
    }
}

fn check_units(units: i64) -> Result<i64> {
    if units <= 0 {
        return Err(Error::InvalidArgument(format!(
            "entry units must be positive, got {units}"
        )));
    }
    Ok(units)
}

/// Buys when RSI is at or below `oversold`, sells at or above `overbought`.
pub struct RsiEntry {
    name: String,
    instrument: String,
    units: i64,
    rsi: IndicatorHandle,
    oversold: Decimal,
    overbought: Decimal,
    last_len: Option<usize>,
}

impl RsiEntry {
    pub fn new(
        name: impl Into<String>,
        instrument: impl Into<String>,
        units: i64,
        rsi: IndicatorHandle,
        oversold: Decimal,
        overbought: Decimal,
    ) -> Result<Self> {
        if oversold < Decimal::ZERO || overbought > Decimal::ONE_HUNDRED || oversold >= overbought
        {
            return Err(Error::InvalidArgument(format!(
                "RSI thresholds must satisfy 0 <= oversold < overbought <= 100, \
                 got {oversold}/{overbought}"
            )));
        }
        Ok(Self {
            name: name.into(),
            instrument: instrument.into(),
            units: check_units(units)?,
            rsi,
            oversold,
            overbought,
            last_len: None,
        })
    }
}

impl EntryStrategy for RsiEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn instrument(&self) -> &str {
        &self.instrument
    }

    fn evaluate(&mut self, engine: &IndicatorEngine) -> Result<Option<Signal>> {
        let rsi = engine.value(self.rsi)?;
        if self.last_len == Some(rsi.series_len) {
            return Ok(None);
        }
        self.last_len = Some(rsi.series_len);
        debug!(strategy = %self.name, rsi = %rsi.value, "RSI evaluated");

        if rsi.value <= self.oversold {
            Ok(Some(signal(true, &self.instrument, self.units)))
        } else if rsi.value >= self.overbought {
            Ok(Some(signal(false, &self.instrument, self.units)))
        } else {
            Ok(None)
        }
    }
}

/// Signals when the fast average crosses the slow one: upward buys,
/// downward sells. Equal readings keep the previous side.
pub struct MaCrossover {
    name: String,
    instrument: String,
    units: i64,
    fast: IndicatorHandle,
    slow: IndicatorHandle,
    above: Option<bool>,
    last_len: Option<usize>,
}

impl MaCrossover {
    pub fn new(
        name: impl Into<String>,
        instrument: impl Into<String>,
        units: i64,
        fast: IndicatorHandle,
        slow: IndicatorHandle,
    ) -> Result<Self> {
        if fast == slow {
            return Err(Error::InvalidArgument(
                "crossover needs two distinct indicators".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            instrument: instrument.into(),
            units: check_units(units)?,
            fast,
            slow,
            above: None,
            last_len: None,
        })
    }
}

impl EntryStrategy for MaCrossover {
    fn name(&self) -> &str {
        &self.name
    }

    fn instrument(&self) -> &str {
        &self.instrument
    }

    fn evaluate(&mut self, engine: &IndicatorEngine) -> Result<Option<Signal>> {
        let fast = engine.value(self.fast)?;
        let slow = engine.value(self.slow)?;
        // a candle closed between the two reads; try again next tick
        if fast.series_len != slow.series_len || self.last_len == Some(fast.series_len) {
            return Ok(None);
        }
        self.last_len = Some(fast.series_len);

        let above = match fast.value.cmp(&slow.value) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => return Ok(None),
        };
        let crossed = self.above.is_some_and(|prev| prev != above);
        self.above = Some(above);
        debug!(
            strategy = %self.name,
            fast = %fast.value,
            slow = %slow.value,
            crossed,
            "Crossover evaluated"
        );

        Ok(crossed.then(|| signal(above, &self.instrument, self.units)))
    }
}
