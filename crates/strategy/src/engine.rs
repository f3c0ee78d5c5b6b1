use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use common::{round_half_up, CandlestickSeries, Error, Result};

use crate::indicators::{Indicator, IndicatorValue};

/// Opaque reference to an indicator registered with an [`IndicatorEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndicatorHandle(usize);

struct Slot {
    name: String,
    indicator: Box<dyn Indicator>,
    cached: Option<IndicatorValue>,
}

/// Owns a set of indicators over one candle series and evaluates them lazily.
///
/// A value is recomputed the first time it is read after the series grew and
/// served from cache until the next candle closes. `value` takes `&self`, so
/// the engine can be shared behind an `Arc` by several readers.
pub struct IndicatorEngine {
    series: CandlestickSeries,
    scale: u32,
    slots: Vec<Mutex<Slot>>,
    by_name: HashMap<String, IndicatorHandle>,
}

impl IndicatorEngine {
    pub fn new(series: CandlestickSeries, scale: u32) -> Self {
        Self {
            series,
            scale,
            slots: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn series(&self) -> &CandlestickSeries {
        &self.series
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        indicator: Box<dyn Indicator>,
    ) -> Result<IndicatorHandle> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::InvalidArgument(format!(
                "indicator '{name}' is already registered"
            )));
        }
        let handle = IndicatorHandle(self.slots.len());
        debug!(
            name = %name,
            kind = %indicator.kind(),
            period = indicator.period(),
            source = %indicator.source(),
            "Registered indicator"
        );
        self.slots.push(Mutex::new(Slot {
            name: name.clone(),
            indicator,
            cached: None,
        }));
        self.by_name.insert(name, handle);
        Ok(handle)
    }

    pub fn handle(&self, name: &str) -> Option<IndicatorHandle> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current value of `handle`, failing with `InsufficientData` during warm-up.
    pub fn value(&self, handle: IndicatorHandle) -> Result<IndicatorValue> {
        let slot = self.slots.get(handle.0).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown indicator handle {}", handle.0))
        })?;
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());

        // read the length once; everything below indexes up to it
        let len = self.series.len();
        if let Some(cached) = &slot.cached {
            if cached.series_len == len {
                return Ok(cached.clone());
            }
        }

        let need = slot.indicator.warm_up();
        if len < need {
            return Err(Error::InsufficientData { have: len, need });
        }

        let raw = slot.indicator.compute(&self.series, len)?;
        let value = IndicatorValue {
            kind: slot.indicator.kind(),
            period: slot.indicator.period(),
            source: slot.indicator.source(),
            value: round_half_up(raw, self.scale),
            series_len: len,
        };
        debug!(name = %slot.name, value = %value.value, len, "Indicator recomputed");
        slot.cached = Some(value.clone());
        Ok(value)
    }

    /// Like [`value`](Self::value), looked up by registration name.
    pub fn value_of(&self, name: &str) -> Result<IndicatorValue> {
        let handle = self.handle(name).ok_or_else(|| Error::UnknownStrategy {
            kind: "indicator",
            name: name.to_string(),
        })?;
        self.value(handle)
    }
}
