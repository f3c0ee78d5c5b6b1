use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Candlestick, Error, Result};

/// Append-only, timestamp-ordered store of completed candles.
///
/// Cloning yields another handle to the same storage. One writer (the candle
/// aggregator) appends; any number of readers snapshot a length and index up
/// to it, so a read never observes a half-finished append.
#[derive(Debug, Clone, Default)]
pub struct CandlestickSeries {
    candles: Arc<RwLock<Vec<Candlestick>>>,
}

impl CandlestickSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed candle strictly after the current last one.
    pub fn push(&self, candle: Candlestick) -> Result<()> {
        if !candle.is_complete() {
            return Err(Error::IncompleteCandle);
        }

        let mut candles = self.write();
        if let Some(last) = candles.last() {
            if candle.timestamp() <= last.timestamp() {
                return Err(Error::OutOfOrder {
                    last: last.timestamp(),
                    got: candle.timestamp(),
                });
            }
        }
        candles.push(candle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Candlestick> {
        self.read().last().cloned()
    }

    /// Candles in `[from, to)`; `to` is clamped to the current length.
    pub fn range(&self, from: usize, to: usize) -> Vec<Candlestick> {
        let candles = self.read();
        let to = to.min(candles.len());
        if from >= to {
            return Vec::new();
        }
        candles[from..to].to_vec()
    }

    /// The `n` candles ending just before index `end` (oldest first).
    pub fn window(&self, end: usize, n: usize) -> Vec<Candlestick> {
        self.range(end.saturating_sub(n), end)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Candlestick>> {
        // A panic while holding the lock cannot leave a partial push behind,
        // so a poisoned lock still guards a valid vector.
        self.candles.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Candlestick>> {
        self.candles.write().unwrap_or_else(|e| e.into_inner())
    }
}
