use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use common::{Error, PriceObserver, Pricing, Result, Signal};

use crate::engine::IndicatorEngine;
use crate::entry::EntryStrategy;

/// Evaluates entry strategies on every accepted tick and forwards their
/// signals to `signal_tx`.
pub struct EntryRunner {
    engine: Arc<IndicatorEngine>,
    entries: Mutex<Vec<Box<dyn EntryStrategy>>>,
    signal_tx: mpsc::Sender<Signal>,
}

impl EntryRunner {
    pub fn new(
        engine: Arc<IndicatorEngine>,
        entries: Vec<Box<dyn EntryStrategy>>,
        signal_tx: mpsc::Sender<Signal>,
    ) -> Self {
        Self {
            engine,
            entries: Mutex::new(entries),
            signal_tx,
        }
    }

    /// Run every entry once and return the signals they produced.
    ///
    /// Warm-up is not an error here; other failures are logged per entry.
    pub async fn evaluate(&self) -> Vec<Signal> {
        let mut entries = self.entries.lock().await;
        let mut signals = Vec::new();
        for entry in entries.iter_mut() {
            match entry.evaluate(&self.engine) {
                Ok(Some(signal)) => {
                    info!(strategy = %entry.name(), %signal, "Entry signal");
                    signals.push(signal);
                }
                Ok(None) => {}
                Err(Error::InsufficientData { have, need }) => {
                    debug!(strategy = %entry.name(), have, need, "Indicators warming up");
                }
                Err(e) => warn!(strategy = %entry.name(), error = %e, "Entry evaluation failed"),
            }
        }
        signals
    }
}

#[async_trait]
impl PriceObserver for EntryRunner {
    fn name(&self) -> &str {
        "entries"
    }

    async fn on_tick(&self, _tick: &Pricing) -> Result<()> {
        for signal in self.evaluate().await {
            if self.signal_tx.send(signal).await.is_err() {
                return Err(Error::CollaboratorUnavailable(
                    "signal channel closed".into(),
                ));
            }
        }
        Ok(())
    }
}
